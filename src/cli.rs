use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::engine::config::SuggestionPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "formfill",
    version,
    about = "Fill document templates from a flat key/value record"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Fill(FillArgs),
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FillArgs {
    #[arg(long)]
    pub template: PathBuf,

    #[arg(long)]
    pub data: PathBuf,

    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub report: Option<PathBuf>,

    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub strict: bool,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub inference_command: Option<String>,

    #[arg(long = "inference-arg", allow_hyphen_values = true)]
    pub inference_args: Vec<String>,

    #[arg(long)]
    pub inference_timeout_ms: Option<u64>,

    #[arg(long, value_enum)]
    pub suggestion_policy: Option<SuggestionPolicy>,

    #[arg(long)]
    pub repair_rounds: Option<usize>,

    #[arg(long)]
    pub accept_threshold: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[arg(long)]
    pub template: PathBuf,

    #[arg(long)]
    pub data: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub with_containers: bool,
}
