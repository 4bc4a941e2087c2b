use std::io::Write;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::InspectArgs;
use crate::document::Document;
use crate::engine::config::EngineConfig;
use crate::engine::data::DataRecord;
use crate::engine::pipeline::{Engine, anchor_reports};
use crate::model::InspectPayload;
use crate::util::read_json;

pub fn run(args: InspectArgs) -> Result<()> {
    let config = EngineConfig::load_or_default(args.config.as_deref())?;
    let engine = Engine::new(config)?;
    let document = Document::load(&args.template)?;
    let analysis = engine.analyze(&document);

    let candidates = match &args.data {
        Some(path) => {
            let raw: serde_json::Value = read_json(path)?;
            let data = DataRecord::from_json(raw)
                .with_context(|| format!("invalid data record in {}", path.display()))?;
            let keys = engine.key_index(&data);
            let (items, rejections) = engine.score(&analysis, &keys);
            info!(
                keys = keys.len(),
                rejections = rejections.len(),
                "scored anchors"
            );
            Some(anchor_reports(&analysis, &items, None))
        }
        None => None,
    };

    let payload = InspectPayload {
        template_path: args.template.display().to_string(),
        containers: args.with_containers.then(|| analysis.containers.clone()),
        spans: analysis.spans,
        anchors: analysis.anchors,
        clusters: analysis.clusters,
        constraints: analysis.constraints,
        candidates,
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &payload).context("failed to write inspect output")?;
    writeln!(stdout).context("failed to write inspect output")?;
    Ok(())
}
