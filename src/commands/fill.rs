use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::FillArgs;
use crate::document::Document;
use crate::engine::config::EngineConfig;
use crate::engine::data::DataRecord;
use crate::engine::inference::{CommandSource, SuggestionSource};
use crate::engine::pipeline::{Engine, FillOutcome};
use crate::engine::resolver::Assignment;
use crate::engine::types::SemanticType;
use crate::model::{FillCounts, FillReport, REPORT_VERSION, RunMetadata, SpanMappingEntry};
use crate::util::{
    ensure_directory, now_utc_string, read_json, sha256_file, utc_compact_string,
    write_json_pretty,
};

pub fn run(args: FillArgs) -> Result<()> {
    let config = apply_overrides(EngineConfig::load_or_default(args.config.as_deref())?, &args);
    let out_path = args
        .out
        .clone()
        .unwrap_or_else(|| default_output_path(&args.template));

    info!(
        template = %args.template.display(),
        data = %args.data.display(),
        dry_run = args.dry_run,
        strict = args.strict,
        policy = config.suggestion_policy.as_str(),
        "fill requested"
    );

    let document = Document::load(&args.template)?;
    let raw_data: serde_json::Value = read_json(&args.data)?;
    let data = DataRecord::from_json(raw_data)
        .with_context(|| format!("invalid data record in {}", args.data.display()))?;

    let mut source = config.inference_command.as_ref().map(|program| {
        CommandSource::new(
            program.clone(),
            config.inference_args.clone(),
            Duration::from_millis(config.inference_timeout_ms),
        )
    });
    let inference_source = source.as_ref().map(|source| source.name().to_string());

    let engine = Engine::new(config.clone())?;
    let outcome = engine.fill(
        &document,
        &data,
        source
            .as_mut()
            .map(|source| source as &mut dyn SuggestionSource),
    )?;

    if args.dry_run {
        for entry in &outcome.preview {
            info!(location = %entry.location, before = %entry.before, after = %entry.after, "would change");
        }
        info!(changes = outcome.preview.len(), "dry-run complete; nothing saved");
    } else {
        outcome.document.save(&out_path)?;
        info!(path = %out_path.display(), "wrote filled document");
    }

    if let Some(report_path) = &args.report {
        let metadata = RunMetadata {
            report_version: REPORT_VERSION,
            tool_version: env!("CARGO_PKG_VERSION"),
            run_id: format!("fill-{}", utc_compact_string(Utc::now())),
            generated_at: now_utc_string(),
            template_path: args.template.display().to_string(),
            template_sha256: sha256_file(&args.template)?,
            data_path: args.data.display().to_string(),
            data_sha256: sha256_file(&args.data)?,
            output_path: (!args.dry_run).then(|| out_path.display().to_string()),
            dry_run: args.dry_run,
            strict: args.strict,
            inference_source,
            config,
        };
        write_json_pretty(report_path, &build_report(metadata, &outcome, data.len()))?;
        info!(path = %report_path.display(), "wrote fill report");
    }

    if let Some(artifacts_dir) = &args.artifacts_dir {
        write_artifacts(artifacts_dir, &outcome, &data)?;
        info!(path = %artifacts_dir.display(), "wrote artifacts");
    }

    for item in &outcome.unresolved {
        warn!(
            item = %item.item_id,
            location = %item.location,
            label = %item.label,
            slot_type = item.slot_type.as_str(),
            "anchor left unresolved"
        );
    }
    info!(
        resolved = outcome.resolution.table.len(),
        unresolved = outcome.unresolved.len(),
        filled = outcome.commit.filled.len(),
        "fill completed"
    );

    if args.strict {
        outcome.strict_check()?;
    }
    Ok(())
}

fn apply_overrides(mut config: EngineConfig, args: &FillArgs) -> EngineConfig {
    if let Some(command) = &args.inference_command {
        config.inference_command = Some(command.clone());
    }
    if !args.inference_args.is_empty() {
        config.inference_args = args.inference_args.clone();
    }
    if let Some(timeout_ms) = args.inference_timeout_ms {
        config.inference_timeout_ms = timeout_ms;
    }
    if let Some(policy) = args.suggestion_policy {
        config.suggestion_policy = policy;
    }
    if let Some(rounds) = args.repair_rounds {
        config.repair_rounds = rounds;
    }
    if let Some(threshold) = args.accept_threshold {
        config.accept_threshold = threshold;
    }
    config
}

fn default_output_path(template: &Path) -> PathBuf {
    let stem = template
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document");
    template.with_file_name(format!("{stem}.filled.json"))
}

fn build_report(metadata: RunMetadata, outcome: &FillOutcome, data_keys: usize) -> FillReport {
    let analysis = &outcome.analysis;
    FillReport {
        counts: FillCounts {
            containers: analysis.containers.len(),
            spans: analysis.spans.len(),
            anchors: analysis.anchors.len(),
            clusters: analysis.clusters.len(),
            data_keys,
            resolved: outcome.resolution.table.len(),
            unresolved: outcome.unresolved.len(),
            filled: outcome.commit.filled.len(),
            failed: outcome.commit.failed.len(),
            suspicious: outcome.commit.suspicious.len(),
            checkbox_groups: outcome.checkboxes.len(),
            tables: outcome.tables.len(),
            type_rejections: outcome.rejections.len(),
        },
        metadata,
        assignments: outcome.resolution.table.clone(),
        anchors: outcome.anchors.clone(),
        filled: outcome.commit.filled.clone(),
        failed: outcome.commit.failed.clone(),
        checkboxes: outcome.checkboxes.clone(),
        tables: outcome.tables.clone(),
        unresolved: outcome.unresolved.clone(),
        suspicious: outcome.commit.suspicious.clone(),
        type_rejections: outcome.rejections.clone(),
        diagnostics: outcome.resolution.diagnostics.clone(),
        unused_keys: outcome.unused_keys.clone(),
        preview: outcome.preview.clone(),
    }
}

fn span_mapping(outcome: &FillOutcome) -> Vec<SpanMappingEntry> {
    outcome
        .analysis
        .spans
        .iter()
        .map(|span| {
            let (key, computed_value) = match outcome.resolution.table.get(&span.span_id) {
                Some(Assignment::Key { key, .. }) => (Some(key.clone()), None),
                Some(Assignment::Computed { value, .. }) => (None, Some(value.clone())),
                None => (None, None),
            };
            SpanMappingEntry {
                span_id: span.span_id.clone(),
                location: span.location.to_string(),
                raw_text: span.raw_text.clone(),
                slot_type: outcome
                    .analysis
                    .slot_types
                    .get(&span.span_id)
                    .copied()
                    .unwrap_or(SemanticType::Unknown),
                key,
                computed_value,
            }
        })
        .collect()
}

fn write_artifacts(dir: &Path, outcome: &FillOutcome, data: &DataRecord) -> Result<()> {
    ensure_directory(dir)?;
    write_json_pretty(&dir.join("field_spans.json"), &outcome.analysis.spans)?;
    write_json_pretty(&dir.join("anchors.json"), &outcome.analysis.anchors)?;
    write_json_pretty(&dir.join("anchor_clusters.json"), &outcome.analysis.clusters)?;
    write_json_pretty(&dir.join("span_mapping.json"), &span_mapping(outcome))?;
    write_json_pretty(&dir.join("data_normalized.json"), &data.as_json())?;
    Ok(())
}
