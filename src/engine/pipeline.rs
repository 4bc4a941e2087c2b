use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::document::{Document, Location};
use crate::engine::anchors::{
    Anchor, AnchorCluster, AnchorTarget, LabelSource, RoleConstraint, RolePatterns,
    cluster_anchors, extract_anchors, role_constraints,
};
use crate::engine::checkbox::{CheckboxOutcome, fill_checkbox_group};
use crate::engine::commit::{CommitOutcome, PlannedFill, check_fill_types, commit_fills};
use crate::engine::config::EngineConfig;
use crate::engine::data::{DataRecord, render_value};
use crate::engine::errors::FillError;
use crate::engine::inference::SuggestionSource;
use crate::engine::resolver::{Assignment, AssignmentTable, Resolution, ResolveItem, Resolver};
use crate::engine::scoring::{Candidate, KeyIndex, Scorer, TypeRejection};
use crate::engine::spans::{BlankPatterns, FieldSpan, extract_field_spans};
use crate::engine::tables::{TableOutcome, fill_table};
use crate::engine::traverse::{TextContainer, traverse};
use crate::engine::types::{Lexicon, SlotType};

pub struct Engine {
    config: EngineConfig,
    lexicon: Lexicon,
    patterns: BlankPatterns,
    roles: RolePatterns,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub containers: Vec<TextContainer>,
    pub spans: Vec<FieldSpan>,
    pub slot_types: BTreeMap<String, SlotType>,
    pub anchors: Vec<Anchor>,
    pub clusters: Vec<AnchorCluster>,
    pub constraints: Vec<RoleConstraint>,
}

impl Analysis {
    pub fn span(&self, span_id: &str) -> Option<&FieldSpan> {
        self.spans.iter().find(|span| span.span_id == span_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchorReport {
    pub anchor_id: String,
    pub item_id: String,
    pub kind: &'static str,
    pub label: String,
    pub label_source: LabelSource,
    pub location: String,
    pub slot_type: SlotType,
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<Assignment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedItem {
    pub item_id: String,
    pub anchor_id: String,
    pub kind: &'static str,
    pub label: String,
    pub location: String,
    pub slot_type: SlotType,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_candidate: Option<Candidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckboxFill {
    pub anchor_id: String,
    pub key: String,
    pub outcome: CheckboxOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableFill {
    pub anchor_id: String,
    pub key: String,
    pub outcome: TableOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewEntry {
    pub location: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub document: Document,
    pub analysis: Analysis,
    pub resolution: Resolution,
    pub anchors: Vec<AnchorReport>,
    pub rejections: Vec<TypeRejection>,
    pub commit: CommitOutcome,
    pub checkboxes: Vec<CheckboxFill>,
    pub tables: Vec<TableFill>,
    pub unresolved: Vec<UnresolvedItem>,
    pub unused_keys: Vec<String>,
    pub preview: Vec<PreviewEntry>,
}

impl FillOutcome {
    pub fn strict_check(&self) -> Result<(), FillError> {
        if self.unresolved.is_empty() {
            return Ok(());
        }
        Err(FillError::UnresolvedAnchors {
            count: self.unresolved.len(),
        })
    }
}

fn anchor_kind(anchor: &Anchor) -> &'static str {
    match anchor.target {
        AnchorTarget::Placeholder { .. } => "placeholder",
        AnchorTarget::CheckboxGroup { .. } => "checkbox_group",
        AnchorTarget::Table { .. } => "table",
    }
}

fn item_id(anchor: &Anchor) -> &str {
    anchor.span_id().unwrap_or(&anchor.anchor_id)
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            config,
            lexicon: Lexicon::new()?,
            patterns: BlankPatterns::new()?,
            roles: RolePatterns::new()?,
        })
    }

    pub fn analyze(&self, document: &Document) -> Analysis {
        let containers = traverse(document);
        let spans = extract_field_spans(&containers, &self.patterns, self.config.context_window);

        let mut slot_types = spans
            .iter()
            .map(|span| (span.span_id.clone(), self.lexicon.infer_slot_type(span)))
            .collect::<BTreeMap<String, SlotType>>();

        let mut per_container = BTreeMap::<usize, Vec<&FieldSpan>>::new();
        for span in &spans {
            per_container.entry(span.container_index).or_default().push(span);
        }
        for group in per_container.values() {
            let Some(first) = group.first() else {
                continue;
            };
            for (span_id, slot_type) in self
                .lexicon
                .paragraph_expectations(&first.paragraph_text, group)
            {
                debug!(span = %span_id, slot_type = slot_type.as_str(), "paragraph expectation");
                slot_types.insert(span_id, slot_type);
            }
        }

        let anchors = extract_anchors(document, &containers, &spans, &slot_types, &self.patterns);
        let clusters = cluster_anchors(&anchors, &self.roles);
        let constraints = role_constraints(&clusters, &anchors);

        info!(
            containers = containers.len(),
            spans = spans.len(),
            anchors = anchors.len(),
            clusters = clusters.len(),
            "analyzed document"
        );

        Analysis {
            containers,
            spans,
            slot_types,
            anchors,
            clusters,
            constraints,
        }
    }

    pub fn key_index(&self, data: &DataRecord) -> KeyIndex {
        KeyIndex::build(data, &self.lexicon)
    }

    pub fn score(&self, analysis: &Analysis, keys: &KeyIndex) -> (Vec<ResolveItem>, Vec<TypeRejection>) {
        let scorer = self.scorer(keys);
        let mut items = Vec::with_capacity(analysis.anchors.len());
        let mut rejections = Vec::new();

        for anchor in &analysis.anchors {
            let span = anchor.span_id().and_then(|span_id| analysis.span(span_id));
            let scored = scorer.score_anchor(anchor, span);
            rejections.extend(scored.rejections);

            let (context, start) = match (&anchor.target, span) {
                (_, Some(span)) => (span.context(), span.start),
                (AnchorTarget::CheckboxGroup { options }, None) => (
                    anchor.label.clone(),
                    options.first().map(|option| option.start).unwrap_or(0),
                ),
                _ => (anchor.label.clone(), 0),
            };

            items.push(ResolveItem {
                item_id: item_id(anchor).to_string(),
                slot_type: anchor.slot_type,
                label: anchor.label.clone(),
                context,
                section_key: anchor.location.section_key(),
                container_index: anchor.container_index,
                start,
                critical: self.lexicon.is_critical_label(&anchor.label),
                candidates: scored.candidates,
            });
        }

        (items, rejections)
    }

    fn scorer<'a>(&'a self, keys: &'a KeyIndex) -> Scorer<'a> {
        Scorer::new(
            &self.lexicon,
            keys,
            self.config.candidate_cap,
            self.config.checkbox_match_threshold,
        )
    }

    pub fn fill(
        &self,
        document: &Document,
        data: &DataRecord,
        source: Option<&mut dyn SuggestionSource>,
    ) -> Result<FillOutcome, FillError> {
        let analysis = self.analyze(document);
        let keys = self.key_index(data);
        let (items, rejections) = self.score(&analysis, &keys);

        let scorer = self.scorer(&keys);
        let resolver = Resolver::new(&self.config, &self.lexicon, &keys, &scorer);
        let mut resolution = resolver.resolve(items, &analysis.constraints, source);
        resolution.diagnostics.type_rejections = rejections.len();

        let fills = self.plan_fills(&analysis, &resolution, data);
        check_fill_types(&fills, &self.lexicon)?;

        let mut working = document.clone();
        let checkboxes = self.fill_checkboxes(&mut working, &analysis, &resolution, data);
        let tables = fill_tables(&mut working, &analysis, &resolution, data);
        let commit = commit_fills(&mut working, &fills);

        let preview = preview(document, &working, &fills, &commit, &checkboxes, &analysis);
        let anchors = anchor_reports(&analysis, &resolution.items, Some(&resolution.table));
        let unresolved = unresolved_items(&analysis, &resolution);
        let used = resolution.table.used_keys();
        let unused_keys = data
            .keys()
            .filter(|key| !used.contains(key.as_str()))
            .cloned()
            .collect::<Vec<String>>();

        info!(
            filled = commit.filled.len(),
            failed = commit.failed.len(),
            suspicious = commit.suspicious.len(),
            checkboxes = checkboxes.len(),
            tables = tables.len(),
            unresolved = unresolved.len(),
            "fill finished"
        );

        Ok(FillOutcome {
            document: working,
            analysis,
            resolution,
            anchors,
            rejections,
            commit,
            checkboxes,
            tables,
            unresolved,
            unused_keys,
            preview,
        })
    }

    fn plan_fills<'a>(
        &self,
        analysis: &'a Analysis,
        resolution: &Resolution,
        data: &DataRecord,
    ) -> Vec<PlannedFill<'a>> {
        let mut fills = Vec::new();
        for anchor in &analysis.anchors {
            let Some(span) = anchor.span_id().and_then(|span_id| analysis.span(span_id)) else {
                continue;
            };
            let (key, value) = match resolution.table.get(&span.span_id) {
                Some(Assignment::Key { key, .. }) => match data.get(key).and_then(render_value) {
                    Some(value) => (Some(key.clone()), value),
                    None => {
                        warn!(span = %span.span_id, key = %key, "assigned value does not render as text");
                        continue;
                    }
                },
                Some(Assignment::Computed { value, .. }) => (None, value.clone()),
                None => continue,
            };
            fills.push(PlannedFill {
                span,
                slot_type: anchor.slot_type,
                key,
                value,
            });
        }
        fills
    }

    fn fill_checkboxes(
        &self,
        document: &mut Document,
        analysis: &Analysis,
        resolution: &Resolution,
        data: &DataRecord,
    ) -> Vec<CheckboxFill> {
        let mut filled = Vec::new();
        for anchor in &analysis.anchors {
            let AnchorTarget::CheckboxGroup { options } = &anchor.target else {
                continue;
            };
            let Some(key) = resolution.table.key_of(&anchor.anchor_id) else {
                continue;
            };
            let Some(value) = data.get(key).and_then(Value::as_str) else {
                continue;
            };
            let outcome = fill_checkbox_group(
                document,
                options,
                value,
                self.config.checkbox_match_threshold,
            );
            if let CheckboxOutcome::Failed { reason } = &outcome {
                warn!(anchor = %anchor.anchor_id, reason = %reason, "checkbox fill failed");
            }
            filled.push(CheckboxFill {
                anchor_id: anchor.anchor_id.clone(),
                key: key.to_string(),
                outcome,
            });
        }
        filled
    }
}

fn fill_tables(
    document: &mut Document,
    analysis: &Analysis,
    resolution: &Resolution,
    data: &DataRecord,
) -> Vec<TableFill> {
    let mut filled = Vec::new();
    for anchor in &analysis.anchors {
        let AnchorTarget::Table {
            address,
            header,
            first_data_row,
            ..
        } = &anchor.target
        else {
            continue;
        };
        let Some(key) = resolution.table.key_of(&anchor.anchor_id) else {
            continue;
        };
        let Some(value) = data.get(key) else {
            continue;
        };
        let outcome = fill_table(document, address, header, *first_data_row, value);
        if let Some(failure) = &outcome.failure {
            warn!(anchor = %anchor.anchor_id, reason = %failure, "table fill failed");
        }
        filled.push(TableFill {
            anchor_id: anchor.anchor_id.clone(),
            key: key.to_string(),
            outcome,
        });
    }
    filled
}

pub fn anchor_reports(
    analysis: &Analysis,
    items: &[ResolveItem],
    table: Option<&AssignmentTable>,
) -> Vec<AnchorReport> {
    let candidates = items
        .iter()
        .map(|item| (item.item_id.as_str(), &item.candidates))
        .collect::<BTreeMap<&str, &Vec<Candidate>>>();

    analysis
        .anchors
        .iter()
        .map(|anchor| {
            let item_id = item_id(anchor);
            AnchorReport {
                anchor_id: anchor.anchor_id.clone(),
                item_id: item_id.to_string(),
                kind: anchor_kind(anchor),
                label: anchor.label.clone(),
                label_source: anchor.label_source,
                location: anchor.location.to_string(),
                slot_type: anchor.slot_type,
                candidates: candidates.get(item_id).map(|list| list.to_vec()).unwrap_or_default(),
                assignment: table.and_then(|table| table.get(item_id)).cloned(),
            }
        })
        .collect()
}

fn unresolved_items(analysis: &Analysis, resolution: &Resolution) -> Vec<UnresolvedItem> {
    let items = resolution
        .items
        .iter()
        .map(|item| (item.item_id.as_str(), item))
        .collect::<BTreeMap<&str, &ResolveItem>>();

    analysis
        .anchors
        .iter()
        .filter(|anchor| !resolution.table.is_resolved(item_id(anchor)))
        .map(|anchor| {
            let item = items.get(item_id(anchor));
            UnresolvedItem {
                item_id: item_id(anchor).to_string(),
                anchor_id: anchor.anchor_id.clone(),
                kind: anchor_kind(anchor),
                label: anchor.label.clone(),
                location: anchor.location.to_string(),
                slot_type: anchor.slot_type,
                context: item.map(|item| item.context.clone()).unwrap_or_default(),
                best_candidate: item.and_then(|item| item.candidates.first().cloned()),
            }
        })
        .collect()
}

fn preview(
    before: &Document,
    after: &Document,
    fills: &[PlannedFill<'_>],
    commit: &CommitOutcome,
    checkboxes: &[CheckboxFill],
    analysis: &Analysis,
) -> Vec<PreviewEntry> {
    let spans = fills
        .iter()
        .map(|fill| (fill.span.span_id.as_str(), fill.span))
        .collect::<BTreeMap<&str, &FieldSpan>>();

    let mut siblings = BTreeMap::<Location, usize>::new();
    let mut touched = BTreeSet::<Location>::new();
    for filled in &commit.filled {
        let Some(span) = spans.get(filled.span_id.as_str()) else {
            continue;
        };
        *siblings.entry(span.location.clone()).or_default() += filled.sibling_paragraphs;
        touched.insert(span.location.clone());
    }
    for checkbox in checkboxes {
        if !matches!(checkbox.outcome, CheckboxOutcome::Marked { .. }) {
            continue;
        }
        let options = analysis.anchors.iter().find_map(|anchor| match &anchor.target {
            AnchorTarget::CheckboxGroup { options } if anchor.anchor_id == checkbox.anchor_id => {
                Some(options)
            }
            _ => None,
        });
        for option in options.into_iter().flatten() {
            touched.insert(option.location.clone());
        }
    }

    let mut entries = Vec::new();
    for location in &touched {
        let Some(original) = before.paragraph(location) else {
            continue;
        };
        let shift = siblings
            .iter()
            .filter(|(other, _)| {
                other.block_key() == location.block_key()
                    && other.paragraph_idx < location.paragraph_idx
            })
            .map(|(_, count)| count)
            .sum::<usize>();
        let extra = siblings.get(location).copied().unwrap_or(0);

        let lines = (0..=extra)
            .filter_map(|offset| {
                after.paragraph(&Location {
                    paragraph_idx: location.paragraph_idx + shift + offset,
                    ..location.clone()
                })
            })
            .map(|paragraph| paragraph.text())
            .collect::<Vec<String>>();
        let after_text = lines.join("\n");
        let before_text = original.text();
        if after_text != before_text {
            entries.push(PreviewEntry {
                location: location.to_string(),
                before: before_text,
                after: after_text,
            });
        }
    }
    entries
}
