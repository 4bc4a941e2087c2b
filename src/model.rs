use serde::Serialize;

use crate::engine::anchors::{Anchor, AnchorCluster, RoleConstraint};
use crate::engine::commit::{FailedCommit, FilledSpan, SuspiciousFill};
use crate::engine::config::EngineConfig;
use crate::engine::pipeline::{
    AnchorReport, CheckboxFill, PreviewEntry, TableFill, UnresolvedItem,
};
use crate::engine::resolver::{AssignmentTable, ResolverDiagnostics};
use crate::engine::scoring::TypeRejection;
use crate::engine::spans::FieldSpan;
use crate::engine::traverse::TextContainer;
use crate::engine::types::SlotType;

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub report_version: u32,
    pub tool_version: &'static str,
    pub run_id: String,
    pub generated_at: String,
    pub template_path: String,
    pub template_sha256: String,
    pub data_path: String,
    pub data_sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub dry_run: bool,
    pub strict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_source: Option<String>,
    pub config: EngineConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FillCounts {
    pub containers: usize,
    pub spans: usize,
    pub anchors: usize,
    pub clusters: usize,
    pub data_keys: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub filled: usize,
    pub failed: usize,
    pub suspicious: usize,
    pub checkbox_groups: usize,
    pub tables: usize,
    pub type_rejections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FillReport {
    pub metadata: RunMetadata,
    pub counts: FillCounts,
    pub assignments: AssignmentTable,
    pub anchors: Vec<AnchorReport>,
    pub filled: Vec<FilledSpan>,
    pub failed: Vec<FailedCommit>,
    pub checkboxes: Vec<CheckboxFill>,
    pub tables: Vec<TableFill>,
    pub unresolved: Vec<UnresolvedItem>,
    pub suspicious: Vec<SuspiciousFill>,
    pub type_rejections: Vec<TypeRejection>,
    pub diagnostics: ResolverDiagnostics,
    pub unused_keys: Vec<String>,
    pub preview: Vec<PreviewEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanMappingEntry {
    pub span_id: String,
    pub location: String,
    pub raw_text: String,
    pub slot_type: SlotType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectPayload {
    pub template_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<TextContainer>>,
    pub spans: Vec<FieldSpan>,
    pub anchors: Vec<Anchor>,
    pub clusters: Vec<AnchorCluster>,
    pub constraints: Vec<RoleConstraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<AnchorReport>>,
}
