use std::collections::BTreeMap;
use std::ops::Range;

use serde::Serialize;
use tracing::{debug, warn};

use crate::document::{Document, Location, Paragraph, Run};
use crate::engine::errors::FillError;
use crate::engine::spans::{BlankKind, FieldSpan};
use crate::engine::types::{Lexicon, SemanticType, SlotType, is_date, is_money};

pub fn replace_span(
    paragraph: &mut Paragraph,
    start: usize,
    end: usize,
    replacement: &str,
) -> Result<(), FillError> {
    let bounds = run_bounds(&paragraph.runs);
    let total = bounds.last().map(|range| range.end).unwrap_or(0);
    let structural = |reason: String| FillError::Structural {
        location: "paragraph".to_string(),
        reason,
    };

    if start >= end {
        return Err(structural(format!("empty span {start}..{end}")));
    }
    if end > total {
        return Err(structural(format!("span {start}..{end} exceeds text length {total}")));
    }

    let start_run = bounds
        .iter()
        .position(|range| range.start <= start && start < range.end)
        .ok_or_else(|| structural(format!("no run owns offset {start}")))?;
    let end_run = bounds
        .iter()
        .position(|range| range.start < end && end <= range.end)
        .ok_or_else(|| structural(format!("no run owns offset {}", end - 1)))?;

    let start_local = start - bounds[start_run].start;
    let end_local = end - bounds[end_run].start;
    let start_text = &paragraph.runs[start_run].text;
    let end_text = &paragraph.runs[end_run].text;
    if !start_text.is_char_boundary(start_local) || !end_text.is_char_boundary(end_local) {
        return Err(structural(format!("span {start}..{end} splits a character")));
    }

    let prefix = start_text[..start_local].to_string();
    let suffix = end_text[end_local..].to_string();

    if start_run == end_run {
        paragraph.runs[start_run].text = format!("{prefix}{replacement}{suffix}");
        return Ok(());
    }

    paragraph.runs[start_run].text = format!("{prefix}{replacement}");
    for run in &mut paragraph.runs[start_run + 1..end_run] {
        run.text.clear();
    }
    paragraph.runs[end_run].text = suffix;
    Ok(())
}

fn run_bounds(runs: &[Run]) -> Vec<Range<usize>> {
    let mut cursor = 0;
    runs.iter()
        .map(|run| {
            let start = cursor;
            cursor += run.text.len();
            start..cursor
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct PlannedFill<'a> {
    pub span: &'a FieldSpan,
    pub slot_type: SlotType,
    pub key: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledSpan {
    pub span_id: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
    pub sibling_paragraphs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCommit {
    pub span_id: String,
    pub location: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousFill {
    pub span_id: String,
    pub location: String,
    pub placeholder: String,
    pub text_after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitOutcome {
    pub filled: Vec<FilledSpan>,
    pub failed: Vec<FailedCommit>,
    pub suspicious: Vec<SuspiciousFill>,
}

pub fn check_fill_types(fills: &[PlannedFill<'_>], lexicon: &Lexicon) -> Result<(), FillError> {
    for fill in fills {
        let value = serde_json::Value::String(fill.value.clone());
        let mismatch = match fill.slot_type {
            SemanticType::DurationDays => is_date(&value),
            SemanticType::PersonName => {
                is_money(&value) && !lexicon.value_matches_type(&value, SemanticType::PersonName)
            }
            _ => false,
        };
        if mismatch {
            return Err(FillError::TypeMismatch {
                span_id: fill.span.span_id.clone(),
                location: fill.span.location.to_string(),
                key: fill.key.clone().unwrap_or_default(),
                value: fill.value.clone(),
                slot_type: fill.slot_type.as_str(),
            });
        }
    }
    Ok(())
}

pub fn commit_fills(document: &mut Document, fills: &[PlannedFill<'_>]) -> CommitOutcome {
    let mut by_location = BTreeMap::<&Location, Vec<&PlannedFill<'_>>>::new();
    for fill in fills {
        by_location.entry(&fill.span.location).or_default().push(fill);
    }

    let mut outcome = CommitOutcome::default();
    let mut siblings = Vec::<(Location, Vec<Paragraph>)>::new();

    for (location, mut group) in by_location {
        // Highest offset first: a replacement only shifts text after it.
        group.sort_by(|left, right| {
            right
                .span
                .start
                .cmp(&left.span.start)
                .then_with(|| left.span.span_id.cmp(&right.span.span_id))
        });

        let empty_cell = group
            .iter()
            .any(|fill| fill.span.blank_kind == BlankKind::EmptyCell);
        let paragraph = if empty_cell {
            document.cell_paragraph_mut(location)
        } else {
            document.paragraph_mut(location)
        };
        let Some(paragraph) = paragraph else {
            for fill in group {
                outcome.failed.push(FailedCommit {
                    span_id: fill.span.span_id.clone(),
                    location: location.to_string(),
                    reason: "paragraph not found".to_string(),
                });
            }
            continue;
        };

        let original = paragraph.text();
        let mut applied = Vec::<&PlannedFill<'_>>::new();

        for fill in group {
            let span = fill.span;
            let result = if span.blank_kind == BlankKind::EmptyCell {
                write_empty_cell(paragraph, &fill.value);
                Ok(0)
            } else {
                apply_fill(paragraph, fill, &original, location, &mut siblings)
            };

            match result {
                Ok(sibling_paragraphs) => {
                    debug!(span = %span.span_id, location = %location, "filled span");
                    outcome.filled.push(FilledSpan {
                        span_id: span.span_id.clone(),
                        location: location.to_string(),
                        key: fill.key.clone(),
                        value: fill.value.clone(),
                        sibling_paragraphs,
                    });
                    applied.push(fill);
                }
                Err(err) => {
                    warn!(span = %span.span_id, location = %location, error = %err, "commit failed");
                    outcome.failed.push(FailedCommit {
                        span_id: span.span_id.clone(),
                        location: location.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        outcome
            .suspicious
            .extend(suspicious_fills(&original, &paragraph.text(), location, &applied));
    }

    // Later locations first so pending insertions never shift an index that
    // is still to be used.
    siblings.sort_by(|left, right| right.0.cmp(&left.0));
    for (location, paragraphs) in siblings {
        if !document.insert_paragraphs_after(&location, paragraphs) {
            warn!(location = %location, "could not insert sibling paragraphs");
        }
    }

    outcome
}

fn write_empty_cell(paragraph: &mut Paragraph, value: &str) {
    if paragraph.runs.is_empty() {
        paragraph.runs.push(Run::default());
    }
    for (index, run) in paragraph.runs.iter_mut().enumerate() {
        if index == 0 {
            run.text = value.to_string();
        } else {
            run.text.clear();
        }
    }
}

fn apply_fill(
    paragraph: &mut Paragraph,
    fill: &PlannedFill<'_>,
    original: &str,
    location: &Location,
    siblings: &mut Vec<(Location, Vec<Paragraph>)>,
) -> Result<usize, FillError> {
    let span = fill.span;
    let current = paragraph.text();
    if current.get(span.start..span.end) != Some(span.raw_text.as_str()) {
        return Err(FillError::Structural {
            location: location.to_string(),
            reason: format!("text at {}..{} no longer matches the placeholder", span.start, span.end),
        });
    }

    let lines = fill.value.split('\n').collect::<Vec<&str>>();
    let whole_paragraph = original.trim() == span.raw_text.trim();
    if lines.len() > 1 && whole_paragraph {
        replace_span(paragraph, span.start, span.end, lines[0]).map_err(|err| locate(err, location))?;
        let extra = lines[1..]
            .iter()
            .map(|line| paragraph.styled_sibling(line))
            .collect::<Vec<Paragraph>>();
        let count = extra.len();
        siblings.push((location.clone(), extra));
        return Ok(count);
    }

    replace_span(paragraph, span.start, span.end, &fill.value).map_err(|err| locate(err, location))?;
    Ok(0)
}

fn locate(err: FillError, location: &Location) -> FillError {
    match err {
        FillError::Structural { reason, .. } => FillError::Structural {
            location: location.to_string(),
            reason,
        },
        other => other,
    }
}

fn suspicious_fills(
    original: &str,
    after: &str,
    location: &Location,
    applied: &[&PlannedFill<'_>],
) -> Vec<SuspiciousFill> {
    let mut per_placeholder = BTreeMap::<&str, Vec<&PlannedFill<'_>>>::new();
    for fill in applied {
        if fill.span.raw_text.is_empty() {
            continue;
        }
        per_placeholder
            .entry(fill.span.raw_text.as_str())
            .or_default()
            .push(fill);
    }

    let mut flagged = Vec::new();
    for (placeholder, fills) in per_placeholder {
        let expected = original.matches(placeholder).count().saturating_sub(fills.len());
        if after.matches(placeholder).count() <= expected {
            continue;
        }
        for fill in fills {
            warn!(span = %fill.span.span_id, location = %location, "placeholder still present after fill");
            flagged.push(SuspiciousFill {
                span_id: fill.span.span_id.clone(),
                location: location.to_string(),
                placeholder: placeholder.to_string(),
                text_after: after.to_string(),
            });
        }
    }
    flagged
}
