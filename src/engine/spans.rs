use std::ops::Range;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::document::Location;
use crate::engine::text::{first_chars, last_chars};
use crate::engine::traverse::TextContainer;
use crate::util::stable_digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankKind {
    DateTriple,
    Underscore,
    Dots,
    Ellipsis,
    Checkbox,
    EmptyCell,
}

impl BlankKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DateTriple => "date_triple",
            Self::Underscore => "underscore",
            Self::Dots => "dots",
            Self::Ellipsis => "ellipsis",
            Self::Checkbox => "checkbox",
            Self::EmptyCell => "empty_cell",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpan {
    pub span_id: String,
    pub container_index: usize,
    pub location: Location,
    pub span_index: usize,
    // `start == end == 0` only for `EmptyCell`, which stands for the whole cell.
    pub start: usize,
    pub end: usize,
    pub blank_kind: BlankKind,
    pub raw_text: String,
    pub left_context: String,
    pub right_context: String,
    pub paragraph_text: String,
}

impl FieldSpan {
    pub fn context(&self) -> String {
        format!("{} {}", self.left_context, self.right_context)
    }

    pub fn local_label(&self) -> &str {
        let tail = self
            .left_context
            .rsplit(is_label_break)
            .next()
            .unwrap_or_default();
        let tail = tail.rsplit("...").next().unwrap_or_default();
        tail.trim()
    }

    pub fn local_trailer(&self) -> &str {
        let head = self
            .right_context
            .split(is_label_break)
            .next()
            .unwrap_or_default();
        let head = head.split("...").next().unwrap_or_default();
        head.trim()
    }

    pub fn is_checkbox(&self) -> bool {
        self.blank_kind == BlankKind::Checkbox
    }
}

fn is_label_break(character: char) -> bool {
    matches!(character, '_' | '\n' | '…')
}

pub struct BlankPatterns {
    date_triple: Regex,
    checkbox: Regex,
    underscores: Regex,
    dots: Regex,
    ellipsis: Regex,
}

impl BlankPatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            date_triple: Regex::new(r"_{3,}\s*[/.\-]\s*_{3,}\s*[/.\-]\s*_{3,}")
                .context("failed to compile date placeholder regex")?,
            checkbox: Regex::new(r"\|_\||\|[xX]\||\[\s\]|\[[xX]\]|[☐☑☒□]")
                .context("failed to compile checkbox regex")?,
            underscores: Regex::new(r"_{3,}").context("failed to compile underscore regex")?,
            dots: Regex::new(r"\.{3,}").context("failed to compile dot-run regex")?,
            ellipsis: Regex::new(r"…{2,}").context("failed to compile ellipsis regex")?,
        })
    }

    pub fn checkbox(&self) -> &Regex {
        &self.checkbox
    }

    pub fn find_blanks(&self, text: &str) -> Vec<(Range<usize>, BlankKind)> {
        let mut found = Vec::<(Range<usize>, BlankKind)>::new();
        let ordered = [
            (&self.date_triple, BlankKind::DateTriple),
            (&self.checkbox, BlankKind::Checkbox),
            (&self.underscores, BlankKind::Underscore),
            (&self.dots, BlankKind::Dots),
            (&self.ellipsis, BlankKind::Ellipsis),
        ];

        for (pattern, kind) in ordered {
            for matched in pattern.find_iter(text) {
                let range = matched.range();
                let overlaps = found
                    .iter()
                    .any(|(taken, _)| taken.start < range.end && range.start < taken.end);
                if !overlaps {
                    found.push((range, kind));
                }
            }
        }

        found.sort_by_key(|(range, _)| (range.start, range.end));
        found
    }
}

pub fn extract_field_spans(
    containers: &[TextContainer],
    patterns: &BlankPatterns,
    window: usize,
) -> Vec<FieldSpan> {
    let mut spans = Vec::new();

    for (container_index, container) in containers.iter().enumerate() {
        let text = container.text();

        if text.trim().is_empty() {
            let declared_empty = container
                .declared_text
                .as_deref()
                .map(|value| value.trim().is_empty())
                .unwrap_or(true);
            if container.cell_empty
                && declared_empty
                && container.location.paragraph_idx == 0
            {
                spans.push(empty_cell_span(container_index, container));
            }
            continue;
        }

        for (span_index, (range, kind)) in patterns.find_blanks(&text).into_iter().enumerate() {
            let left_context = last_chars(&text[..range.start], window).to_string();
            let right_context = first_chars(&text[range.end..], window).to_string();
            let raw_text = text[range.clone()].to_string();
            let span_id = stable_digest(&[
                &container.location.to_string(),
                &range.start.to_string(),
                &left_context,
                &right_context,
                kind.as_str(),
                &raw_text,
            ]);

            spans.push(FieldSpan {
                span_id,
                container_index,
                location: container.location.clone(),
                span_index,
                start: range.start,
                end: range.end,
                blank_kind: kind,
                raw_text,
                left_context,
                right_context,
                paragraph_text: text.clone(),
            });
        }
    }

    spans
}

fn empty_cell_span(container_index: usize, container: &TextContainer) -> FieldSpan {
    let left_context = container.left_cell_text.clone().unwrap_or_default();
    let span_id = stable_digest(&[
        &container.location.to_string(),
        "0",
        &left_context,
        "",
        BlankKind::EmptyCell.as_str(),
        "",
    ]);
    FieldSpan {
        span_id,
        container_index,
        location: container.location.clone(),
        span_index: 0,
        start: 0,
        end: 0,
        blank_kind: BlankKind::EmptyCell,
        raw_text: String::new(),
        left_context,
        right_context: String::new(),
        paragraph_text: String::new(),
    }
}
