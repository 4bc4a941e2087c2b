use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::document::{Document, Location, TableAddress};
use crate::engine::spans::{BlankKind, BlankPatterns, FieldSpan};
use crate::engine::text::normalize_text;
use crate::engine::traverse::TextContainer;
use crate::engine::types::{SemanticType, SlotType};
use crate::util::stable_digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    SameLine,
    LeftCell,
    Parenthetical,
    PrecedingText,
    Header,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckboxOption {
    pub location: Location,
    pub start: usize,
    pub end: usize,
    pub glyph: String,
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorTarget {
    Placeholder {
        span_id: String,
    },
    CheckboxGroup {
        options: Vec<CheckboxOption>,
    },
    Table {
        address: TableAddress,
        header: Vec<String>,
        first_data_row: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Anchor {
    pub anchor_id: String,
    pub label: String,
    pub label_source: LabelSource,
    pub location: Location,
    pub container_index: usize,
    pub slot_type: SlotType,
    pub target: AnchorTarget,
    #[serde(skip)]
    order: usize,
}

impl Anchor {
    pub fn span_id(&self) -> Option<&str> {
        match &self.target {
            AnchorTarget::Placeholder { span_id } => Some(span_id),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.target, AnchorTarget::Placeholder { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePattern {
    PersonThenOrganization,
    PersonThenRole,
    OrganizationThenDate,
}

impl RolePattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonThenOrganization => "person_then_organization",
            Self::PersonThenRole => "person_then_role",
            Self::OrganizationThenDate => "organization_then_date",
        }
    }

    pub fn expected(self) -> &'static [SemanticType] {
        match self {
            Self::PersonThenOrganization => &[SemanticType::PersonName, SemanticType::OrgName],
            Self::PersonThenRole => &[SemanticType::PersonName, SemanticType::PersonRole],
            Self::OrganizationThenDate => &[SemanticType::OrgName, SemanticType::Date],
        }
    }
}

struct RoleRule {
    pattern: RolePattern,
    combined: Regex,
    lead: Regex,
}

pub struct RolePatterns {
    rules: Vec<RoleRule>,
}

impl RolePatterns {
    pub fn new() -> Result<Self> {
        let rule = |pattern: RolePattern, combined: &str, lead: &str| -> Result<RoleRule> {
            Ok(RoleRule {
                pattern,
                combined: Regex::new(combined)
                    .with_context(|| format!("failed to compile {} regex", pattern.as_str()))?,
                lead: Regex::new(lead)
                    .with_context(|| format!("failed to compile {} lead regex", pattern.as_str()))?,
            })
        };

        Ok(Self {
            rules: vec![
                rule(
                    RolePattern::PersonThenOrganization,
                    r"\bsubsemnat\w*\b.*\b(reprezentant\w*\s+(al|a|ai)|in numele)\b",
                    r"\bsubsemnat\w*\b",
                )?,
                rule(
                    RolePattern::PersonThenRole,
                    r"\b(nume|subsemnat\w*)\b.*\b(functi[ae]\w*|calitate\w*)\b",
                    r"\b(nume|subsemnat\w*)\b",
                )?,
                rule(
                    RolePattern::OrganizationThenDate,
                    r"\b(ofertant\w*|operator\w*|denumire\w*)\b.*\bdata\b",
                    r"\b(ofertant\w*|operator\w*|denumire\w*)\b",
                )?,
            ],
        })
    }

    fn detect(&self, combined: &str) -> Option<&RoleRule> {
        let normalized = normalize_text(combined);
        self.rules
            .iter()
            .find(|rule| rule.combined.is_match(&normalized))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchorCluster {
    pub cluster_id: String,
    pub anchor_ids: Vec<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_pattern: Option<RolePattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleConstraint {
    pub cluster_id: String,
    pub span_id: String,
    pub position: usize,
    pub expected: SlotType,
}

pub fn extract_anchors(
    document: &Document,
    containers: &[TextContainer],
    spans: &[FieldSpan],
    slot_types: &BTreeMap<String, SlotType>,
    patterns: &BlankPatterns,
) -> Vec<Anchor> {
    let mut anchors = table_anchors(document, containers);
    let claimed = anchors
        .iter()
        .filter_map(|anchor| match &anchor.target {
            AnchorTarget::Table { address, .. } => Some(address.clone()),
            _ => None,
        })
        .collect::<BTreeSet<TableAddress>>();

    anchors.extend(checkbox_anchors(containers, patterns));

    for span in spans {
        if span.is_checkbox() {
            continue;
        }
        if span.blank_kind == BlankKind::EmptyCell
            && span
                .location
                .table_address()
                .is_some_and(|address| claimed.contains(&address))
        {
            continue;
        }
        let (label, label_source) = placeholder_label(span, containers);
        anchors.push(Anchor {
            anchor_id: stable_digest(&["placeholder", &span.span_id]),
            label,
            label_source,
            location: span.location.clone(),
            container_index: span.container_index,
            slot_type: slot_types
                .get(&span.span_id)
                .copied()
                .unwrap_or(SemanticType::Unknown),
            target: AnchorTarget::Placeholder {
                span_id: span.span_id.clone(),
            },
            order: span.start,
        });
    }

    anchors.sort_by(|left, right| {
        left.container_index
            .cmp(&right.container_index)
            .then(left.order.cmp(&right.order))
            .then_with(|| left.anchor_id.cmp(&right.anchor_id))
    });
    anchors
}

fn placeholder_label(span: &FieldSpan, containers: &[TextContainer]) -> (String, LabelSource) {
    if span.blank_kind == BlankKind::EmptyCell {
        let left = span.left_context.trim();
        if !left.is_empty() {
            return (left.to_string(), LabelSource::LeftCell);
        }
    }

    let same_line = trim_label(span.local_label());
    if !same_line.is_empty() {
        return (same_line.to_string(), LabelSource::SameLine);
    }

    if let Some(left) = containers
        .get(span.container_index)
        .and_then(|container| container.left_cell_text.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
    {
        return (left.to_string(), LabelSource::LeftCell);
    }

    if let Some(hint) = previous_text(containers, span.container_index).and_then(last_parenthetical)
    {
        return (hint, LabelSource::Parenthetical);
    }

    let trailer = trim_label(span.local_trailer());
    if !trailer.is_empty() {
        return (trailer.to_string(), LabelSource::SameLine);
    }

    (String::new(), LabelSource::Missing)
}

fn trim_label(label: &str) -> &str {
    label.trim_matches(|character: char| {
        character.is_whitespace() || matches!(character, ':' | ',' | ';' | '-' | '.')
    })
}

fn previous_text(containers: &[TextContainer], index: usize) -> Option<String> {
    let current = containers.get(index)?;
    containers[..index]
        .iter()
        .rev()
        .filter(|container| container.location.part == current.location.part)
        .map(TextContainer::text)
        .find(|text| !text.trim().is_empty())
}

fn last_parenthetical(text: String) -> Option<String> {
    let close = text.rfind(')')?;
    let open = text[..close].rfind('(')?;
    let hint = text[open + 1..close].trim();
    (hint.chars().count() >= 3).then(|| hint.to_string())
}

fn checkbox_anchors(containers: &[TextContainer], patterns: &BlankPatterns) -> Vec<Anchor> {
    let mut groups = Vec::<Vec<usize>>::new();
    let mut current = Vec::<usize>::new();
    let mut gap = 0;

    for (index, container) in containers.iter().enumerate() {
        let text = container.text();
        if let Some(&last) = current.last() {
            if containers[last].location.part != container.location.part
                || containers[last].location.section_idx != container.location.section_idx
            {
                groups.push(std::mem::take(&mut current));
                gap = 0;
            }
        }

        if patterns.checkbox().is_match(&text) {
            current.push(index);
            gap = 0;
        } else if !text.trim().is_empty() && !current.is_empty() {
            gap += 1;
            if gap > 1 {
                groups.push(std::mem::take(&mut current));
                gap = 0;
            }
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
        .into_iter()
        .filter_map(|group| checkbox_group_anchor(containers, patterns, &group))
        .collect()
}

fn checkbox_group_anchor(
    containers: &[TextContainer],
    patterns: &BlankPatterns,
    group: &[usize],
) -> Option<Anchor> {
    let first = *group.first()?;
    let mut options = Vec::new();
    for &index in group {
        options.extend(checkbox_options(&containers[index], patterns));
    }
    if options.is_empty() {
        return None;
    }

    let first_text = containers[first].text();
    let prefix = trim_label(&first_text[..options[0].start]);
    let (label, label_source) = if !prefix.is_empty() {
        (prefix.to_string(), LabelSource::SameLine)
    } else if let Some(text) = previous_text(containers, first) {
        (text.trim().to_string(), LabelSource::PrecedingText)
    } else {
        (String::new(), LabelSource::Missing)
    };

    let location = containers[first].location.clone();
    Some(Anchor {
        anchor_id: stable_digest(&["checkbox_group", &location.to_string(), &group.len().to_string()]),
        label,
        label_source,
        location,
        container_index: first,
        slot_type: SemanticType::CheckboxGroup,
        target: AnchorTarget::CheckboxGroup { options },
        order: 0,
    })
}

fn checkbox_options(
    container: &TextContainer,
    patterns: &BlankPatterns,
) -> Vec<CheckboxOption> {
    let text = container.text();
    let glyphs = patterns
        .checkbox()
        .find_iter(&text)
        .map(|matched| matched.range())
        .collect::<Vec<_>>();

    glyphs
        .iter()
        .enumerate()
        .map(|(position, range)| {
            let next = glyphs
                .get(position + 1)
                .map(|next| next.start)
                .unwrap_or(text.len());
            let mut option = trim_label(&text[range.end..next]).to_string();
            if option.is_empty() {
                let previous = position
                    .checked_sub(1)
                    .map(|previous| glyphs[previous].end)
                    .unwrap_or(0);
                option = trim_label(&text[previous..range.start]).to_string();
            }
            let glyph = text[range.clone()].to_string();
            CheckboxOption {
                location: container.location.clone(),
                start: range.start,
                end: range.end,
                checked: is_marked_glyph(&glyph),
                glyph,
                text: option,
            }
        })
        .collect()
}

pub fn is_marked_glyph(glyph: &str) -> bool {
    matches!(glyph, "|x|" | "|X|" | "[x]" | "[X]" | "☑" | "☒")
}

fn table_anchors(document: &Document, containers: &[TextContainer]) -> Vec<Anchor> {
    let mut seen = BTreeSet::new();
    let mut anchors = Vec::new();

    for (index, container) in containers.iter().enumerate() {
        let Some(address) = container.location.table_address() else {
            continue;
        };
        if !seen.insert(address.clone()) {
            continue;
        }
        let Some(table) = document.table(&address) else {
            continue;
        };
        let Some(header_row) = table.rows.first() else {
            continue;
        };
        let header = header_row
            .cells
            .iter()
            .map(|cell| cell.text())
            .collect::<Vec<String>>();
        if header.iter().filter(|text| !text.is_empty()).count() < 2 {
            continue;
        }
        let Some(first_data_row) = table
            .rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.is_empty())
            .map(|(row, _)| row)
        else {
            continue;
        };

        let preceding = containers[..index]
            .iter()
            .rev()
            .filter(|candidate| {
                candidate.location.part == container.location.part
                    && candidate.location.table_address().as_ref() != Some(&address)
            })
            .map(TextContainer::text)
            .find(|text| !text.trim().is_empty());
        let (label, label_source) = match preceding {
            Some(text) => (text.trim().to_string(), LabelSource::PrecedingText),
            None => (header.join(" "), LabelSource::Header),
        };

        let table_location = Location {
            paragraph_idx: 0,
            cells: container.location.cells[..address.cells.len()].to_vec(),
            ..container.location.clone()
        };
        anchors.push(Anchor {
            anchor_id: stable_digest(&["table", &table_location.to_string(), &address.table_idx.to_string()]),
            label,
            label_source,
            location: container.location.clone(),
            container_index: index,
            slot_type: SemanticType::Table,
            target: AnchorTarget::Table {
                address,
                header,
                first_data_row,
            },
            order: 0,
        });
    }

    anchors
}

pub fn cluster_anchors(anchors: &[Anchor], roles: &RolePatterns) -> Vec<AnchorCluster> {
    let mut groups = Vec::<Vec<&Anchor>>::new();

    for anchor in anchors {
        let joins = groups
            .last()
            .and_then(|group| group.last())
            .is_some_and(|previous| {
                previous.location.section_key() == anchor.location.section_key()
                    && (anchor.location.in_table()
                        || anchor
                            .location
                            .paragraph_idx
                            .abs_diff(previous.location.paragraph_idx)
                            <= 2)
            });
        if joins {
            if let Some(group) = groups.last_mut() {
                group.push(anchor);
                continue;
            }
        }
        groups.push(vec![anchor]);
    }

    groups
        .into_iter()
        .map(|group| {
            let anchor_ids = group
                .iter()
                .map(|anchor| anchor.anchor_id.clone())
                .collect::<Vec<String>>();
            let text = group
                .iter()
                .map(|anchor| anchor.label.as_str())
                .filter(|label| !label.is_empty())
                .collect::<Vec<&str>>()
                .join(" ");
            let id_refs = anchor_ids.iter().map(String::as_str).collect::<Vec<&str>>();
            let cluster_id = stable_digest(&id_refs);

            let (role_pattern, lead) = match roles.detect(&text) {
                Some(rule) => {
                    let lead = group.iter().position(|anchor| {
                        anchor.is_placeholder() && rule.lead.is_match(&normalize_text(&anchor.label))
                    });
                    match lead {
                        Some(lead) => (Some(rule.pattern), Some(lead)),
                        None => (None, None),
                    }
                }
                None => (None, None),
            };

            AnchorCluster {
                cluster_id,
                anchor_ids,
                text,
                role_pattern,
                lead,
            }
        })
        .collect()
}

pub fn role_constraints(clusters: &[AnchorCluster], anchors: &[Anchor]) -> Vec<RoleConstraint> {
    let by_id = anchors
        .iter()
        .map(|anchor| (anchor.anchor_id.as_str(), anchor))
        .collect::<BTreeMap<&str, &Anchor>>();

    let mut constraints = Vec::new();
    for cluster in clusters {
        let (Some(pattern), Some(lead)) = (cluster.role_pattern, cluster.lead) else {
            continue;
        };
        let positioned = cluster.anchor_ids[lead..]
            .iter()
            .filter_map(|anchor_id| by_id.get(anchor_id.as_str()))
            .filter_map(|anchor| anchor.span_id())
            .zip(pattern.expected().iter().copied());
        for (position, (span_id, expected)) in positioned.enumerate() {
            constraints.push(RoleConstraint {
                cluster_id: cluster.cluster_id.clone(),
                span_id: span_id.to_string(),
                position,
                expected,
            });
        }
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spans::extract_field_spans;
    use crate::engine::traverse::traverse;

    struct Fixture {
        document: Document,
        containers: Vec<TextContainer>,
        spans: Vec<FieldSpan>,
        anchors: Vec<Anchor>,
    }

    fn fixture(raw: serde_json::Value) -> Fixture {
        let document: Document = serde_json::from_value(raw).expect("fixture document");
        let containers = traverse(&document);
        let patterns = BlankPatterns::new().expect("patterns compile");
        let spans = extract_field_spans(&containers, &patterns, 80);
        let anchors = extract_anchors(&document, &containers, &spans, &BTreeMap::new(), &patterns);
        Fixture {
            document,
            containers,
            spans,
            anchors,
        }
    }

    fn paragraph(text: &str) -> serde_json::Value {
        serde_json::json!({"paragraph": {"runs": [{"text": text}]}})
    }

    #[test]
    fn placeholder_labels_fall_back_to_parenthetical_hints() {
        let fixture = fixture(serde_json::json!({"body": [
            paragraph("Subsemnatul ________"),
            paragraph("(denumirea operatorului economic)"),
            paragraph("________")
        ]}));

        let labels = fixture
            .anchors
            .iter()
            .map(|anchor| (anchor.label.as_str(), anchor.label_source))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                ("Subsemnatul", LabelSource::SameLine),
                ("denumirea operatorului economic", LabelSource::Parenthetical),
            ]
        );
        assert_eq!(fixture.spans.len(), 2);
    }

    #[test]
    fn checkbox_groups_tolerate_one_separator_line() {
        let fixture = fixture(serde_json::json!({"body": [
            paragraph("Regim TVA"),
            paragraph("|_| Platitor de TVA"),
            paragraph("sau"),
            paragraph("|_| Neplatitor de TVA"),
            paragraph("Alt text"),
            paragraph("Alt paragraf"),
            paragraph("[ ] Separat")
        ]}));

        let groups = fixture
            .anchors
            .iter()
            .filter_map(|anchor| match &anchor.target {
                AnchorTarget::CheckboxGroup { options } => Some((anchor.label.clone(), options.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Regim TVA");
        let texts = groups[0]
            .1
            .iter()
            .map(|option| option.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["Platitor de TVA", "Neplatitor de TVA"]);
        assert_eq!(groups[1].0, "Alt paragraf");
        assert!(!groups[1].1[0].checked);
    }

    #[test]
    fn fillable_tables_claim_their_empty_cells() {
        let fixture = fixture(serde_json::json!({"body": [
            paragraph("Lista servicii"),
            {"table": {"rows": [
                {"cells": [
                    {"blocks": [paragraph("Nr")]},
                    {"blocks": [paragraph("Denumire")]}
                ]},
                {"cells": [
                    {"blocks": [{"paragraph": {"runs": []}}]},
                    {"blocks": [{"paragraph": {"runs": []}}]}
                ]}
            ]}}
        ]}));

        assert_eq!(fixture.anchors.len(), 1);
        let anchor = &fixture.anchors[0];
        assert_eq!(anchor.label, "Lista servicii");
        assert_eq!(anchor.slot_type, SemanticType::Table);
        match &anchor.target {
            AnchorTarget::Table {
                header,
                first_data_row,
                address,
                ..
            } => {
                assert_eq!(header, &vec!["Nr".to_string(), "Denumire".to_string()]);
                assert_eq!(*first_data_row, 1);
                assert!(fixture.document.table(address).is_some());
            }
            other => panic!("expected table anchor, got {other:?}"),
        }
        assert_eq!(
            fixture
                .spans
                .iter()
                .filter(|span| span.blank_kind == BlankKind::EmptyCell)
                .count(),
            2
        );
        assert!(fixture.containers.len() >= 4);
    }

    #[test]
    fn person_then_organization_cluster_yields_positional_constraints() {
        let fixture = fixture(serde_json::json!({"body": [
            paragraph("Subsemnatul ________, reprezentant al ________"),
            paragraph("Text fara legatura"),
            paragraph("Text fara legatura"),
            paragraph("Text fara legatura"),
            paragraph("Observatii ________")
        ]}));
        let roles = RolePatterns::new().expect("role patterns compile");
        let clusters = cluster_anchors(&fixture.anchors, &roles);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].role_pattern, Some(RolePattern::PersonThenOrganization));
        assert_eq!(clusters[1].role_pattern, None);

        let constraints = role_constraints(&clusters, &fixture.anchors);
        let expected = constraints
            .iter()
            .map(|constraint| (constraint.span_id.as_str(), constraint.expected))
            .collect::<Vec<_>>();
        assert_eq!(
            expected,
            vec![
                (fixture.spans[0].span_id.as_str(), SemanticType::PersonName),
                (fixture.spans[1].span_id.as_str(), SemanticType::OrgName),
            ]
        );
    }
}
