use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::engine::anchors::{Anchor, AnchorTarget};
use crate::engine::data::{DataRecord, is_record_list};
use crate::engine::inference::Suggestion;
use crate::engine::spans::FieldSpan;
use crate::engine::text::{jaccard, normalize_text, token_set_ratio, tokens};
use crate::engine::types::{KeyType, Lexicon, SemanticType, SlotType, Tag, compatible};

const FUZZY_WEIGHT: f64 = 0.55;
const JACCARD_WEIGHT: f64 = 0.45;
const TAG_OVERLAP_BONUS: f64 = 0.10;
const EXACT_TYPE_BONUS: f64 = 0.25;
const COMPATIBLE_TYPE_BONUS: f64 = 0.10;
const HEADER_OVERLAP_BONUS: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Local,
    Suggested,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub key: String,
    pub score: f64,
    pub key_type: KeyType,
    pub sources: BTreeSet<CandidateSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion_confidence: Option<f64>,
}

impl Candidate {
    pub fn is_suggested(&self) -> bool {
        self.sources.contains(&CandidateSource::Suggested)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeRejection {
    pub target_id: String,
    pub key: String,
    pub slot_type: SlotType,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Scored {
    pub candidates: Vec<Candidate>,
    pub rejections: Vec<TypeRejection>,
}

#[derive(Debug, Clone)]
pub struct KeyProfile {
    pub key: String,
    pub tokens: Vec<String>,
    pub key_type: KeyType,
    pub tags: Vec<Tag>,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    profiles: Vec<KeyProfile>,
}

impl KeyIndex {
    pub fn build(data: &DataRecord, lexicon: &Lexicon) -> Self {
        let profiles = data
            .entries()
            .map(|(key, value)| KeyProfile {
                key: key.clone(),
                tokens: tokens(key),
                key_type: key_type(lexicon, key, value),
                tags: lexicon.tags(key),
                value: value.clone(),
            })
            .collect();
        Self { profiles }
    }

    pub fn get(&self, key: &str) -> Option<&KeyProfile> {
        self.profiles
            .binary_search_by(|profile| profile.key.as_str().cmp(key))
            .ok()
            .map(|index| &self.profiles[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }
}

fn key_type(lexicon: &Lexicon, key: &str, value: &Value) -> KeyType {
    match (is_record_list(value), lexicon.infer_key_type(key)) {
        (true, _) => SemanticType::Table,
        (false, SemanticType::Table) => SemanticType::Text,
        (false, inferred) => inferred,
    }
}

struct Target<'a> {
    id: &'a str,
    query: String,
    boost_context: String,
    slot_type: SlotType,
}

pub struct Scorer<'a> {
    lexicon: &'a Lexicon,
    keys: &'a KeyIndex,
    cap: usize,
    checkbox_threshold: f64,
}

impl<'a> Scorer<'a> {
    pub fn new(lexicon: &'a Lexicon, keys: &'a KeyIndex, cap: usize, checkbox_threshold: f64) -> Self {
        Self {
            lexicon,
            keys,
            cap,
            checkbox_threshold,
        }
    }

    pub fn score_span(&self, span: &FieldSpan, slot_type: SlotType) -> Scored {
        let context = span.context();
        let target = Target {
            id: &span.span_id,
            query: context.clone(),
            boost_context: context,
            slot_type,
        };
        self.score_target(&target, |_| Some(0.0))
    }

    pub fn score_anchor(&self, anchor: &Anchor, span: Option<&FieldSpan>) -> Scored {
        match &anchor.target {
            AnchorTarget::Placeholder { .. } => match span {
                Some(span) => self.score_span(span, anchor.slot_type),
                None => Scored::default(),
            },
            AnchorTarget::CheckboxGroup { options } => {
                let target = Target {
                    id: &anchor.anchor_id,
                    query: anchor.label.clone(),
                    boost_context: anchor.label.clone(),
                    slot_type: SemanticType::CheckboxGroup,
                };
                self.score_target(&target, |profile| {
                    let value = profile.value.as_str()?;
                    options
                        .iter()
                        .any(|option| token_set_ratio(value, &option.text) >= self.checkbox_threshold)
                        .then_some(0.0)
                })
            }
            AnchorTarget::Table { header, .. } => {
                let target = Target {
                    id: &anchor.anchor_id,
                    query: anchor.label.clone(),
                    boost_context: anchor.label.clone(),
                    slot_type: SemanticType::Table,
                };
                self.score_target(&target, |profile| {
                    Some(HEADER_OVERLAP_BONUS * header_overlap(header, &profile.value))
                })
            }
        }
    }

    fn admits(&self, slot_type: SlotType, profile: &KeyProfile) -> Admission {
        let record_list = is_record_list(&profile.value);
        if record_list != (slot_type == SemanticType::Table) {
            return Admission::Excluded;
        }
        if !compatible(slot_type, profile.key_type) {
            return Admission::Excluded;
        }
        if !self.lexicon.value_matches_type(&profile.value, slot_type) {
            return Admission::ValueMismatch;
        }
        Admission::Admitted
    }

    fn score_target(
        &self,
        target: &Target<'_>,
        extra: impl Fn(&KeyProfile) -> Option<f64>,
    ) -> Scored {
        let query_tokens = tokens(&target.query);
        let query_tags = self.lexicon.tags(&target.query);
        let mut scored = Scored::default();

        for profile in self.keys.iter() {
            match self.admits(target.slot_type, profile) {
                Admission::Excluded => continue,
                Admission::ValueMismatch => {
                    scored.rejections.push(TypeRejection {
                        target_id: target.id.to_string(),
                        key: profile.key.clone(),
                        slot_type: target.slot_type,
                        key_type: profile.key_type,
                    });
                    continue;
                }
                Admission::Admitted => {}
            }

            let overlap = tags_overlap(&query_tags, &profile.tags);
            if overlap == Some(false) {
                continue;
            }
            let Some(extra_bonus) = extra(profile) else {
                continue;
            };

            let mut score = FUZZY_WEIGHT * token_set_ratio(&target.query, &profile.key)
                + JACCARD_WEIGHT * jaccard(&query_tokens, &profile.tokens);
            if overlap == Some(true) {
                score += TAG_OVERLAP_BONUS;
            }
            score += type_bonus(target.slot_type, profile.key_type);
            score += self.lexicon.context_boost(&target.boost_context, &profile.key);
            score += extra_bonus;

            if score <= 0.0 {
                continue;
            }
            scored.candidates.push(Candidate {
                key: profile.key.clone(),
                score,
                key_type: profile.key_type,
                sources: BTreeSet::from([CandidateSource::Local]),
                suggestion_confidence: None,
            });
        }

        rank(&mut scored.candidates, self.cap);
        debug!(
            target = target.id,
            slot_type = target.slot_type.as_str(),
            candidates = scored.candidates.len(),
            top = scored.candidates.first().map(|candidate| candidate.key.as_str()).unwrap_or(""),
            "scored target"
        );
        scored
    }

    pub fn merge_suggestions(
        &self,
        candidates: &mut Vec<Candidate>,
        slot_type: SlotType,
        suggestions: &[Suggestion],
        weight: f64,
        floor: f64,
    ) -> usize {
        let mut merged = 0;
        for suggestion in suggestions {
            if suggestion.confidence < floor {
                continue;
            }
            let Some(profile) = self.keys.get(&suggestion.key) else {
                continue;
            };
            if self.admits(slot_type, profile) != Admission::Admitted {
                continue;
            }

            if let Some(existing) = candidates
                .iter_mut()
                .find(|candidate| candidate.key == suggestion.key)
            {
                existing.sources.insert(CandidateSource::Suggested);
                existing.suggestion_confidence = Some(suggestion.confidence);
            } else {
                candidates.push(Candidate {
                    key: profile.key.clone(),
                    score: weight * suggestion.confidence,
                    key_type: profile.key_type,
                    sources: BTreeSet::from([CandidateSource::Suggested]),
                    suggestion_confidence: Some(suggestion.confidence),
                });
            }
            merged += 1;
        }
        rank(candidates, self.cap);
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Admitted,
    ValueMismatch,
    Excluded,
}

fn tags_overlap(left: &[Tag], right: &[Tag]) -> Option<bool> {
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some(left.iter().any(|tag| right.contains(tag)))
}

fn type_bonus(slot_type: SlotType, key_type: KeyType) -> f64 {
    if slot_type == key_type && slot_type.is_informative() {
        EXACT_TYPE_BONUS
    } else if slot_type.is_informative() && key_type.is_informative() {
        COMPATIBLE_TYPE_BONUS
    } else {
        0.0
    }
}

fn header_overlap(header: &[String], value: &Value) -> f64 {
    let Value::Array(rows) = value else {
        return 0.0;
    };
    let fields = rows
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|row| row.keys())
        .map(|field| normalize_text(field))
        .collect::<BTreeSet<String>>();
    let named = header
        .iter()
        .map(|cell| normalize_text(cell))
        .filter(|cell| !cell.is_empty())
        .collect::<Vec<String>>();
    if named.is_empty() {
        return 0.0;
    }
    let matched = named
        .iter()
        .filter(|cell| {
            fields
                .iter()
                .any(|field| field == *cell || field.contains(cell.as_str()) || cell.contains(field.as_str()))
        })
        .count();
    matched as f64 / named.len() as f64
}

pub fn rank(candidates: &mut Vec<Candidate>, cap: usize) {
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.key.cmp(&right.key))
    });
    candidates.truncate(cap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Location, Part};
    use crate::engine::spans::BlankKind;
    use serde_json::json;

    fn span(left: &str, right: &str) -> FieldSpan {
        FieldSpan {
            span_id: format!("{left}|{right}"),
            container_index: 0,
            location: Location {
                part: Part::Body,
                section_idx: None,
                cells: Vec::new(),
                paragraph_idx: 0,
            },
            span_index: 0,
            start: left.len(),
            end: left.len() + 4,
            blank_kind: BlankKind::Underscore,
            raw_text: "____".to_string(),
            left_context: left.to_string(),
            right_context: right.to_string(),
            paragraph_text: format!("{left}____{right}"),
        }
    }

    fn index(lexicon: &Lexicon, data: serde_json::Value) -> KeyIndex {
        KeyIndex::build(&DataRecord::from_json(data).expect("data record"), lexicon)
    }

    #[test]
    fn incompatible_key_types_are_excluded() {
        let lexicon = Lexicon::new().expect("lexicon");
        let keys = index(
            &lexicon,
            json!({"Nume reprezentant": "Ion Popescu", "Denumire operator": "ACME SRL"}),
        );
        let scorer = Scorer::new(&lexicon, &keys, 8, 0.7);
        let target = span("Subsemnatul ", ", reprezentant al ____");

        let scored = scorer.score_span(&target, SemanticType::PersonName);
        let keys = scored
            .candidates
            .iter()
            .map(|candidate| candidate.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["Nume reprezentant"]);
        assert!(scored.candidates[0].score > 0.6);
    }

    #[test]
    fn value_format_failures_are_recorded_as_rejections() {
        let lexicon = Lexicon::new().expect("lexicon");
        let keys = index(&lexicon, json!({"Durata": "2024-05-01"}));
        let scorer = Scorer::new(&lexicon, &keys, 8, 0.7);

        let scored = scorer.score_span(&span("pe o durata de ", " zile"), SemanticType::DurationDays);
        assert!(scored.candidates.is_empty());
        assert_eq!(scored.rejections.len(), 1);
        assert_eq!(scored.rejections[0].key, "Durata");
    }

    #[test]
    fn disjoint_tags_exclude_a_candidate() {
        let lexicon = Lexicon::new().expect("lexicon");
        let keys = index(&lexicon, json!({"Valoare TVA": "100 lei"}));
        let scorer = Scorer::new(&lexicon, &keys, 8, 0.7);

        let scored = scorer.score_span(&span("Adresa sediului ", ""), SemanticType::Unknown);
        assert!(scored.candidates.is_empty());
    }

    #[test]
    fn ties_break_on_key_order_and_cap_applies() {
        let mut candidates = ["b", "a", "c"]
            .iter()
            .map(|key| Candidate {
                key: key.to_string(),
                score: 0.5,
                key_type: SemanticType::Unknown,
                sources: BTreeSet::from([CandidateSource::Local]),
                suggestion_confidence: None,
            })
            .collect::<Vec<_>>();
        rank(&mut candidates, 2);
        let keys = candidates
            .iter()
            .map(|candidate| candidate.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn suggestions_merge_without_replacing_local_scores() {
        let lexicon = Lexicon::new().expect("lexicon");
        let keys = index(
            &lexicon,
            json!({"Observatii": "fara", "Mentiuni": "nimic", "Data": "2024-01-01"}),
        );
        let scorer = Scorer::new(&lexicon, &keys, 8, 0.7);
        let mut candidates = vec![Candidate {
            key: "Observatii".to_string(),
            score: 0.9,
            key_type: SemanticType::Text,
            sources: BTreeSet::from([CandidateSource::Local]),
            suggestion_confidence: None,
        }];
        let suggestions = vec![
            Suggestion {
                item_id: "x".to_string(),
                key: "Observatii".to_string(),
                confidence: 0.8,
            },
            Suggestion {
                item_id: "x".to_string(),
                key: "Mentiuni".to_string(),
                confidence: 0.6,
            },
            Suggestion {
                item_id: "x".to_string(),
                key: "Lipsa".to_string(),
                confidence: 0.9,
            },
            Suggestion {
                item_id: "x".to_string(),
                key: "Mentiuni".to_string(),
                confidence: 0.05,
            },
        ];

        let merged =
            scorer.merge_suggestions(&mut candidates, SemanticType::Text, &suggestions, 0.25, 0.15);

        assert_eq!(merged, 2);
        assert_eq!(candidates[0].key, "Observatii");
        assert_eq!(candidates[0].score, 0.9);
        assert!(candidates[0].is_suggested());
        assert_eq!(candidates[1].key, "Mentiuni");
        assert!((candidates[1].score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn table_anchors_only_take_record_lists() {
        let lexicon = Lexicon::new().expect("lexicon");
        let keys = index(
            &lexicon,
            json!({
                "Lista servicii": [{"Nr": "1", "Denumire": "Curatenie"}],
                "Lista text": "nu este tabel"
            }),
        );
        let scorer = Scorer::new(&lexicon, &keys, 8, 0.7);
        let scored = scorer.score_target(
            &Target {
                id: "t",
                query: "Lista servicii".to_string(),
                boost_context: "Lista servicii".to_string(),
                slot_type: SemanticType::Table,
            },
            |profile| {
                Some(
                    HEADER_OVERLAP_BONUS
                        * header_overlap(&["Nr".to_string(), "Denumire".to_string()], &profile.value),
                )
            },
        );
        assert_eq!(scored.candidates.len(), 1);
        assert_eq!(scored.candidates[0].key, "Lista servicii");
        assert!(scored.candidates[0].score > 1.0);
    }
}
