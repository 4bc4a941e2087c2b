use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::document::SectionKey;
use crate::engine::anchors::RoleConstraint;
use crate::engine::config::{EngineConfig, SuggestionPolicy};
use crate::engine::inference::{InferenceItem, InferenceRequest, SuggestionSource, suggest_or_empty};
use crate::engine::scoring::{Candidate, KeyIndex, Scorer};
use crate::engine::text::{jaccard, normalize_text, tokens};
use crate::engine::types::{Lexicon, SemanticType, SlotType, parse_date, types_conflict};

#[derive(Debug, Clone, Serialize)]
pub struct ResolveItem {
    pub item_id: String,
    pub slot_type: SlotType,
    pub label: String,
    pub context: String,
    pub section_key: SectionKey,
    pub container_index: usize,
    pub start: usize,
    pub critical: bool,
    pub candidates: Vec<Candidate>,
}

impl ResolveItem {
    fn margin(&self) -> f64 {
        match self.candidates.as_slice() {
            [] => f64::NEG_INFINITY,
            [only] => only.score,
            [first, second, ..] => first.score - second.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    Key { key: String, confidence: f64 },
    Computed { value: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AssignmentTable {
    entries: BTreeMap<String, Assignment>,
}

impl AssignmentTable {
    pub fn get(&self, item_id: &str) -> Option<&Assignment> {
        self.entries.get(item_id)
    }

    pub fn key_of(&self, item_id: &str) -> Option<&str> {
        match self.entries.get(item_id) {
            Some(Assignment::Key { key, .. }) => Some(key),
            _ => None,
        }
    }

    pub fn confidence_of(&self, item_id: &str) -> Option<f64> {
        match self.entries.get(item_id) {
            Some(Assignment::Key { confidence, .. }) => Some(*confidence),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_resolved(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    pub fn used_keys(&self) -> BTreeSet<&str> {
        self.entries
            .values()
            .filter_map(|assignment| match assignment {
                Assignment::Key { key, .. } => Some(key.as_str()),
                Assignment::Computed { .. } => None,
            })
            .collect()
    }

    fn assign(&mut self, item_id: &str, key: &str, confidence: f64) {
        self.entries.insert(
            item_id.to_string(),
            Assignment::Key {
                key: key.to_string(),
                confidence,
            },
        );
    }

    fn evict(&mut self, item_id: &str) {
        self.entries.remove(item_id);
    }

    fn holders(&self, key: &str, except: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(item_id, _)| item_id.as_str() != except)
            .filter_map(|(item_id, assignment)| match assignment {
                Assignment::Key { key: held, .. } if held == key => Some(item_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolverDiagnostics {
    pub conflicts_found: usize,
    pub repairs_made: usize,
    pub section_collisions: usize,
    pub role_clusters: usize,
    pub role_violations: usize,
    pub role_repairs: usize,
    pub evictions: usize,
    pub rounds_run: usize,
    pub reuse_penalties: usize,
    pub inference_requests: usize,
    pub suggestions_merged: usize,
    pub type_rejections: usize,
    pub computed_values: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub table: AssignmentTable,
    pub items: Vec<ResolveItem>,
    pub diagnostics: ResolverDiagnostics,
}

#[derive(Debug, Default)]
struct RoundOutcome {
    section_collisions: usize,
    role_violations: usize,
    repairs: usize,
    role_repairs: usize,
    evictions: usize,
}

impl RoundOutcome {
    fn conflicts(&self) -> usize {
        self.section_collisions + self.role_violations
    }
}

pub struct Resolver<'a> {
    config: &'a EngineConfig,
    lexicon: &'a Lexicon,
    keys: &'a KeyIndex,
    scorer: &'a Scorer<'a>,
    repeatable: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        config: &'a EngineConfig,
        lexicon: &'a Lexicon,
        keys: &'a KeyIndex,
        scorer: &'a Scorer<'a>,
    ) -> Self {
        let repeatable = config
            .repeatable_keys
            .iter()
            .map(|phrase| normalize_text(phrase))
            .filter(|phrase| !phrase.is_empty())
            .collect();
        Self {
            config,
            lexicon,
            keys,
            scorer,
            repeatable,
        }
    }

    pub fn is_repeatable(&self, key: &str) -> bool {
        let normalized = normalize_text(key);
        self.repeatable
            .iter()
            .any(|phrase| normalized.contains(phrase.as_str()))
    }

    pub fn resolve(
        &self,
        mut items: Vec<ResolveItem>,
        constraints: &[RoleConstraint],
        source: Option<&mut dyn SuggestionSource>,
    ) -> Resolution {
        let mut diagnostics = ResolverDiagnostics {
            role_clusters: constraints
                .iter()
                .map(|constraint| constraint.cluster_id.as_str())
                .collect::<BTreeSet<&str>>()
                .len(),
            ..ResolverDiagnostics::default()
        };

        if let Some(source) = source {
            self.request_suggestions(&mut items, source, &mut diagnostics);
        }
        for item in &mut items {
            self.apply_policy(item);
        }

        let contexts = items
            .iter()
            .map(|item| tokens(&item.context))
            .collect::<Vec<Vec<String>>>();
        let index = items
            .iter()
            .enumerate()
            .map(|(position, item)| (item.item_id.clone(), position))
            .collect::<BTreeMap<String, usize>>();

        let mut table = self.initial_pass(&items, &contexts, &index, &mut diagnostics);

        for round in 0..self.config.repair_rounds {
            let (next, outcome) = self.repair_round(&items, &contexts, &index, constraints, &table);
            if outcome.conflicts() == 0 {
                break;
            }
            diagnostics.rounds_run += 1;
            diagnostics.conflicts_found += outcome.conflicts();
            diagnostics.section_collisions += outcome.section_collisions;
            diagnostics.role_violations += outcome.role_violations;
            diagnostics.repairs_made += outcome.repairs;
            diagnostics.role_repairs += outcome.role_repairs;
            diagnostics.evictions += outcome.evictions;
            debug!(
                round,
                conflicts = outcome.conflicts(),
                repairs = outcome.repairs,
                "repair round finished"
            );
            table = next;
            if outcome.repairs == 0 {
                break;
            }
        }

        let table = self.fill_computed(&items, table, &mut diagnostics);

        info!(
            items = items.len(),
            resolved = table.len(),
            conflicts = diagnostics.conflicts_found,
            repairs = diagnostics.repairs_made,
            "resolution finished"
        );

        Resolution {
            table,
            items,
            diagnostics,
        }
    }

    fn is_ambiguous(&self, item: &ResolveItem) -> bool {
        match item.candidates.as_slice() {
            [] => true,
            [only] => only.score < self.config.accept_threshold,
            [first, second, ..] => {
                first.score - second.score < self.config.ambiguity_margin
                    || first.score < self.config.accept_threshold
            }
        }
    }

    fn request_suggestions(
        &self,
        items: &mut [ResolveItem],
        source: &mut dyn SuggestionSource,
        diagnostics: &mut ResolverDiagnostics,
    ) {
        let ambiguous = items
            .iter()
            .enumerate()
            .filter(|(_, item)| self.is_ambiguous(item))
            .map(|(position, _)| position)
            .collect::<Vec<usize>>();
        if ambiguous.is_empty() {
            return;
        }

        let all_keys = self
            .keys
            .iter()
            .map(|profile| profile.key.clone())
            .collect::<Vec<String>>();

        for batch in ambiguous.chunks(self.config.inference_batch_size.max(1)) {
            let request = InferenceRequest::new(
                batch
                    .iter()
                    .map(|&position| {
                        let item = &items[position];
                        let candidates = if item.candidates.is_empty() {
                            all_keys.clone()
                        } else {
                            item.candidates
                                .iter()
                                .map(|candidate| candidate.key.clone())
                                .collect()
                        };
                        InferenceItem {
                            item_id: item.item_id.clone(),
                            label: item.label.clone(),
                            context: item.context.clone(),
                            slot_type: item.slot_type,
                            candidates,
                        }
                    })
                    .collect(),
            );
            diagnostics.inference_requests += 1;
            let suggestions = suggest_or_empty(source, &request);

            for &position in batch {
                let item = &mut items[position];
                let own = suggestions
                    .iter()
                    .filter(|suggestion| suggestion.item_id == item.item_id)
                    .cloned()
                    .collect::<Vec<_>>();
                if own.is_empty() {
                    continue;
                }
                diagnostics.suggestions_merged += self.scorer.merge_suggestions(
                    &mut item.candidates,
                    item.slot_type,
                    &own,
                    self.config.suggestion_weight,
                    self.config.suggestion_floor,
                );
            }
        }
    }

    fn apply_policy(&self, item: &mut ResolveItem) {
        let prefer_suggestion = match self.config.suggestion_policy {
            SuggestionPolicy::LocalFirst => false,
            SuggestionPolicy::SuggestionFirst => true,
            SuggestionPolicy::CriticalLocal => !item.critical,
        };
        if !prefer_suggestion {
            return;
        }

        let mut best: Option<(usize, f64)> = None;
        for (position, candidate) in item.candidates.iter().enumerate() {
            let Some(confidence) = candidate.suggestion_confidence else {
                continue;
            };
            if best.is_none_or(|(_, current)| confidence > current) {
                best = Some((position, confidence));
            }
        }
        let Some((position, confidence)) = best else {
            return;
        };

        let top = item.candidates[0].score;
        let mut promoted = item.candidates.remove(position);
        promoted.score = promoted.score.max(confidence).max(top);
        item.candidates.insert(0, promoted);
    }

    fn effective_score(
        &self,
        item: &ResolveItem,
        candidate: &Candidate,
        contexts: &[Vec<String>],
        index: &BTreeMap<String, usize>,
        table: &AssignmentTable,
    ) -> (f64, bool) {
        if self.is_repeatable(&candidate.key) {
            return (candidate.score, false);
        }
        let holders = table.holders(&candidate.key, &item.item_id);
        let Some(original) = holders.first() else {
            return (candidate.score, false);
        };

        let mut score = candidate.score - self.config.reuse_penalty;
        let own_context = index.get(&item.item_id).map(|&position| &contexts[position]);
        let original_context = index.get(*original).map(|&position| &contexts[position]);
        if let (Some(own), Some(original)) = (own_context, original_context) {
            if jaccard(own, original) < self.config.reuse_jaccard_floor {
                score -= self.config.dissimilar_context_penalty;
            }
        }
        (score, true)
    }

    fn best_choice<'c>(
        &self,
        item: &'c ResolveItem,
        contexts: &[Vec<String>],
        index: &BTreeMap<String, usize>,
        table: &AssignmentTable,
        skip_key: Option<&str>,
    ) -> Option<(&'c Candidate, f64, bool)> {
        let mut best: Option<(&Candidate, f64, bool)> = None;
        for candidate in &item.candidates {
            if skip_key == Some(candidate.key.as_str()) {
                continue;
            }
            let (score, penalized) = self.effective_score(item, candidate, contexts, index, table);
            if best.is_none_or(|(_, current, _)| score > current) {
                best = Some((candidate, score, penalized));
            }
        }
        best.filter(|(_, score, _)| *score >= self.config.accept_threshold)
    }

    fn initial_pass(
        &self,
        items: &[ResolveItem],
        contexts: &[Vec<String>],
        index: &BTreeMap<String, usize>,
        diagnostics: &mut ResolverDiagnostics,
    ) -> AssignmentTable {
        // Widest top-two margin first, so clear picks constrain ambiguous ones.
        let mut order = (0..items.len()).collect::<Vec<usize>>();
        order.sort_by(|&left, &right| {
            items[right]
                .margin()
                .total_cmp(&items[left].margin())
                .then(left.cmp(&right))
        });

        let mut table = AssignmentTable::default();
        for position in order {
            let item = &items[position];
            match self.best_choice(item, contexts, index, &table, None) {
                Some((candidate, score, penalized)) => {
                    if penalized {
                        diagnostics.reuse_penalties += 1;
                    }
                    debug!(item = %item.item_id, key = %candidate.key, score, "assigned");
                    table.assign(&item.item_id, &candidate.key, score);
                }
                None => debug!(item = %item.item_id, "left unresolved"),
            }
        }
        table
    }

    fn repair_round(
        &self,
        items: &[ResolveItem],
        contexts: &[Vec<String>],
        index: &BTreeMap<String, usize>,
        constraints: &[RoleConstraint],
        table: &AssignmentTable,
    ) -> (AssignmentTable, RoundOutcome) {
        let mut next = table.clone();
        let mut outcome = RoundOutcome::default();

        for victim in self.section_collisions(items, table) {
            outcome.section_collisions += 1;
            let item = &items[victim];
            let current = table.key_of(&item.item_id).map(ToOwned::to_owned);
            next.evict(&item.item_id);
            match self.best_choice(item, contexts, index, &next, current.as_deref()) {
                Some((candidate, score, _)) => {
                    debug!(item = %item.item_id, key = %candidate.key, "collision repaired with substitute");
                    next.assign(&item.item_id, &candidate.key, score);
                }
                None => {
                    debug!(item = %item.item_id, "collision repaired by eviction");
                    outcome.evictions += 1;
                }
            }
            outcome.repairs += 1;
        }

        self.repair_roles(items, contexts, index, constraints, &mut next, &mut outcome);
        (next, outcome)
    }

    fn section_collisions(&self, items: &[ResolveItem], table: &AssignmentTable) -> Vec<usize> {
        let mut groups = BTreeMap::<(SectionKey, String), Vec<usize>>::new();
        for (position, item) in items.iter().enumerate() {
            let Some(key) = table.key_of(&item.item_id) else {
                continue;
            };
            if self.is_repeatable(key) {
                continue;
            }
            groups
                .entry((item.section_key.clone(), key.to_string()))
                .or_default()
                .push(position);
        }

        let mut victims = Vec::new();
        for members in groups.values().filter(|members| members.len() > 1) {
            let conflicting = members
                .iter()
                .copied()
                .filter(|&left| {
                    members.iter().any(|&right| {
                        left != right && types_conflict(items[left].slot_type, items[right].slot_type)
                    })
                })
                .collect::<Vec<usize>>();
            let victim = conflicting.into_iter().min_by(|&left, &right| {
                let left_confidence = table.confidence_of(&items[left].item_id).unwrap_or(0.0);
                let right_confidence = table.confidence_of(&items[right].item_id).unwrap_or(0.0);
                left_confidence
                    .total_cmp(&right_confidence)
                    .then(right.cmp(&left))
            });
            victims.extend(victim);
        }
        victims
    }

    fn satisfies(&self, key: &str, expected: SlotType) -> bool {
        self.keys
            .get(key)
            .is_some_and(|profile| self.lexicon.key_satisfies(profile.key_type, &profile.value, expected))
    }

    fn repair_roles(
        &self,
        items: &[ResolveItem],
        contexts: &[Vec<String>],
        index: &BTreeMap<String, usize>,
        constraints: &[RoleConstraint],
        next: &mut AssignmentTable,
        outcome: &mut RoundOutcome,
    ) {
        let mut clusters = BTreeMap::<&str, Vec<&RoleConstraint>>::new();
        for constraint in constraints {
            clusters
                .entry(constraint.cluster_id.as_str())
                .or_default()
                .push(constraint);
        }

        for (cluster_id, positions) in clusters {
            let mut violators = positions
                .iter()
                .filter_map(|constraint| {
                    let key = next.key_of(&constraint.span_id)?;
                    if self.satisfies(key, constraint.expected) {
                        return None;
                    }
                    let confidence = next.confidence_of(&constraint.span_id).unwrap_or(0.0);
                    let position = *index.get(&constraint.span_id)?;
                    Some((position, constraint.expected, confidence))
                })
                .collect::<Vec<_>>();
            if violators.is_empty() {
                continue;
            }
            outcome.role_violations += violators.len();
            debug!(cluster = cluster_id, violations = violators.len(), "role pattern violated");

            for (position, _, _) in &violators {
                next.evict(&items[*position].item_id);
            }
            violators.sort_by(|left, right| {
                left.2
                    .total_cmp(&right.2)
                    .then_with(|| items[left.0].item_id.cmp(&items[right.0].item_id))
            });

            for (position, expected, _) in violators {
                let item = &items[position];
                let mut substitute: Option<(&Candidate, f64)> = None;
                for candidate in &item.candidates {
                    if !self.satisfies(&candidate.key, expected)
                        || !(self.is_repeatable(&candidate.key)
                            || next.holders(&candidate.key, &item.item_id).is_empty())
                    {
                        continue;
                    }
                    let (score, _) = self.effective_score(item, candidate, contexts, index, next);
                    if substitute.is_none_or(|(_, current)| score > current) {
                        substitute = Some((candidate, score));
                    }
                }
                match substitute.filter(|(_, score)| *score >= self.config.accept_threshold) {
                    Some((candidate, score)) => {
                        debug!(
                            item = %item.item_id,
                            key = %candidate.key,
                            expected = expected.as_str(),
                            "role repaired with substitute"
                        );
                        next.assign(&item.item_id, &candidate.key, score);
                        outcome.role_repairs += 1;
                    }
                    None => outcome.evictions += 1,
                }
                outcome.repairs += 1;
            }
        }
    }

    fn fill_computed(
        &self,
        items: &[ResolveItem],
        mut table: AssignmentTable,
        diagnostics: &mut ResolverDiagnostics,
    ) -> AssignmentTable {
        let completion = self
            .keys
            .iter()
            .filter(|profile| self.is_repeatable(&profile.key))
            .find_map(|profile| profile.value.as_str().and_then(parse_date));
        let Some(completion) = completion else {
            return table;
        };

        for item in items {
            if item.slot_type != SemanticType::DurationDays || table.is_resolved(&item.item_id) {
                continue;
            }
            let until = items
                .iter()
                .filter(|other| {
                    other.container_index == item.container_index
                        && other.slot_type == SemanticType::Date
                })
                .filter_map(|other| table.key_of(&other.item_id))
                .filter_map(|key| self.keys.get(key))
                .find_map(|profile| profile.value.as_str().and_then(parse_date));
            let Some(until) = until else {
                continue;
            };

            let days = (until - completion).num_days();
            if days < 0 {
                continue;
            }
            debug!(item = %item.item_id, days, "computed duration");
            table.entries.insert(
                item.item_id.clone(),
                Assignment::Computed {
                    value: days.to_string(),
                    reason: "days between completion date and paragraph date".to_string(),
                },
            );
            diagnostics.computed_values += 1;
        }
        table
    }
}
