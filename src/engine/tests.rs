use anyhow::{Result, bail};
use serde_json::json;

use crate::document::{Document, Location, Part};
use crate::engine::checkbox::CheckboxOutcome;
use crate::engine::config::EngineConfig;
use crate::engine::data::DataRecord;
use crate::engine::errors::FillError;
use crate::engine::inference::{InferenceRequest, Suggestion, SuggestionSource};
use crate::engine::pipeline::{Engine, FillOutcome};
use crate::engine::resolver::Assignment;
use crate::engine::types::{Lexicon, SemanticType};

const DECLARATION: &str =
    "Subsemnatul ____________________, reprezentant al ____________________";

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("engine")
}

fn document(paragraphs: &[&str]) -> Document {
    let body = paragraphs
        .iter()
        .map(|text| json!({"paragraph": {"runs": [{"text": text}]}}))
        .collect::<Vec<_>>();
    serde_json::from_value(json!({ "body": body })).expect("document")
}

fn data(raw: serde_json::Value) -> DataRecord {
    DataRecord::from_json(raw).expect("data record")
}

fn body(paragraph_idx: usize) -> Location {
    Location {
        part: Part::Body,
        section_idx: None,
        cells: Vec::new(),
        paragraph_idx,
    }
}

fn text_at(document: &Document, paragraph_idx: usize) -> String {
    document
        .paragraph(&body(paragraph_idx))
        .map(|paragraph| paragraph.text())
        .unwrap_or_default()
}

fn fill(document: &Document, data: &DataRecord) -> FillOutcome {
    engine().fill(document, data, None).expect("fill should succeed")
}

fn declaration_data() -> DataRecord {
    data(json!({
        "Nume reprezentant": "Ion Popescu",
        "Denumire operator": "ACME SRL"
    }))
}

#[test]
fn declaration_resolves_person_then_organization() {
    let template = document(&[DECLARATION]);
    let outcome = fill(&template, &declaration_data());

    let spans = &outcome.analysis.spans;
    assert_eq!(spans.len(), 2);
    assert_eq!(
        outcome.resolution.table.key_of(&spans[0].span_id),
        Some("Nume reprezentant")
    );
    assert_eq!(
        outcome.resolution.table.key_of(&spans[1].span_id),
        Some("Denumire operator")
    );
    assert_eq!(
        text_at(&outcome.document, 0),
        "Subsemnatul Ion Popescu, reprezentant al ACME SRL"
    );
    assert!(outcome.unresolved.is_empty());
    assert!(outcome.unused_keys.is_empty());
    assert!(outcome.strict_check().is_ok());
}

#[test]
fn input_document_is_left_untouched() {
    let template = document(&[DECLARATION]);
    let snapshot = template.clone();
    let outcome = fill(&template, &declaration_data());

    assert_eq!(template, snapshot);
    assert_eq!(outcome.preview.len(), 1);
    assert_eq!(outcome.preview[0].before, DECLARATION);
    assert_eq!(
        outcome.preview[0].after,
        "Subsemnatul Ion Popescu, reprezentant al ACME SRL"
    );
}

#[test]
fn unrecognizable_blank_is_unresolved_and_fails_strict_mode() {
    let template = document(&["Observatii ____________________"]);
    let outcome = fill(&template, &data(json!({"Nume reprezentant": "Ion Popescu"})));

    assert_eq!(outcome.unresolved.len(), 1);
    assert_eq!(outcome.unresolved[0].item_id, outcome.analysis.spans[0].span_id);
    assert_eq!(text_at(&outcome.document, 0), "Observatii ____________________");
    assert_eq!(outcome.unused_keys, vec!["Nume reprezentant".to_string()]);

    let err = outcome.strict_check().expect_err("strict mode should fail");
    assert!(matches!(err, FillError::UnresolvedAnchors { count: 1 }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn repeated_runs_produce_identical_results() {
    let template = document(&[
        DECLARATION,
        "Observatii ____________________",
        "Adresa sediului ____________________",
    ]);
    let record = data(json!({
        "Nume reprezentant": "Ion Popescu",
        "Denumire operator": "ACME SRL",
        "Adresa sediu": "Str. Lunga nr. 5, Cluj",
        "Observatii generale": "fara"
    }));

    let first = fill(&template, &record);
    let second = fill(&template, &record);

    let span_ids = |outcome: &FillOutcome| {
        outcome
            .analysis
            .spans
            .iter()
            .map(|span| span.span_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(span_ids(&first), span_ids(&second));
    assert_eq!(
        serde_json::to_value(&first.anchors).expect("anchors"),
        serde_json::to_value(&second.anchors).expect("anchors")
    );
    assert_eq!(first.resolution.table, second.resolution.table);
    assert_eq!(first.document, second.document);
}

#[test]
fn spans_never_overlap_within_a_container() {
    let template = document(&[
        "Data ___/___/____ si ........ si __________ si |_| Da [ ] Nu …… final",
        "________________",
    ]);
    let analysis = engine().analyze(&template);

    assert!(analysis.spans.len() >= 6);
    for pair in analysis.spans.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if left.container_index == right.container_index {
            assert!(left.end <= right.start, "{left:?} overlaps {right:?}");
        }
    }
}

#[test]
fn date_only_candidate_never_fills_a_day_count() {
    let template = document(&[
        "Oferta este valabila pe o durata de __________ zile, pana la data __________.",
    ]);
    let record = data(json!({"Data limita": "2024-07-30"}));
    let outcome = fill(&template, &record);

    let spans = &outcome.analysis.spans;
    assert_eq!(outcome.analysis.slot_types[&spans[0].span_id], SemanticType::DurationDays);
    assert_eq!(outcome.analysis.slot_types[&spans[1].span_id], SemanticType::Date);
    assert!(!outcome.resolution.table.is_resolved(&spans[0].span_id));
    assert_eq!(outcome.resolution.table.key_of(&spans[1].span_id), Some("Data limita"));
    assert_eq!(
        text_at(&outcome.document, 0),
        "Oferta este valabila pe o durata de __________ zile, pana la data 2024-07-30."
    );

    let lexicon = Lexicon::new().expect("lexicon");
    for span in spans {
        if let Some(key) = outcome.resolution.table.key_of(&span.span_id) {
            let value = record.get(key).expect("assigned key exists");
            assert!(lexicon.value_matches_type(value, outcome.analysis.slot_types[&span.span_id]));
        }
    }
}

#[test]
fn day_count_is_computed_from_completion_date() {
    let template = document(&[
        "Oferta este valabila pe o durata de __________ zile, pana la data __________.",
    ]);
    let record = data(json!({
        "Data completarii": "2024-05-01",
        "Data expirare oferta": "2024-07-30"
    }));
    let outcome = fill(&template, &record);

    let first = &outcome.analysis.spans[0].span_id;
    assert!(matches!(
        outcome.resolution.table.get(first),
        Some(Assignment::Computed { value, .. }) if value == "90"
    ));
    assert_eq!(
        text_at(&outcome.document, 0),
        "Oferta este valabila pe o durata de 90 zile, pana la data 2024-07-30."
    );
}

struct FailingSource {
    calls: usize,
}

impl SuggestionSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    fn suggest(&mut self, _request: &InferenceRequest) -> Result<Vec<Suggestion>> {
        self.calls += 1;
        bail!("inference backend unavailable")
    }
}

#[test]
fn failed_inference_degrades_to_local_candidates() {
    let template = document(&[DECLARATION, "Observatii ____________________"]);
    let record = declaration_data();
    let baseline = fill(&template, &record);

    let mut source = FailingSource { calls: 0 };
    let outcome = engine()
        .fill(&template, &record, Some(&mut source as &mut dyn SuggestionSource))
        .expect("inference failure is never fatal");

    assert!(source.calls >= 1);
    assert_eq!(outcome.resolution.table, baseline.resolution.table);
    assert_eq!(
        text_at(&outcome.document, 0),
        "Subsemnatul Ion Popescu, reprezentant al ACME SRL"
    );
    assert_eq!(outcome.unresolved.len(), 1);
}

#[test]
fn checkbox_group_marks_the_matching_option() {
    let template = document(&["Regim TVA: |_| Platitor de TVA |_| Neplatitor de TVA"]);
    let outcome = fill(&template, &data(json!({"Regim TVA": "Neplatitor de TVA"})));

    assert_eq!(outcome.checkboxes.len(), 1);
    assert!(matches!(
        &outcome.checkboxes[0].outcome,
        CheckboxOutcome::Marked { option, .. } if option == "Neplatitor de TVA"
    ));
    assert_eq!(
        text_at(&outcome.document, 0),
        "Regim TVA: |_| Platitor de TVA |x| Neplatitor de TVA"
    );
    assert!(outcome.commit.filled.is_empty());
}

#[test]
fn record_list_fills_table_rows() {
    let template: Document = serde_json::from_value(json!({"body": [
        {"paragraph": {"runs": [{"text": "Lista subcontractanti:"}]}},
        {"table": {"rows": [
            {"cells": [
                {"blocks": [{"paragraph": {"runs": [{"text": "Denumire subcontractant"}]}}]},
                {"blocks": [{"paragraph": {"runs": [{"text": "Procent"}]}}]}
            ]},
            {"cells": [
                {"blocks": [{"paragraph": {"runs": []}}]},
                {"blocks": [{"paragraph": {"runs": []}}]}
            ]}
        ]}}
    ]}))
    .expect("document");
    let record = data(json!({
        "Lista subcontractanti": [
            {"Denumire subcontractant": "Beta SRL", "Procent": "20%"},
            {"Denumire subcontractant": "Gamma SA", "Procent": "10%"}
        ]
    }));

    let outcome = fill(&template, &record);

    assert_eq!(outcome.tables.len(), 1);
    assert_eq!(outcome.tables[0].outcome.rows_filled, 2);
    assert_eq!(outcome.tables[0].outcome.rows_appended, 1);
    assert!(outcome.unresolved.is_empty());

    let Some(crate::document::Block::Table(table)) = outcome.document.body.get(1) else {
        panic!("expected table block");
    };
    let rows = table
        .rows
        .iter()
        .map(|row| row.cells.iter().map(|cell| cell.text()).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    assert_eq!(
        rows,
        vec![
            vec!["Denumire subcontractant".to_string(), "Procent".to_string()],
            vec!["Beta SRL".to_string(), "20%".to_string()],
            vec!["Gamma SA".to_string(), "10%".to_string()],
        ]
    );
}

fn quantity_document() -> Document {
    document(&["Cantitate livrata: ____", "Cantitate ramasa in stoc: ____"])
}

fn fill_with(config: EngineConfig, document: &Document, data: &DataRecord) -> FillOutcome {
    Engine::new(config)
        .expect("engine")
        .fill(document, data, None)
        .expect("fill should succeed")
}

#[test]
fn unrelated_blanks_do_not_collapse_onto_one_key() {
    let document = quantity_document();
    let data = data(json!({"Cantitate livrata": "120 buc"}));

    let unpenalized = fill_with(
        EngineConfig {
            reuse_penalty: 0.0,
            dissimilar_context_penalty: 0.0,
            ..EngineConfig::default()
        },
        &document,
        &data,
    );
    assert_eq!(text_at(&unpenalized.document, 0), "Cantitate livrata: 120 buc");
    assert_eq!(text_at(&unpenalized.document, 1), "Cantitate ramasa in stoc: 120 buc");

    let outcome = fill(&document, &data);
    let spans = &outcome.analysis.spans;
    assert_eq!(
        outcome.resolution.table.key_of(&spans[0].span_id),
        Some("Cantitate livrata")
    );
    assert_eq!(outcome.resolution.table.key_of(&spans[1].span_id), None);
    assert_eq!(text_at(&outcome.document, 0), "Cantitate livrata: 120 buc");
    assert_eq!(text_at(&outcome.document, 1), "Cantitate ramasa in stoc: ____");
    assert_eq!(outcome.unresolved.len(), 1);
    assert_eq!(outcome.unresolved[0].item_id, spans[1].span_id);
}

#[test]
fn dissimilar_context_alone_blocks_key_reuse() {
    let document = quantity_document();
    let data = data(json!({"Cantitate livrata": "120 buc"}));

    let outcome = fill_with(
        EngineConfig {
            reuse_penalty: 0.0,
            ..EngineConfig::default()
        },
        &document,
        &data,
    );

    let spans = &outcome.analysis.spans;
    assert_eq!(outcome.resolution.table.key_of(&spans[1].span_id), None);
    assert_eq!(text_at(&outcome.document, 1), "Cantitate ramasa in stoc: ____");
}
