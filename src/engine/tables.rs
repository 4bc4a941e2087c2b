use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::{Document, TableAddress};
use crate::engine::data::render_value;
use crate::engine::text::normalize_text;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableOutcome {
    pub rows_filled: usize,
    pub rows_appended: usize,
    pub unmapped_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

pub fn map_header(header: &[String], fields: &[String]) -> Vec<Option<String>> {
    let normalized_fields = fields
        .iter()
        .map(|field| (normalize_text(field), field))
        .collect::<Vec<_>>();

    header
        .iter()
        .map(|cell| {
            let cell = normalize_text(cell);
            if cell.is_empty() {
                return None;
            }
            normalized_fields
                .iter()
                .find(|(field, _)| *field == cell)
                .or_else(|| {
                    normalized_fields
                        .iter()
                        .find(|(field, _)| field.contains(&cell) || cell.contains(field.as_str()))
                })
                .map(|(_, original)| (*original).clone())
        })
        .collect()
}

fn record_fields(records: &[&Map<String, Value>]) -> Vec<String> {
    let mut fields = Vec::<String>::new();
    for record in records {
        for field in record.keys() {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
    }
    fields
}

pub fn fill_table(
    document: &mut Document,
    address: &TableAddress,
    header: &[String],
    first_data_row: usize,
    value: &Value,
) -> TableOutcome {
    let records = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect::<Vec<_>>(),
        _ => Vec::new(),
    };
    let columns = map_header(header, &record_fields(&records));
    let mut outcome = TableOutcome {
        unmapped_columns: header
            .iter()
            .zip(&columns)
            .filter(|(cell, field)| field.is_none() && !cell.trim().is_empty())
            .map(|(cell, _)| cell.clone())
            .collect(),
        ..TableOutcome::default()
    };

    let Some(table) = document.table_mut(address) else {
        outcome.failure = Some("table not found".to_string());
        return outcome;
    };

    let mut free_rows = (first_data_row..table.rows.len())
        .filter(|&row| table.rows[row].is_empty())
        .collect::<Vec<usize>>()
        .into_iter();

    for record in records {
        let row = match free_rows.next() {
            Some(row) => row,
            None => match table.append_blank_row(first_data_row) {
                Some(row) => {
                    outcome.rows_appended += 1;
                    row
                }
                None => {
                    outcome.failure = Some(format!("template row {first_data_row} missing"));
                    break;
                }
            },
        };

        for (col, field) in columns.iter().enumerate() {
            let Some(field) = field else {
                continue;
            };
            let Some(text) = record.get(field).and_then(render_value) else {
                continue;
            };
            if let Some(cell) = table.rows[row].cells.get_mut(col) {
                cell.set_text_preserving_format(&text);
            }
        }
        outcome.rows_filled += 1;
    }

    debug!(
        rows_filled = outcome.rows_filled,
        rows_appended = outcome.rows_appended,
        "filled table"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Part;
    use serde_json::json;

    fn document() -> Document {
        serde_json::from_value(json!({
            "body": [{"table": {"rows": [
                {"cells": [
                    {"blocks": [{"paragraph": {"runs": [{"text": "Nr. crt."}]}}]},
                    {"blocks": [{"paragraph": {"runs": [{"text": "Denumire serviciu"}]}}]},
                    {"blocks": [{"paragraph": {"runs": [{"text": "Observatii"}]}}]}
                ]},
                {"cells": [
                    {"blocks": [{"paragraph": {"runs": [{"text": "", "format": {"bold": true}}]}}]},
                    {"blocks": [{"paragraph": {"runs": []}}]},
                    {"blocks": [{"paragraph": {"runs": []}}]}
                ]}
            ]}}]
        }))
        .expect("document")
    }

    fn address() -> TableAddress {
        TableAddress {
            part: Part::Body,
            section_idx: None,
            cells: Vec::new(),
            table_idx: 0,
        }
    }

    #[test]
    fn header_mapping_prefers_exact_then_containment() {
        let header = vec![
            "Nr. crt.".to_string(),
            "Denumire serviciu".to_string(),
            "Observatii".to_string(),
        ];
        let fields = vec!["Denumire".to_string(), "Nr. crt.".to_string()];
        assert_eq!(
            map_header(&header, &fields),
            vec![Some("Nr. crt.".to_string()), Some("Denumire".to_string()), None]
        );
    }

    #[test]
    fn fills_empty_row_then_appends_clones() {
        let mut document = document();
        let header = vec![
            "Nr. crt.".to_string(),
            "Denumire serviciu".to_string(),
            "Observatii".to_string(),
        ];
        let value = json!([
            {"Nr. crt.": "1", "Denumire": "Curatenie"},
            {"Nr. crt.": 2, "Denumire": "Paza"}
        ]);

        let outcome = fill_table(&mut document, &address(), &header, 1, &value);

        assert_eq!(outcome.rows_filled, 2);
        assert_eq!(outcome.rows_appended, 1);
        assert_eq!(outcome.unmapped_columns, vec!["Observatii".to_string()]);

        let table = document.table(&address()).expect("table");
        assert_eq!(table.rows.len(), 3);
        let row_texts = table.rows[1..]
            .iter()
            .map(|row| row.cells.iter().map(|cell| cell.text()).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(
            row_texts,
            vec![
                vec!["1".to_string(), "Curatenie".to_string(), String::new()],
                vec!["2".to_string(), "Paza".to_string(), String::new()],
            ]
        );
        let first_cell = &table.rows[2].cells[0];
        let crate::document::Block::Paragraph(paragraph) = &first_cell.blocks[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(paragraph.runs[0].format.get("bold"), Some(&json!(true)));
    }
}
