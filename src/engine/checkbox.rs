use serde::Serialize;
use tracing::debug;

use crate::document::Document;
use crate::engine::anchors::CheckboxOption;
use crate::engine::commit::replace_span;
use crate::engine::text::token_set_ratio;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckboxOutcome {
    Marked { option: String, score: f64 },
    AlreadyMarked { option: String },
    NoMatchingOption { value: String },
    Failed { reason: String },
}

pub fn marked_glyph(glyph: &str) -> &'static str {
    match glyph {
        "☐" | "□" => "☑",
        _ if glyph.starts_with('|') => "|x|",
        _ => "[x]",
    }
}

pub fn fill_checkbox_group(
    document: &mut Document,
    options: &[CheckboxOption],
    value: &str,
    threshold: f64,
) -> CheckboxOutcome {
    if let Some(marked) = options.iter().find(|option| option.checked) {
        return CheckboxOutcome::AlreadyMarked {
            option: marked.text.clone(),
        };
    }

    let mut best: Option<(&CheckboxOption, f64)> = None;
    for option in options {
        let score = token_set_ratio(value, &option.text);
        if score >= threshold && best.is_none_or(|(_, current)| score > current) {
            best = Some((option, score));
        }
    }
    let Some((option, score)) = best else {
        return CheckboxOutcome::NoMatchingOption {
            value: value.to_string(),
        };
    };

    let Some(paragraph) = document.paragraph_mut(&option.location) else {
        return CheckboxOutcome::Failed {
            reason: format!("paragraph {} not found", option.location),
        };
    };
    if paragraph.text().get(option.start..option.end) != Some(option.glyph.as_str()) {
        return CheckboxOutcome::Failed {
            reason: format!("checkbox at {} moved", option.location),
        };
    }

    match replace_span(paragraph, option.start, option.end, marked_glyph(&option.glyph)) {
        Ok(()) => {
            debug!(option = %option.text, score, "marked checkbox option");
            CheckboxOutcome::Marked {
                option: option.text.clone(),
                score,
            }
        }
        Err(err) => CheckboxOutcome::Failed {
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Location, Paragraph, Part};

    fn document(text: &str) -> Document {
        serde_json::from_value(serde_json::json!({
            "body": [{"paragraph": {"runs": [{"text": text}]}}]
        }))
        .expect("document")
    }

    fn option(start: usize, glyph: &str, text: &str, checked: bool) -> CheckboxOption {
        CheckboxOption {
            location: Location {
                part: Part::Body,
                section_idx: None,
                cells: Vec::new(),
                paragraph_idx: 0,
            },
            start,
            end: start + glyph.len(),
            glyph: glyph.to_string(),
            text: text.to_string(),
            checked,
        }
    }

    fn text_of(document: &Document) -> Option<String> {
        document
            .paragraph(&Location {
                part: Part::Body,
                section_idx: None,
                cells: Vec::new(),
                paragraph_idx: 0,
            })
            .map(Paragraph::text)
    }

    #[test]
    fn marks_best_matching_option() {
        let text = "|_| Platitor de TVA |_| Neplatitor de TVA";
        let mut document = document(text);
        let options = vec![
            option(0, "|_|", "Platitor de TVA", false),
            option(20, "|_|", "Neplatitor de TVA", false),
        ];

        let outcome = fill_checkbox_group(&mut document, &options, "Neplatitor de TVA", 0.7);

        assert!(matches!(outcome, CheckboxOutcome::Marked { ref option, .. } if option == "Neplatitor de TVA"));
        assert_eq!(
            text_of(&document),
            Some("|_| Platitor de TVA |x| Neplatitor de TVA".to_string())
        );
    }

    #[test]
    fn already_marked_groups_are_untouched() {
        let mut document = document("[x] Da [ ] Nu");
        let options = vec![option(0, "[x]", "Da", true), option(7, "[ ]", "Nu", false)];
        let outcome = fill_checkbox_group(&mut document, &options, "Nu", 0.7);
        assert!(matches!(outcome, CheckboxOutcome::AlreadyMarked { .. }));
        assert_eq!(text_of(&document), Some("[x] Da [ ] Nu".to_string()));
    }

    #[test]
    fn unmatched_value_marks_nothing() {
        let mut document = document("☐ Da ☐ Nu");
        let options = vec![
            option(0, "☐", "Da", false),
            option("☐ Da ".len(), "☐", "Nu", false),
        ];
        let outcome = fill_checkbox_group(&mut document, &options, "Poate", 0.7);
        assert!(matches!(outcome, CheckboxOutcome::NoMatchingOption { .. }));

        let outcome = fill_checkbox_group(&mut document, &options, "nu", 0.7);
        assert!(matches!(outcome, CheckboxOutcome::Marked { .. }));
        assert_eq!(text_of(&document), Some("☐ Da ☑ Nu".to_string()));
    }
}
