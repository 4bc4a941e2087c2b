use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::data::{is_record_list, is_scalar, render_value};
use crate::engine::spans::{BlankKind, FieldSpan};
use crate::engine::text::{normalize_text, token_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticType {
    Date,
    DateParts,
    Money,
    Percent,
    Number,
    CodedNumber,
    DurationDays,
    OrgName,
    OrgAddress,
    PersonName,
    PersonRole,
    CheckboxGroup,
    Table,
    Text,
    Unknown,
}

pub type SlotType = SemanticType;
pub type KeyType = SemanticType;

impl SemanticType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "DATE",
            Self::DateParts => "DATE_PARTS",
            Self::Money => "MONEY",
            Self::Percent => "PERCENT",
            Self::Number => "NUMBER",
            Self::CodedNumber => "CODED_NUMBER",
            Self::DurationDays => "DURATION_DAYS",
            Self::OrgName => "ORG_NAME",
            Self::OrgAddress => "ORG_ADDRESS",
            Self::PersonName => "PERSON_NAME",
            Self::PersonRole => "PERSON_ROLE",
            Self::CheckboxGroup => "CHECKBOX_GROUP",
            Self::Table => "TABLE",
            Self::Text => "TEXT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_informative(self) -> bool {
        !matches!(self, Self::Unknown | Self::Text)
    }
}

pub fn compatible(slot: SlotType, key: KeyType) -> bool {
    use SemanticType::*;

    if slot == Table || key == Table {
        return slot == key;
    }

    match slot {
        Unknown | Text | CheckboxGroup => true,
        Date => matches!(key, Date | Unknown),
        DateParts => matches!(key, DateParts | Date | Number | Unknown),
        DurationDays => matches!(key, DurationDays | Number | Unknown),
        Money => matches!(key, Money | Number | Unknown),
        Percent => matches!(key, Percent | Number | Unknown),
        Number => matches!(
            key,
            Number | CodedNumber | Money | Percent | DurationDays | Unknown
        ),
        CodedNumber => matches!(key, CodedNumber | Number | Unknown),
        OrgName => matches!(key, OrgName | OrgAddress | Text | Unknown),
        OrgAddress => matches!(key, OrgAddress | OrgName | Text | Unknown),
        PersonName => matches!(key, PersonName | PersonRole | Unknown),
        PersonRole => matches!(key, PersonRole | PersonName | Text | Unknown),
        Table => false,
    }
}

pub fn types_conflict(left: SemanticType, right: SemanticType) -> bool {
    left.is_informative()
        && right.is_informative()
        && !compatible(left, right)
        && !compatible(right, left)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Money,
    Percent,
    Date,
    Duration,
    Service,
    Address,
    Entity,
    Person,
    Identifier,
    Process,
}

pub struct Lexicon {
    owner_phrase: Regex,
    families: Vec<(SemanticType, Regex)>,
    key_only_families: Vec<(SemanticType, Regex)>,
    tags: Vec<(Tag, Regex)>,
    critical_label: Regex,
    duration_paragraph: Regex,
    coded_value: Regex,
    boosts: Vec<(Regex, Vec<(&'static str, f64)>)>,
}

impl Lexicon {
    pub fn new() -> Result<Self> {
        let family = |slot: SemanticType, pattern: &str| -> Result<(SemanticType, Regex)> {
            let regex = Regex::new(pattern)
                .with_context(|| format!("failed to compile {} family regex", slot.as_str()))?;
            Ok((slot, regex))
        };
        let tag = |tag: Tag, pattern: &str| -> Result<(Tag, Regex)> {
            let regex = Regex::new(pattern)
                .with_context(|| format!("failed to compile {tag:?} tag regex"))?;
            Ok((tag, regex))
        };

        Ok(Self {
            owner_phrase: Regex::new(r"\breprezentant\w*\s+(al|a|ai)\b")
                .context("failed to compile owner phrase regex")?,
            families: vec![
                family(SemanticType::CodedNumber, r"\b(cod\s+)?cpv\b")?,
                family(SemanticType::DateParts, r"\b(ziua|luna|anul)\b")?,
                family(
                    SemanticType::DurationDays,
                    r"\bdurat\w*\b|\bnumar(ul)? de zile\b|\bin zile\b",
                )?,
                family(SemanticType::Date, r"\b(data|datei|termenul)\b|\bpana la\b")?,
                family(SemanticType::Percent, r"%|\bprocent\w*\b")?,
                family(
                    SemanticType::Money,
                    r"\b(suma|sumei|lei|ron|euro|eur|valoare\w*|pret\w*|tva|tax\w*|cost\w*)\b",
                )?,
                family(
                    SemanticType::OrgAddress,
                    r"\b(adresa|adresei|sediu\w*|domiciliu\w*|strada|str|judet\w*|localitate\w*|catre)\b",
                )?,
                family(
                    SemanticType::PersonRole,
                    r"\b(in calitate de|calitate\w*|functi[ae]\w*|imputernicit\w*|reprezentant\w*|administrator\w*|director\w*)\b",
                )?,
                family(
                    SemanticType::PersonName,
                    r"\b(subsemnat\w*|dl|dna|domnul|doamna|nume|prenume\w*|persoana de contact)\b",
                )?,
                family(
                    SemanticType::OrgName,
                    r"\b(in numele|ofertant\w*|operator\w*|contractant\w*|subcontractant\w*|societat\w*|firm\w*|denumire\w*|srl|sa|sc|autoritat\w*|achizitor\w*|entitat\w*)\b",
                )?,
                family(
                    SemanticType::Number,
                    r"\b(nr|numar\w*|cod|serie|cif|cui|iban)\b",
                )?,
            ],
            key_only_families: vec![
                family(SemanticType::Table, r"\b(lista|tabel\w*)\b")?,
                family(
                    SemanticType::Text,
                    r"\b(descriere\w*|observati\w*|mentiuni\w*|detalii|obiect\w*)\b",
                )?,
            ],
            tags: vec![
                tag(Tag::Money, r"\b(suma|sumei|lei|ron|valoare\w*|tva|tax\w*|pret\w*)\b")?,
                tag(Tag::Percent, r"%|\bprocent\w*\b")?,
                tag(Tag::Date, r"\b(data|datei|ziua|luna|anul|termen\w*)\b")?,
                tag(Tag::Duration, r"\b(durat\w*|zile)\b")?,
                tag(Tag::Service, r"\b(servici\w*|furniz\w*|lucrari\w*)\b")?,
                tag(
                    Tag::Address,
                    r"\b(adresa|adresei|sediu\w*|domiciliu\w*|strada|catre)\b",
                )?,
                tag(
                    Tag::Entity,
                    r"\b(in numele|denumire\w*|operator\w*|ofertant\w*|achizitor\w*|autoritat\w*|societat\w*|firm\w*|srl)\b",
                )?,
                tag(
                    Tag::Person,
                    r"\b(subsemnat\w*|nume|prenume\w*|reprezentant\w*|imputernicit\w*|calitate\w*|functi[ae]\w*)\b",
                )?,
                tag(Tag::Identifier, r"\b(cif|cui|cod|nr|numar\w*|serie|cpv)\b")?,
                tag(Tag::Process, r"\b(procedur\w*|contract\w*|achizitie\w*|licitat\w*)\b")?,
            ],
            critical_label: Regex::new(
                r"\b(suma|tva|valoare\w*|procent\w*|data|ziua|luna|anul|valabil\w*|lista|tabel\w*|subcontract\w*)\b",
            )
            .context("failed to compile critical label regex")?,
            duration_paragraph: Regex::new(r"\bdurata de\b.*\bzile\b.*\bpana la data\b")
                .context("failed to compile duration paragraph regex")?,
            coded_value: Regex::new(r"\b\d{8}-\d\b").context("failed to compile CPV regex")?,
            boosts: vec![
                (
                    Regex::new(r"\bcatre\b").context("failed to compile boost regex")?,
                    vec![("catre", 0.2), ("autoritat", 0.2)],
                ),
                (
                    Regex::new(r"\bcif\b").context("failed to compile boost regex")?,
                    vec![("cif", 0.3)],
                ),
                (
                    Regex::new(r"\bcpv\b").context("failed to compile boost regex")?,
                    vec![("cpv", 0.3)],
                ),
                (
                    Regex::new(r"\bnr\b").context("failed to compile boost regex")?,
                    vec![("nr", 0.15), ("numar", 0.15)],
                ),
                (
                    Regex::new(r"\bvalabil\w*\b.*\bpana la data\b")
                        .context("failed to compile boost regex")?,
                    vec![("data expir", 0.2), ("valabil", 0.2), ("durata", 0.15)],
                ),
            ],
        })
    }

    fn canonical(&self, input: &str) -> String {
        let normalized = token_text(input);
        self.owner_phrase
            .replace_all(&normalized, "in numele")
            .into_owned()
    }

    fn family_of(&self, input: &str, with_key_families: bool) -> SemanticType {
        let canonical = self.canonical(input);
        if canonical.is_empty() && !input.contains('%') {
            return SemanticType::Unknown;
        }

        for (slot, pattern) in &self.families {
            let hit = if *slot == SemanticType::Percent {
                input.contains('%') || pattern.is_match(&canonical)
            } else {
                pattern.is_match(&canonical)
            };
            if hit {
                return *slot;
            }
        }

        if with_key_families {
            for (slot, pattern) in &self.key_only_families {
                if pattern.is_match(&canonical) {
                    return *slot;
                }
            }
        }

        SemanticType::Unknown
    }

    pub fn infer_slot_type(&self, span: &FieldSpan) -> SlotType {
        match span.blank_kind {
            BlankKind::Checkbox => return SemanticType::CheckboxGroup,
            BlankKind::DateTriple => return SemanticType::Date,
            _ => {}
        }

        let context = span.context();
        let regions = [
            span.local_label(),
            span.local_trailer(),
            context.as_str(),
            span.paragraph_text.as_str(),
        ];
        for region in regions {
            if contains_checkbox_glyph(region) {
                return SemanticType::CheckboxGroup;
            }
            let inferred = self.family_of(region, false);
            if inferred != SemanticType::Unknown {
                return inferred;
            }
        }
        SemanticType::Unknown
    }

    pub fn infer_key_type(&self, key: &str) -> KeyType {
        self.family_of(key, true)
    }

    pub fn tags(&self, input: &str) -> Vec<Tag> {
        let canonical = self.canonical(input);
        self.tags
            .iter()
            .filter(|(tag, pattern)| {
                if *tag == Tag::Percent && input.contains('%') {
                    return true;
                }
                pattern.is_match(&canonical)
            })
            .map(|(tag, _)| *tag)
            .collect()
    }

    pub fn is_critical_label(&self, label: &str) -> bool {
        self.critical_label.is_match(&normalize_text(label))
    }

    pub fn context_boost(&self, context: &str, key: &str) -> f64 {
        let context = normalize_text(context);
        let key = normalize_text(key);
        let mut boost = 0.0;
        for (trigger, fragments) in &self.boosts {
            if !trigger.is_match(&context) {
                continue;
            }
            for (fragment, amount) in fragments {
                if key.contains(fragment) {
                    boost += amount;
                }
            }
        }
        boost
    }

    pub fn paragraph_expectations(
        &self,
        paragraph_text: &str,
        spans: &[&FieldSpan],
    ) -> Vec<(String, SlotType)> {
        if !self
            .duration_paragraph
            .is_match(&normalize_text(paragraph_text))
        {
            return Vec::new();
        }

        let mut ordered = spans
            .iter()
            .filter(|span| !span.is_checkbox())
            .collect::<Vec<_>>();
        ordered.sort_by_key(|span| span.start);
        if ordered.len() < 2 {
            return Vec::new();
        }

        vec![
            (ordered[0].span_id.clone(), SemanticType::DurationDays),
            (ordered[1].span_id.clone(), SemanticType::Date),
        ]
    }

    pub fn value_matches_type(&self, value: &Value, slot: SlotType) -> bool {
        match slot {
            SemanticType::Unknown => is_scalar(value),
            SemanticType::Text => render_value(value)
                .map(|text| !text.trim().is_empty())
                .unwrap_or(false),
            SemanticType::Date => is_date(value),
            SemanticType::DateParts => is_numericish(value, 4) && !is_date(value),
            SemanticType::DurationDays => is_numericish(value, 10) && !is_date(value),
            SemanticType::Money => is_money(value),
            SemanticType::Percent => is_percent(value),
            SemanticType::Number => is_numberish(value),
            SemanticType::CodedNumber => value
                .as_str()
                .map(|text| self.coded_value.is_match(text))
                .unwrap_or(false),
            SemanticType::OrgName => is_orgish(value),
            SemanticType::OrgAddress => is_addressish(value),
            SemanticType::PersonName => is_personish(value),
            SemanticType::PersonRole => is_role_title(value),
            SemanticType::CheckboxGroup => value.is_string(),
            SemanticType::Table => is_record_list(value),
        }
    }

    pub fn key_satisfies(&self, key_type: KeyType, value: &Value, expected: SlotType) -> bool {
        if !self.value_matches_type(value, expected) {
            return false;
        }
        if key_type == SemanticType::Unknown {
            return true;
        }
        key_type.is_informative() && compatible(expected, key_type)
    }
}

pub fn contains_checkbox_glyph(text: &str) -> bool {
    ["|_|", "|x|", "|X|", "[ ]", "[x]", "[X]"]
        .iter()
        .any(|glyph| text.contains(glyph))
        || text.contains(['☐', '☑', '☒', '□'])
}

pub fn is_date(value: &Value) -> bool {
    value.as_str().and_then(parse_date).is_some()
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

pub fn is_money(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => {
            let lowered = text.to_lowercase();
            if !lowered.chars().any(|character| character.is_ascii_digit()) {
                return false;
            }
            let currency = ["lei", "ron", "eur", "€", "usd"]
                .iter()
                .any(|hint| lowered.contains(hint));
            currency || is_plain_number(&lowered)
        }
        _ => false,
    }
}

pub fn is_percent(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.contains('%') {
                return is_plain_number(&trimmed.replace('%', ""));
            }
            trimmed.chars().count() <= 6 && is_plain_number(trimmed)
        }
        _ => false,
    }
}

pub fn is_numericish(value: &Value, max_len: usize) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.chars().count() > max_len || trimmed.split_whitespace().count() > 2 {
                return false;
            }
            is_plain_number(&trimmed.replace('%', ""))
        }
        _ => false,
    }
}

fn is_numberish(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(text) => {
            let trimmed = text.trim();
            !trimmed.is_empty()
                && trimmed.chars().count() <= 24
                && trimmed.chars().any(|character| character.is_ascii_digit())
                && !is_date(value)
        }
        _ => false,
    }
}

fn is_plain_number(text: &str) -> bool {
    let cleaned = text
        .chars()
        .filter(|character| !matches!(character, '.' | ',' | ' '))
        .collect::<String>();
    !cleaned.is_empty() && cleaned.chars().all(|character| character.is_ascii_digit())
}

const LEGAL_ENTITY_TOKENS: &[&str] = &[
    "srl",
    "sa",
    "sc",
    "snc",
    "scs",
    "pfa",
    "ra",
    "compania",
    "societatea",
    "institutia",
    "asociatia",
    "fundatia",
    "primaria",
    "ltd",
    "llc",
    "inc",
    "gmbh",
];

pub fn is_orgish(value: &Value) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let undotted = text.replace('.', "");
    normalize_text(&undotted)
        .split(|character: char| !character.is_alphanumeric())
        .any(|token| LEGAL_ENTITY_TOKENS.contains(&token))
}

pub fn is_personish(value: &Value) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let trimmed = text.trim();
    if trimmed.chars().any(|character| character.is_ascii_digit()) {
        return false;
    }
    let parts = trimmed.split_whitespace().count();
    (1..=4).contains(&parts)
}

pub fn is_role_title(value: &Value) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let trimmed = text.trim();
    !trimmed.is_empty()
        && !trimmed.chars().any(|character| character.is_ascii_digit())
        && !is_date(value)
        && trimmed.chars().count() <= 40
}

pub fn is_addressish(value: &Value) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    let trimmed = text.trim();
    if trimmed.chars().count() < 12 {
        return false;
    }
    trimmed.contains(',') || trimmed.chars().any(|character| character.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Location, Part};
    use serde_json::json;

    fn lexicon() -> Lexicon {
        Lexicon::new().expect("lexicon compiles")
    }

    fn span(left: &str, right: &str, paragraph: &str) -> FieldSpan {
        FieldSpan {
            span_id: "s".to_string(),
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
            paragraph_text: paragraph.to_string(),
        }
    }

    #[test]
    fn slot_type_prefers_the_blank_own_label() {
        let lexicon = lexicon();
        let paragraph = "Subsemnatul ____, reprezentant al ____";
        let first = span("Subsemnatul ", ", reprezentant al ____", paragraph);
        let second = span("Subsemnatul ____, reprezentant al ", "", paragraph);

        assert_eq!(lexicon.infer_slot_type(&first), SemanticType::PersonName);
        assert_eq!(lexicon.infer_slot_type(&second), SemanticType::OrgName);
    }

    #[test]
    fn slot_type_follows_fixed_priority_within_a_region() {
        let lexicon = lexicon();
        assert_eq!(
            lexicon.infer_slot_type(&span("Cod CPV nr ", "", "")),
            SemanticType::CodedNumber
        );
        assert_eq!(
            lexicon.infer_slot_type(&span("Valoarea fara TVA, data ", "", "")),
            SemanticType::Date
        );
        assert_eq!(
            lexicon.infer_slot_type(&span("Observatii: ", "", "Observatii: ____")),
            SemanticType::Unknown
        );
    }

    #[test]
    fn bracket_checkboxes_mark_a_checkbox_group() {
        let lexicon = lexicon();
        let paragraph = "Optiune ____ [ ] Da [x] Nu";
        assert_eq!(
            lexicon.infer_slot_type(&span("Optiune ", " [ ] Da [x] Nu", paragraph)),
            SemanticType::CheckboxGroup
        );
        assert!(contains_checkbox_glyph("[X] Nu"));
        assert!(contains_checkbox_glyph("☒ Nu"));
        assert!(!contains_checkbox_glyph("Nume [sic]"));
    }

    #[test]
    fn key_types_use_the_same_families() {
        let lexicon = lexicon();
        assert_eq!(lexicon.infer_key_type("Nume reprezentant"), SemanticType::PersonRole);
        assert_eq!(lexicon.infer_key_type("Denumire operator"), SemanticType::OrgName);
        assert_eq!(lexicon.infer_key_type("Data completarii"), SemanticType::Date);
        assert_eq!(lexicon.infer_key_type("Durata (zile)"), SemanticType::DurationDays);
        assert_eq!(lexicon.infer_key_type("Lista servicii"), SemanticType::Table);
        assert_eq!(lexicon.infer_key_type("Procent subcontractare"), SemanticType::Percent);
    }

    #[test]
    fn value_rules_follow_format_checks() {
        let lexicon = lexicon();
        assert!(lexicon.value_matches_type(&json!("2024-05-01"), SemanticType::Date));
        assert!(lexicon.value_matches_type(&json!("01/05/2024"), SemanticType::Date));
        assert!(!lexicon.value_matches_type(&json!("2024-05-01"), SemanticType::DurationDays));
        assert!(lexicon.value_matches_type(&json!("90"), SemanticType::DurationDays));
        assert!(lexicon.value_matches_type(&json!("12.500,00 lei"), SemanticType::Money));
        assert!(!lexicon.value_matches_type(&json!("Ion Popescu"), SemanticType::Money));
        assert!(lexicon.value_matches_type(&json!("15%"), SemanticType::Percent));
        assert!(lexicon.value_matches_type(&json!("ACME S.R.L."), SemanticType::OrgName));
        assert!(!lexicon.value_matches_type(&json!("Vasile Ionescu"), SemanticType::OrgName));
        assert!(lexicon.value_matches_type(&json!("Ion Popescu"), SemanticType::PersonName));
        assert!(!lexicon.value_matches_type(&json!("Ion 2"), SemanticType::PersonName));
        assert!(lexicon.value_matches_type(&json!("Str. Lunga 4, Cluj"), SemanticType::OrgAddress));
        assert!(lexicon.value_matches_type(&json!("45000000-7"), SemanticType::CodedNumber));
        assert!(lexicon.value_matches_type(&json!([{"a": 1}]), SemanticType::Table));
        assert!(!lexicon.value_matches_type(&json!([{"a": 1}]), SemanticType::Unknown));
    }

    #[test]
    fn compatibility_table_keeps_tables_apart() {
        assert!(compatible(SemanticType::Table, SemanticType::Table));
        assert!(!compatible(SemanticType::Unknown, SemanticType::Table));
        assert!(!compatible(SemanticType::Table, SemanticType::Text));
        assert!(compatible(SemanticType::PersonName, SemanticType::PersonRole));
        assert!(!compatible(SemanticType::PersonName, SemanticType::OrgName));
        assert!(types_conflict(SemanticType::PersonName, SemanticType::OrgName));
        assert!(!types_conflict(SemanticType::Unknown, SemanticType::OrgName));
    }

    #[test]
    fn tags_treat_possessive_representation_as_entity() {
        let lexicon = lexicon();
        let tags = lexicon.tags("reprezentant al");
        assert_eq!(tags, vec![Tag::Entity]);
        assert_eq!(lexicon.tags("Nume reprezentant"), vec![Tag::Person]);
    }

    #[test]
    fn duration_paragraph_expects_days_then_date() {
        let lexicon = lexicon();
        let paragraph = "Oferta este valabila pe o durata de ____ zile, pana la data ____";
        let mut days = span("valabila pe o durata de ", " zile", paragraph);
        days.span_id = "days".to_string();
        days.start = 10;
        let mut until = span(" zile, pana la data ", "", paragraph);
        until.span_id = "until".to_string();
        until.start = 40;

        let expectations = lexicon.paragraph_expectations(paragraph, &[&until, &days]);
        assert_eq!(
            expectations,
            vec![
                ("days".to_string(), SemanticType::DurationDays),
                ("until".to_string(), SemanticType::Date),
            ]
        );
    }

    #[test]
    fn context_boost_rewards_known_cues() {
        let lexicon = lexicon();
        assert!(lexicon.context_boost("CIF ____", "CIF operator") >= 0.3);
        assert_eq!(lexicon.context_boost("Observatii", "CIF operator"), 0.0);
    }
}
