use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRecord {
    values: BTreeMap<String, Value>,
}

impl DataRecord {
    pub fn from_json(raw: Value) -> Result<Self> {
        let Value::Object(entries) = raw else {
            bail!("data record must be a JSON object");
        };

        let mut values = BTreeMap::new();
        for (key, value) in entries {
            let key = nfc_trim(&key);
            if key.is_empty() {
                continue;
            }
            values.insert(key, normalize_value(parse_embedded_json(value)));
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn as_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

fn nfc_trim(value: &str) -> String {
    value.trim().nfc().collect()
}

fn parse_embedded_json(value: Value) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    let stripped = text.trim();
    if !(stripped.starts_with('[') || stripped.starts_with('{')) {
        return value;
    }
    match serde_json::from_str::<Value>(stripped) {
        Ok(parsed) => nest_embedded(parsed),
        Err(_) => value,
    }
}

fn nest_embedded(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(parse_embedded_json).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, parse_embedded_json(value)))
                .collect(),
        ),
        other => parse_embedded_json(other),
    }
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(nfc_trim(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (nfc_trim(&key), normalize_value(value)))
                .collect(),
        ),
        other => other,
    }
}

pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

pub fn is_record_list(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(Value::is_object),
        _ => false,
    }
}
