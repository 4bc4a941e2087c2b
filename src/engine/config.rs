use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::util::read_json;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionPolicy {
    LocalFirst,
    SuggestionFirst,
    CriticalLocal,
}

impl SuggestionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalFirst => "local-first",
            Self::SuggestionFirst => "suggestion-first",
            Self::CriticalLocal => "critical-local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub context_window: usize,
    pub candidate_cap: usize,
    pub accept_threshold: f64,
    pub reuse_penalty: f64,
    pub dissimilar_context_penalty: f64,
    pub reuse_jaccard_floor: f64,
    pub ambiguity_margin: f64,
    pub inference_batch_size: usize,
    pub suggestion_weight: f64,
    pub suggestion_floor: f64,
    pub suggestion_policy: SuggestionPolicy,
    pub repair_rounds: usize,
    pub checkbox_match_threshold: f64,
    pub repeatable_keys: Vec<String>,
    pub inference_command: Option<String>,
    pub inference_args: Vec<String>,
    pub inference_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: 80,
            candidate_cap: 8,
            accept_threshold: 0.30,
            reuse_penalty: 0.25,
            dissimilar_context_penalty: 0.25,
            reuse_jaccard_floor: 0.30,
            ambiguity_margin: 0.08,
            inference_batch_size: 8,
            suggestion_weight: 0.25,
            suggestion_floor: 0.15,
            suggestion_policy: SuggestionPolicy::CriticalLocal,
            repair_rounds: 3,
            checkbox_match_threshold: 0.70,
            repeatable_keys: vec![
                "data completarii".to_string(),
                "data completare".to_string(),
                "completion date".to_string(),
            ],
            inference_command: None,
            inference_args: Vec::new(),
            inference_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "accept_threshold": 0.4,
            "suggestion_policy": "suggestion-first"
        }))
        .expect("partial config");

        assert_eq!(config.accept_threshold, 0.4);
        assert_eq!(config.suggestion_policy, SuggestionPolicy::SuggestionFirst);
        assert_eq!(config.repair_rounds, 3);
        assert_eq!(config.candidate_cap, 8);
        assert_eq!(config.repeatable_keys.len(), 3);
    }
}
