use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::types::SlotType;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceItem {
    pub item_id: String,
    pub label: String,
    pub context: String,
    pub slot_type: SlotType,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub instruction: &'static str,
    pub items: Vec<InferenceItem>,
}

impl InferenceRequest {
    pub fn new(items: Vec<InferenceItem>) -> Self {
        Self {
            instruction: "For each item choose the data key that best fills the blank, \
                          or null when none fits. Answer with JSON: \
                          {\"items\": [{\"item_id\": ..., \"suggested_key\": ..., \"confidence\": 0..1}]}",
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub item_id: String,
    pub key: String,
    pub confidence: f64,
}

pub trait SuggestionSource {
    fn name(&self) -> &str;

    fn suggest(&mut self, request: &InferenceRequest) -> Result<Vec<Suggestion>>;
}

#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }
}

impl SuggestionSource for CommandSource {
    fn name(&self) -> &str {
        &self.program
    }

    fn suggest(&mut self, request: &InferenceRequest) -> Result<Vec<Suggestion>> {
        let payload =
            serde_json::to_vec(request).context("failed to serialize inference request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute inference command {}", self.program))?;

        let started = Instant::now();

        let mut stdin = child
            .stdin
            .take()
            .context("inference command stdin was not captured")?;
        let writer = thread::spawn(move || stdin.write_all(&payload));

        let mut stdout = child
            .stdout
            .take()
            .context("inference command stdout was not captured")?;
        let reader = thread::spawn(move || {
            let mut buffer = String::new();
            stdout.read_to_string(&mut buffer).map(|_| buffer)
        });

        let mut stderr = child
            .stderr
            .take()
            .context("inference command stderr was not captured")?;
        let stderr_reader = thread::spawn(move || {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer);
            buffer
        });

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to poll {}", self.program))?
            {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "inference command {} timed out after {} ms",
                    self.program,
                    self.timeout.as_millis()
                );
            }
            thread::sleep(Duration::from_millis(20));
        };

        // A backend may exit without draining stdin; its answer still counts.
        if let Ok(Err(err)) = writer.join() {
            debug!(program = %self.program, error = %err, "request not fully consumed");
        }

        let output = match reader.join() {
            Ok(result) => result
                .with_context(|| format!("failed to read output of {}", self.program))?,
            Err(_) => bail!("reader thread for {} panicked", self.program),
        };

        if !status.success() {
            let stderr = stderr_reader.join().unwrap_or_default();
            bail!(
                "inference command {} returned non-zero exit status: {}",
                self.program,
                stderr.trim()
            );
        }

        parse_suggestions(&output)
    }
}

pub fn suggest_or_empty(
    source: &mut dyn SuggestionSource,
    request: &InferenceRequest,
) -> Vec<Suggestion> {
    match source.suggest(request) {
        Ok(suggestions) => {
            debug!(
                source = source.name(),
                items = request.items.len(),
                suggestions = suggestions.len(),
                "received suggestions"
            );
            suggestions
        }
        Err(err) => {
            warn!(source = source.name(), error = %err, "inference failed; continuing with local candidates");
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Wrapped { items: Vec<WireItem> },
    Bare(Vec<WireItem>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireItem {
    Ranked {
        item_id: String,
        candidates: Vec<WireCandidate>,
    },
    Single {
        item_id: String,
        #[serde(alias = "suggested_key", alias = "key")]
        suggested: Option<String>,
        #[serde(default)]
        confidence: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    key: String,
    #[serde(default)]
    confidence: Option<f64>,
}

pub fn parse_suggestions(output: &str) -> Result<Vec<Suggestion>> {
    let value = extract_json(output).context("no JSON document in inference output")?;
    let response: WireResponse =
        serde_json::from_value(value).context("inference output has unexpected shape")?;
    let items = match response {
        WireResponse::Wrapped { items } | WireResponse::Bare(items) => items,
    };

    let mut suggestions = Vec::new();
    for item in items {
        match item {
            WireItem::Ranked {
                item_id,
                candidates,
            } => {
                for candidate in candidates {
                    suggestions.push(Suggestion {
                        item_id: item_id.clone(),
                        key: candidate.key,
                        confidence: clamp_confidence(candidate.confidence),
                    });
                }
            }
            WireItem::Single {
                item_id,
                suggested: Some(key),
                confidence,
            } => suggestions.push(Suggestion {
                item_id,
                key,
                confidence: clamp_confidence(confidence),
            }),
            WireItem::Single { suggested: None, .. } => {}
        }
    }
    Ok(suggestions)
}

fn clamp_confidence(confidence: Option<f64>) -> f64 {
    confidence.unwrap_or(0.5).clamp(0.0, 1.0)
}

fn extract_json(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) else {
            continue;
        };
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}
