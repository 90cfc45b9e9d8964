//! Trace sinks.
//!
//! An optional observer receives a step record for every parse/lint/exec
//! decision. The JSON-lines sink is the production implementation; the
//! memory sink collects steps for tests. A redactor hashes values under
//! secret-adjacent keys before emission.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

use envllm_contracts::TRACE_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Parse,
    Lint,
    Rewrite,
    Capability,
    Exec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Json>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub trace_version: String,
    pub phase: Phase,
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Json>,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub ts_ms: u64,
}

impl TraceStep {
    pub fn new(phase: Phase, decision: Decision) -> Self {
        Self {
            trace_version: TRACE_SCHEMA_VERSION.to_string(),
            phase,
            seq: 0,
            op: None,
            inputs: None,
            outputs: None,
            decision,
            error: None,
            rule_id: None,
            hint: None,
            ts_ms: now_ms(),
        }
    }

    pub fn with_op(mut self, op: &str) -> Self {
        self.op = Some(op.to_string());
        self
    }

    pub fn with_error(mut self, code: &str, message: &str) -> Self {
        self.error = Some(TraceError {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        });
        self
    }

    pub fn with_rule(mut self, rule_id: &str) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    pub fn redact(&mut self, redactor: &Redactor) {
        if let Some(inputs) = self.inputs.take() {
            self.inputs = Some(redactor.redact(inputs));
        }
        if let Some(outputs) = self.outputs.take() {
            self.outputs = Some(redactor.redact(outputs));
        }
        if let Some(err) = &mut self.error {
            if let Some(details) = err.details.take() {
                err.details = Some(redactor.redact(details));
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub trait Sink {
    fn emit(&mut self, step: TraceStep) -> Result<(), String>;
    fn close(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Appends one JSON object per step to a file.
pub struct JsonlSink {
    file: Mutex<File>,
    redactor: Redactor,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self, String> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("open trace file {}: {e}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            redactor: Redactor::strict(),
        })
    }
}

impl Sink for JsonlSink {
    fn emit(&mut self, mut step: TraceStep) -> Result<(), String> {
        step.redact(&self.redactor);
        let line = serde_json::to_string(&step).map_err(|e| e.to_string())?;
        let mut file = self.file.lock().map_err(|_| "trace file poisoned")?;
        writeln!(file, "{line}").map_err(|e| e.to_string())
    }
}

/// Collects steps in memory for tests.
#[derive(Default)]
pub struct MemorySink {
    pub steps: Vec<TraceStep>,
}

impl Sink for MemorySink {
    fn emit(&mut self, step: TraceStep) -> Result<(), String> {
        self.steps.push(step);
        Ok(())
    }
}

static SENSITIVE_TOKENS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["pass", "token", "key", "secret", "auth"]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionPolicy {
    /// Mask secret-adjacent values.
    Strict,
    /// Pass everything through (local debugging only).
    Debug,
}

#[derive(Debug, Clone)]
pub struct Redactor {
    policy: RedactionPolicy,
}

impl Redactor {
    pub fn strict() -> Self {
        Self {
            policy: RedactionPolicy::Strict,
        }
    }

    pub fn debug() -> Self {
        Self {
            policy: RedactionPolicy::Debug,
        }
    }

    pub fn redact(&self, input: Json) -> Json {
        if self.policy == RedactionPolicy::Debug {
            return input;
        }
        self.redact_value(input, false)
    }

    fn redact_value(&self, input: Json, sensitive: bool) -> Json {
        match input {
            Json::String(s) if sensitive => Json::String(mask(&s)),
            Json::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    let hit = is_sensitive_key(&k);
                    let v = if hit && !v.is_object() && !v.is_array() {
                        Json::String(mask(&render(&v)))
                    } else {
                        self.redact_value(v, hit)
                    };
                    out.insert(k, v);
                }
                Json::Object(out)
            }
            Json::Array(items) => Json::Array(
                items
                    .into_iter()
                    .map(|v| self.redact_value(v, sensitive))
                    .collect(),
            ),
            other if sensitive => Json::String(mask(&render(&other))),
            other => other,
        }
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_TOKENS.iter().any(|t| key.contains(t))
}

fn render(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mask(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    format!(
        "[REDACTED:len={},hash={:02x}{:02x}{:02x}{:02x}]",
        s.len(),
        digest[0],
        digest[1],
        digest[2],
        digest[3]
    )
}
