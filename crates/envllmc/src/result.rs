//! Observation records.
//!
//! The same shape is emitted on success and failure so the consuming model
//! can branch deterministically on `status`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ObsError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
    BudgetExceeded,
    CapabilityDenied,
    CompileError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    pub name: String,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStats {
    pub used: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event tag: "op", "print", "subcall".
    pub t: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub into: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Event {
    pub fn op(op: &str, into: Option<&str>, ms: u64) -> Self {
        Self {
            t: "op".to_string(),
            op: Some(op.to_string()),
            into: into.map(str::to_string),
            ms: Some(ms),
            detail: None,
        }
    }

    pub fn print(detail: String) -> Self {
        Self {
            t: "print".to_string(),
            detail: Some(detail),
            ..Default::default()
        }
    }

    pub fn subcall(detail: String) -> Self {
        Self {
            t: "subcall".to_string(),
            detail: Some(detail),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationFlags {
    pub obs: bool,
    pub prints: bool,
    pub previews: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub schema_version: String,
    pub cell: CellInfo,
    pub status: Status,
    pub vars_delta: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#final: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub budgets: BTreeMap<String, BudgetStats>,
    pub events: Vec<Event>,
    pub errors: Vec<ObsError>,
    pub truncated: TruncationFlags,
}

impl Observation {
    /// A compile-error observation: no cell ever ran.
    pub fn compile_error(errors: Vec<ObsError>) -> Self {
        Self {
            schema_version: envllm_contracts::OBS_SCHEMA_VERSION.to_string(),
            cell: CellInfo::default(),
            status: Status::CompileError,
            vars_delta: BTreeMap::new(),
            r#final: None,
            result: None,
            budgets: BTreeMap::new(),
            events: Vec::new(),
            errors,
            truncated: TruncationFlags::default(),
        }
    }

    /// A lint-failure observation: findings block execution.
    pub fn lint_failure(errors: Vec<ObsError>) -> Self {
        Self {
            status: Status::Error,
            ..Self::compile_error(errors)
        }
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| e.to_string())
    }
}
