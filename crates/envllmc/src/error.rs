//! Execution-time error taxonomy.
//!
//! Every variant maps onto an observation status; the session converts
//! terminal errors into structured observations instead of propagating them
//! past its boundary.

use std::fmt;

use crate::token::Loc;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    /// A resource budget (statements, wall clock, subcalls, recursion) ran out.
    BudgetExceeded(String),
    /// An op demanded a capability the policy does not grant.
    CapabilityDenied(String),
    /// The embedder cancelled the run before completion.
    Cancelled(String),
    /// Everything else that stops execution: undefined variables, assertion
    /// failures, handler coercion failures, host subcall failures.
    Runtime(String),
}

impl ExecError {
    pub fn budget(msg: impl Into<String>) -> Self {
        ExecError::BudgetExceeded(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        ExecError::CapabilityDenied(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        ExecError::Runtime(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            ExecError::BudgetExceeded(m)
            | ExecError::CapabilityDenied(m)
            | ExecError::Cancelled(m)
            | ExecError::Runtime(m) => m,
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ExecError {}

/// One entry of the observation `errors` list.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObsError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<ObsLoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObsLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl From<&Loc> for ObsLoc {
    fn from(loc: &Loc) -> Self {
        Self {
            file: loc.file.clone(),
            line: loc.line,
            col: loc.col,
        }
    }
}
