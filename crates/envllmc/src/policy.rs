//! Resource-and-capability envelope for a session.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits of zero mean "unlimited" for the counting budgets;
/// `max_wall_time_ms` of zero disables the deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub max_stmts_per_cell: u64,
    #[serde(default)]
    pub max_wall_time_ms: u64,
    #[serde(default)]
    pub max_total_bytes: u64,
    #[serde(default)]
    pub max_recursion_depth: u64,
    #[serde(default)]
    pub max_subcalls: u64,
    #[serde(default)]
    pub allowed_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub allowed_read_paths: Vec<PathBuf>,
    #[serde(default)]
    pub allowed_write_paths: Vec<PathBuf>,
}

impl Policy {
    /// Wide-open limits for tests and the REPL. Grants no capabilities.
    pub fn permissive() -> Self {
        Self {
            max_stmts_per_cell: 1000,
            max_wall_time_ms: 30_000,
            max_total_bytes: 1 << 20,
            max_recursion_depth: 8,
            max_subcalls: 16,
            ..Default::default()
        }
    }

    pub fn allow_capability(mut self, cap: &str) -> Self {
        self.allowed_capabilities.insert(cap.to_string());
        self
    }

    pub fn max_wall_time(&self) -> Option<Duration> {
        (self.max_wall_time_ms > 0).then(|| Duration::from_millis(self.max_wall_time_ms))
    }

    /// Whitelist check used by the filesystem module before any I/O. The path
    /// is normalized to an absolute path and must be prefix-covered by an
    /// allowed root.
    pub fn validate_path(&self, path: &str, write: bool) -> Result<(), String> {
        let abs = absolutize(Path::new(path));
        let whitelist = if write {
            &self.allowed_write_paths
        } else {
            &self.allowed_read_paths
        };

        for root in whitelist {
            let abs_root = absolutize(root);
            if abs.starts_with(&abs_root) {
                return Ok(());
            }
        }

        let mode = if write { "write" } else { "read" };
        Err(format!(
            "security_error: {mode} access to {path:?} denied by policy"
        ))
    }
}

/// Lexical normalization: resolves `.` and `..` segments against the current
/// directory without touching the filesystem, so the check also covers paths
/// that do not exist yet.
fn absolutize(path: &Path) -> PathBuf {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    };
    let mut out = base;
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
