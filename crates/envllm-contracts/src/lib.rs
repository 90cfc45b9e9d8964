//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings
//! that appear in machine-readable I/O. Bump rules: a new observation or trace
//! shape gets a new constant; existing constants are never edited in place.

/// Language version emitted by the formatter and the migrator.
pub const ENVLLM_LANG_VERSION: &str = "0.2";

/// Language versions the compat parser accepts.
pub const ENVLLM_LANG_VERSIONS_SUPPORTED: &[&str] = &["0.1", "0.2"];

/// Schema tag carried by every observation record.
pub const OBS_SCHEMA_VERSION: &str = "obs-0.1";

/// Schema tag carried by every trace step.
pub const TRACE_SCHEMA_VERSION: &str = "envllm.trace@0.1.0";

/// Version expected in the top-level `version` field of op table files.
pub const OP_TABLE_SCHEMA_VERSION: &str = "envllm.ops@0.1.0";

/// Identifier every program may reference without declaring: the task prompt.
pub const PROMPT_ALIAS: &str = "PROMPT";

/// Capability name that marks an operation as side-effect free.
pub const CAP_PURE: &str = "pure";
