//! Stateless op handler implementations over the session's text store.

pub mod fields;
pub mod json;
pub mod rows;
pub mod text;

use crate::error::ExecError;
use crate::session::Session;
use crate::value::Value;

/// Reads the text behind a TEXT value. Signature validation guarantees the
/// kind; a missing handle is an execution error surfaced to the program.
pub(crate) fn text_of(session: &Session, value: &Value) -> Result<String, ExecError> {
    let handle = value
        .as_text()
        .ok_or_else(|| ExecError::runtime(format!("expected TEXT, got {}", value.kind())))?;
    session
        .store()
        .get(handle)
        .map(str::to_string)
        .ok_or_else(|| ExecError::runtime(format!("text not found: {}", handle.id)))
}
