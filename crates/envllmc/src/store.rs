//! Content-addressed text arena.
//!
//! Handles are derived from a sha256 of the bytes, so identical text interns
//! once and handle equality is content equality. All slicing is byte-based;
//! windows and slices clamp to `[0, len]` and re-intern through `add`.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::value::TextHandle;

/// Bytes of interned text carried inline on the handle as a preview.
const PREVIEW_LIMIT: usize = 120;

#[derive(Debug, Default)]
pub struct TextStore {
    content: HashMap<String, String>,
}

impl TextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, text: &str) -> TextHandle {
        let id = content_id(text);
        let handle = TextHandle {
            id: id.clone(),
            bytes: text.len(),
            preview: Some(preview_of(text)),
            preview_bytes: Some(text.len().min(PREVIEW_LIMIT)),
        };
        self.content.entry(id).or_insert_with(|| text.to_string());
        handle
    }

    pub fn get(&self, handle: &TextHandle) -> Option<&str> {
        self.content.get(&handle.id).map(String::as_str)
    }

    /// Substring `[center-radius, center+radius)` clamped to the text bounds.
    pub fn window(
        &mut self,
        handle: &TextHandle,
        center: i64,
        radius: i64,
    ) -> Result<TextHandle, String> {
        let text = self
            .content
            .get(&handle.id)
            .ok_or_else(|| format!("text not found: {}", handle.id))?
            .clone();
        let len = text.len() as i64;
        let start = (center - radius).clamp(0, len) as usize;
        let end = (center + radius).clamp(start as i64, len) as usize;
        let snippet = byte_substring(&text, start, end);
        Ok(self.add(&snippet))
    }

    /// Substring `[start, end)` clamped to the text bounds; an inverted range
    /// interns the empty string.
    pub fn slice(
        &mut self,
        handle: &TextHandle,
        start: i64,
        end: i64,
    ) -> Result<TextHandle, String> {
        let text = self
            .content
            .get(&handle.id)
            .ok_or_else(|| format!("text not found: {}", handle.id))?
            .clone();
        let len = text.len() as i64;
        let start = start.clamp(0, len) as usize;
        let end = end.clamp(0, len) as usize;
        if start >= end {
            return Ok(self.add(""));
        }
        let snippet = byte_substring(&text, start, end);
        Ok(self.add(&snippet))
    }
}

/// Byte-offset substring. Offsets landing inside a multibyte codepoint keep
/// the raw bytes readable by replacing the torn codepoint.
fn byte_substring(text: &str, start: usize, end: usize) -> String {
    if text.is_char_boundary(start) && text.is_char_boundary(end) {
        return text[start..end].to_string();
    }
    String::from_utf8_lossy(&text.as_bytes()[start..end]).into_owned()
}

fn content_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(2 + digest.len() * 2);
    id.push_str("t:");
    for b in digest {
        id.push_str(&format!("{b:02x}"));
    }
    id
}

fn preview_of(text: &str) -> String {
    if text.len() <= PREVIEW_LIMIT {
        return text.to_string();
    }
    // Back off to a char boundary so the preview stays valid UTF-8.
    let mut cut = PREVIEW_LIMIT;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_deterministic_and_deduplicates() {
        let mut store = TextStore::new();
        let a = store.add("hello");
        let b = store.add("hello");
        let c = store.add("other");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.bytes, 5);
        assert_eq!(store.get(&a), Some("hello"));
    }

    #[test]
    fn window_clamps_to_bounds() {
        let mut store = TextStore::new();
        let h = store.add("The secret code is 12345. Use it wisely.");
        let w = store.window(&h, 19, 5).unwrap();
        assert_eq!(store.get(&w), Some("e is 12345"));

        let clipped = store.window(&h, 2, 10).unwrap();
        assert_eq!(store.get(&clipped), Some("The secret c"));

        let past_end = store.window(&h, 1000, 5).unwrap();
        assert_eq!(store.get(&past_end), Some(""));
    }

    #[test]
    fn slice_clamps_and_empty_on_inverted_range() {
        let mut store = TextStore::new();
        let h = store.add("abcdef");
        let s = store.slice(&h, 1, 3).unwrap();
        assert_eq!(store.get(&s), Some("bc"));

        let inverted = store.slice(&h, 4, 2).unwrap();
        assert_eq!(store.get(&inverted), Some(""));

        let clamped = store.slice(&h, -5, 100).unwrap();
        assert_eq!(store.get(&clamped), Some("abcdef"));
    }

    #[test]
    fn unknown_handle_fails_window_and_slice() {
        let mut store = TextStore::new();
        let ghost = TextHandle {
            id: "t:missing".into(),
            bytes: 0,
            preview: None,
            preview_bytes: None,
        };
        assert!(store.get(&ghost).is_none());
        assert!(store.window(&ghost, 0, 1).is_err());
        assert!(store.slice(&ghost, 0, 1).is_err());
    }

    #[test]
    fn window_through_a_multibyte_codepoint_does_not_panic() {
        let mut store = TextStore::new();
        let h = store.add("héllo"); // é is two bytes
        let w = store.window(&h, 2, 0).unwrap();
        assert_eq!(store.get(&w), Some(""));
        let torn = store.window(&h, 1, 1).unwrap();
        assert!(store.get(&torn).is_some());
    }

    #[test]
    fn long_text_preview_is_bounded() {
        let mut store = TextStore::new();
        let long = "x".repeat(500);
        let h = store.add(&long);
        assert_eq!(h.bytes, 500);
        assert_eq!(h.preview.as_ref().unwrap().len(), 120);
    }
}
