//! Document keys naming collaborative session slots.

use crate::model::note::NoteId;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NOTE_KEY_PREFIX: &str = "note:";

static DOCUMENT_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").expect("valid document key regex")
});

/// Deterministic identifier of one collaborative document slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Key used for the session of one note.
    pub fn for_note(note_id: NoteId) -> Self {
        Self(format!("{NOTE_KEY_PREFIX}{note_id}"))
    }

    /// Parses a free-form key such as `doc-1` or `note:<uuid>`.
    pub fn parse(value: &str) -> Result<Self, InvalidDocumentKey> {
        let trimmed = value.trim();
        if !DOCUMENT_KEY_RE.is_match(trimmed) {
            return Err(InvalidDocumentKey(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Note id encoded in a `note:` key, if any.
    pub fn note_id(&self) -> Option<NoteId> {
        self.0
            .strip_prefix(NOTE_KEY_PREFIX)
            .and_then(|rest| Uuid::parse_str(rest).ok())
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected document key input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDocumentKey(pub String);

impl Display for InvalidDocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid document key: `{}`", self.0)
    }
}

impl Error for InvalidDocumentKey {}

#[cfg(test)]
mod tests {
    use super::DocumentKey;
    use uuid::Uuid;

    #[test]
    fn for_note_is_deterministic_and_reversible() {
        let note_id = Uuid::new_v4();
        let key = DocumentKey::for_note(note_id);
        assert_eq!(key, DocumentKey::for_note(note_id));
        assert_eq!(key.note_id(), Some(note_id));
        assert_eq!(DocumentKey::parse(key.as_str()).expect("own keys parse"), key);
    }

    #[test]
    fn parse_accepts_free_form_names() {
        let key = DocumentKey::parse(" doc-1 ").expect("trimmed key should parse");
        assert_eq!(key.as_str(), "doc-1");
        assert_eq!(key.note_id(), None);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for raw in ["", "   ", ":doc", "-doc", "doc has space", "doc/1"] {
            assert!(DocumentKey::parse(raw).is_err(), "`{raw}` should be rejected");
        }
    }
}
