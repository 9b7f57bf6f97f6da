//! Note domain model.
//!
//! # Responsibility
//! - Define the canonical note record and its mutation inputs.
//! - Name the metadata fields bridged into collaborative sessions.
//!
//! # Invariants
//! - `id` is stable and never reused for another note.
//! - `is_trashed` is a soft flag; trashed notes keep their `parent_id`.
//! - Notes are never hard-deleted by core.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable note identifier.
pub type NoteId = Uuid;

/// Title given to notes created without one.
pub const DEFAULT_NOTE_TITLE: &str = "Untitled";

const MAX_ICON_CHARS: usize = 16;

/// Canonical note metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    /// Single glyph (usually an emoji), or `None`.
    pub icon: Option<String>,
    /// `None` means root-level note.
    pub parent_id: Option<NoteId>,
    pub is_trashed: bool,
    pub is_locked: bool,
    pub is_offline_enabled: bool,
    /// Epoch ms of the last content-level edit.
    pub last_edited_at: i64,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Stable child order key within one parent.
    #[serde(skip)]
    pub sort_order: i64,
}

impl Note {
    /// Returns whether the note shows up in hierarchy listings.
    pub fn is_visible(&self) -> bool {
        !self.is_trashed
    }

    /// Reads the current value of one bridged field.
    pub fn bridged_value(&self, field: BridgedField) -> Option<&str> {
        match field {
            BridgedField::Title => Some(self.title.as_str()),
            BridgedField::Icon => self.icon.as_deref(),
        }
    }
}

/// Input for creating a note. Defaults produce an untitled root note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub parent_id: Option<NoteId>,
    pub is_offline_enabled: bool,
}

impl NoteDraft {
    /// Draft for a child note under `parent_id`.
    pub fn child_of(parent_id: NoteId) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Partial metadata update. `None` leaves a field unchanged; for `icon`,
/// `Some(None)` clears the icon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    pub title: Option<String>,
    pub icon: Option<Option<String>>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.icon.is_none()
    }

    /// Folds one bridged edit into this patch, replacing any earlier value
    /// for the same field.
    pub fn apply_edit(&mut self, edit: BridgedEdit) {
        match edit {
            BridgedEdit::Title(value) => self.title = Some(value),
            BridgedEdit::Icon(value) => self.icon = Some(value),
        }
    }

    /// Fields carried by this patch, in declaration order.
    pub fn fields(&self) -> Vec<BridgedField> {
        let mut fields = Vec::with_capacity(2);
        if self.title.is_some() {
            fields.push(BridgedField::Title);
        }
        if self.icon.is_some() {
            fields.push(BridgedField::Icon);
        }
        fields
    }
}

impl From<BridgedEdit> for NotePatch {
    fn from(value: BridgedEdit) -> Self {
        let mut patch = Self::default();
        patch.apply_edit(value);
        patch
    }
}

/// Metadata fields mirrored between a session's shared map and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgedField {
    Title,
    Icon,
}

impl BridgedField {
    pub const ALL: [BridgedField; 2] = [BridgedField::Title, BridgedField::Icon];

    /// Key under which the field lives in a collaborative map.
    pub fn map_key(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Icon => "icon",
        }
    }
}

impl Display for BridgedField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.map_key())
    }
}

/// One user edit of a bridged field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "value")]
pub enum BridgedEdit {
    Title(String),
    Icon(Option<String>),
}

impl BridgedEdit {
    pub fn field(&self) -> BridgedField {
        match self {
            Self::Title(_) => BridgedField::Title,
            Self::Icon(_) => BridgedField::Icon,
        }
    }

    /// Value as stored in a collaborative map; `None` removes the key.
    pub fn map_value(&self) -> Option<&str> {
        match self {
            Self::Title(value) => Some(value.as_str()),
            Self::Icon(value) => value.as_deref(),
        }
    }
}

/// Icon input rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIcon(pub String);

impl Display for InvalidIcon {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "icon must be a single glyph without whitespace, got `{}`", self.0)
    }
}

impl Error for InvalidIcon {}

/// Normalizes icon input: blank means "no icon".
///
/// The length cap counts scalar values, not graphemes.
pub fn normalize_icon(value: Option<&str>) -> Result<Option<String>, InvalidIcon> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_ICON_CHARS || trimmed.chars().any(char::is_whitespace) {
        return Err(InvalidIcon(raw.to_string()));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{normalize_icon, BridgedEdit, BridgedField, NotePatch};

    #[test]
    fn normalize_icon_treats_blank_as_none() {
        assert_eq!(normalize_icon(Some("   ")).expect("blank is valid"), None);
        assert_eq!(normalize_icon(None).expect("none is valid"), None);
    }

    #[test]
    fn normalize_icon_accepts_multi_codepoint_emoji() {
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        assert_eq!(
            normalize_icon(Some(family)).expect("zwj emoji should be accepted"),
            Some(family.to_string())
        );
    }

    #[test]
    fn normalize_icon_rejects_words() {
        assert!(normalize_icon(Some("two words")).is_err());
        assert!(normalize_icon(Some("abcdefghijklmnopqrstuvwxyz")).is_err());
    }

    #[test]
    fn patch_keeps_only_latest_edit_per_field() {
        let mut patch = NotePatch::default();
        patch.apply_edit(BridgedEdit::Title("a".to_string()));
        patch.apply_edit(BridgedEdit::Title("ab".to_string()));
        patch.apply_edit(BridgedEdit::Icon(None));
        assert_eq!(patch.title.as_deref(), Some("ab"));
        assert_eq!(patch.icon, Some(None));
        assert_eq!(patch.fields(), vec![BridgedField::Title, BridgedField::Icon]);
    }

    #[test]
    fn bridged_edit_serializes_with_field_tag() {
        let json = serde_json::to_string(&BridgedEdit::Title("Plan".to_string()))
            .expect("edit should serialize");
        assert_eq!(json, r#"{"field":"title","value":"Plan"}"#);
    }
}
