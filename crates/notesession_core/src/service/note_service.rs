//! Note record use-case service.
//!
//! # Responsibility
//! - Validate note inputs above the repository layer.
//! - Enforce hierarchy invariants for create and move.
//! - Read back every mutation so callers get the committed record.
//!
//! # Invariants
//! - A move never places a note under itself or one of its descendants.
//! - A move target parent must exist; it may be trashed.
//! - A create parent must exist and must not be trashed.
//! - Trash, lock, and offline toggles leave `last_edited_at` untouched;
//!   metadata updates and moves bump it.

use crate::model::note::{normalize_icon, InvalidIcon, Note, NoteDraft, NoteId, NotePatch};
use crate::repo::note_repo::{detect_cycle, NoteFlag, NoteRepository, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by note record operations.
#[derive(Debug)]
pub enum StoreError {
    /// Referenced note (target or parent) does not exist.
    NotFound(NoteId),
    /// Move would make the hierarchy cyclic.
    CyclicMoveRejected { note_id: NoteId, parent_id: NoteId },
    /// Icon input is not a single glyph.
    InvalidIcon(InvalidIcon),
    /// Write succeeded but read-back did not return the record.
    InconsistentState(&'static str),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::CyclicMoveRejected { note_id, parent_id } => write!(
                f,
                "cyclic move rejected: note {note_id} cannot live under {parent_id}"
            ),
            Self::InvalidIcon(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent note state: {details}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIcon(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for StoreError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::CycleDetected { note_id, parent_id } => {
                Self::CyclicMoveRejected { note_id, parent_id }
            }
            other => Self::Repo(other),
        }
    }
}

impl From<InvalidIcon> for StoreError {
    fn from(value: InvalidIcon) -> Self {
        Self::InvalidIcon(value)
    }
}

/// Note record service facade over a repository implementation.
pub struct NoteService<R: NoteRepository> {
    repo: R,
}

impl<R: NoteRepository> NoteService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates one note. Missing title defaults to "Untitled".
    pub fn create_note(&self, draft: NoteDraft) -> StoreResult<Note> {
        let icon = normalize_icon(draft.icon.as_deref())?;
        if let Some(parent_id) = draft.parent_id {
            self.ensure_live_parent(parent_id)?;
        }
        let normalized = NoteDraft { icon, ..draft };
        self.repo.insert_note(&normalized).map_err(Into::into)
    }

    /// Loads one note, trashed or not.
    pub fn get_note(&self, id: NoteId) -> StoreResult<Note> {
        self.repo.get_note(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Applies a metadata patch; an empty patch is a plain read.
    pub fn update_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<Note> {
        let icon = match &patch.icon {
            Some(value) => Some(normalize_icon(value.as_deref())?),
            None => None,
        };
        self.repo.update_metadata(
            id,
            patch.title.as_deref(),
            icon.as_ref().map(|value| value.as_deref()),
        )?;
        self.read_back(id, "updated note not found in read-back")
    }

    /// Re-parents one note; `None` moves it to the root level.
    pub fn move_note(&self, id: NoteId, new_parent: Option<NoteId>) -> StoreResult<Note> {
        let current = self.get_note(id)?;
        if let Some(parent_id) = new_parent {
            // Trashed parents are valid targets; only absence and cycles reject.
            if parent_id == id
                || detect_cycle(id, parent_id, |cursor| self.repo.parent_of(cursor))?
            {
                return Err(StoreError::CyclicMoveRejected {
                    note_id: id,
                    parent_id,
                });
            }
        }
        if current.parent_id == new_parent {
            return Ok(current);
        }

        self.repo.move_note(id, new_parent)?;
        self.read_back(id, "moved note not found in read-back")
    }

    pub fn set_trashed(&self, id: NoteId, value: bool) -> StoreResult<Note> {
        self.set_flag(id, NoteFlag::Trashed, value)
    }

    pub fn set_locked(&self, id: NoteId, value: bool) -> StoreResult<Note> {
        self.set_flag(id, NoteFlag::Locked, value)
    }

    pub fn set_offline_enabled(&self, id: NoteId, value: bool) -> StoreResult<Note> {
        self.set_flag(id, NoteFlag::OfflineEnabled, value)
    }

    /// Lists every note in sibling order.
    pub fn list_all(&self) -> StoreResult<Vec<Note>> {
        self.repo.list_all().map_err(Into::into)
    }

    /// Lists trashed notes, most recently edited first.
    pub fn list_trashed(&self) -> StoreResult<Vec<Note>> {
        self.repo.list_trashed().map_err(Into::into)
    }

    fn set_flag(&self, id: NoteId, flag: NoteFlag, value: bool) -> StoreResult<Note> {
        self.repo.set_flag(id, flag, value)?;
        self.read_back(id, "flagged note not found in read-back")
    }

    fn ensure_live_parent(&self, parent_id: NoteId) -> StoreResult<()> {
        match self.repo.get_note(parent_id)? {
            Some(parent) if parent.is_visible() => Ok(()),
            _ => Err(StoreError::NotFound(parent_id)),
        }
    }

    fn read_back(&self, id: NoteId, details: &'static str) -> StoreResult<Note> {
        self.repo
            .get_note(id)?
            .ok_or(StoreError::InconsistentState(details))
    }
}
