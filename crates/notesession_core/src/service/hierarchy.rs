//! In-memory hierarchy index derived from note records.
//!
//! # Responsibility
//! - Answer parent/child lookups without touching storage.
//! - Compute breadcrumb paths with bounded, corruption-tolerant walks.
//!
//! # Invariants
//! - The index is a snapshot; it is rebuilt, never patched in place.
//! - Child lists keep storage order (`sort_order ASC, id ASC`).
//! - Trashed notes never appear in `children` output or as breadcrumb
//!   ancestors, but stay indexed so their own children remain reachable.

use crate::model::note::{Note, NoteId};
use log::warn;
use std::collections::HashMap;

/// Why a breadcrumb path stops before a root note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreadcrumbTruncation {
    /// `child` points at a parent that is not in the store.
    BrokenChain { child: NoteId, missing_parent: NoteId },
    /// The walk hit the safety ceiling; the data most likely holds a cycle.
    CeilingReached { ceiling: usize },
}

/// Root-to-note path. The last element is always the requested note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumbs {
    pub path: Vec<Note>,
    pub truncation: Option<BreadcrumbTruncation>,
}

impl Breadcrumbs {
    pub fn is_complete(&self) -> bool {
        self.truncation.is_none()
    }

    pub fn ids(&self) -> Vec<NoteId> {
        self.path.iter().map(|note| note.id).collect()
    }
}

/// Snapshot index over all notes, trashed included.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    notes: HashMap<NoteId, Note>,
    children: HashMap<Option<NoteId>, Vec<NoteId>>,
    ceiling: usize,
}

impl HierarchyIndex {
    /// Builds the index from notes already in sibling order.
    pub fn build(notes: Vec<Note>, ceiling: usize) -> Self {
        let mut children: HashMap<Option<NoteId>, Vec<NoteId>> = HashMap::new();
        let mut by_id = HashMap::with_capacity(notes.len());
        for note in notes {
            children.entry(note.parent_id).or_default().push(note.id);
            by_id.insert(note.id, note);
        }
        Self {
            notes: by_id,
            children,
            ceiling: ceiling.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.notes.contains_key(&id)
    }

    /// Lists non-trashed children of `parent`; `None` lists root notes.
    ///
    /// Trash does not cascade, so a trashed parent still yields its
    /// non-trashed children.
    pub fn children(&self, parent: Option<NoteId>) -> Vec<Note> {
        self.children
            .get(&parent)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.notes.get(id))
                    .filter(|note| note.is_visible())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Computes the ancestor path of `id`, or `None` when `id` is unknown.
    pub fn breadcrumbs(&self, id: NoteId) -> Option<Breadcrumbs> {
        let note = self.notes.get(&id)?;
        let mut reversed = vec![note.clone()];
        let mut truncation = None;
        let mut visited = 1usize;
        let mut child = note.id;
        let mut cursor = note.parent_id;

        while let Some(parent_id) = cursor {
            if visited >= self.ceiling {
                warn!(
                    "event=breadcrumb_ceiling module=hierarchy status=truncated note_id={} ceiling={}",
                    id, self.ceiling
                );
                truncation = Some(BreadcrumbTruncation::CeilingReached {
                    ceiling: self.ceiling,
                });
                break;
            }
            visited += 1;

            let Some(parent) = self.notes.get(&parent_id) else {
                warn!(
                    "event=breadcrumb_broken_chain module=hierarchy status=truncated note_id={} child_id={} missing_parent={}",
                    id, child, parent_id
                );
                truncation = Some(BreadcrumbTruncation::BrokenChain {
                    child,
                    missing_parent: parent_id,
                });
                break;
            };
            if parent.is_visible() {
                reversed.push(parent.clone());
            }
            child = parent.id;
            cursor = parent.parent_id;
        }

        reversed.reverse();
        Some(Breadcrumbs {
            path: reversed,
            truncation,
        })
    }
}
