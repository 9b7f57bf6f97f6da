//! Note domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by the store and session layers.
//!
//! # Invariants
//! - Every note is identified by a stable `NoteId`.
//! - Trash is a soft flag, never a hard delete.

pub mod note;
