//! Repository layer over canonical note storage.
//!
//! # Responsibility
//! - Define the note data access contract.
//! - Isolate SQLite query details from store orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `CycleDetected`) in
//!   addition to DB transport errors.

pub mod note_repo;
