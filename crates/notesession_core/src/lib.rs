//! Core session coordination for hierarchical, collaboratively edited notes.
//! This crate owns the note record invariants and the live-session lifecycle.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod session;

pub use config::SessionConfig;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::note::{
    BridgedEdit, BridgedField, InvalidIcon, Note, NoteDraft, NoteId, NotePatch,
    DEFAULT_NOTE_TITLE,
};
pub use repo::note_repo::{NoteFlag, NoteRepository, RepoError, RepoResult, SqliteNoteRepository};
pub use service::hierarchy::{BreadcrumbTruncation, Breadcrumbs, HierarchyIndex};
pub use service::note_service::{NoteService, StoreError, StoreResult};
pub use service::note_store::{CanonicalStore, NoteStore};
pub use session::bridge::{BridgeError, MetadataBridge, ReconcileReport, SaveFailure};
pub use session::key::{DocumentKey, InvalidDocumentKey};
pub use session::provider::{
    CollabProvider, ContentHandle, MemorySharedMap, OpenOptions, ProviderError, ProviderHandle,
    SharedMap,
};
pub use session::registry::{RegistryError, Session, SessionRegistry};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
