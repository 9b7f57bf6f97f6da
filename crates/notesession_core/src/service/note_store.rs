//! Async note record store.
//!
//! # Responsibility
//! - Own the SQLite connection and serialize every store call through it.
//! - Keep a lazily rebuilt hierarchy index for listings and breadcrumbs.
//! - Serve as the canonical persistence target of the metadata bridge.
//!
//! # Invariants
//! - Every call awaits the connection lock; mutations to one note are
//!   applied in lock acquisition order.
//! - Any successful mutation invalidates the cached index before returning.
//! - An index built from a snapshot older than the latest mutation is never
//!   cached.

use crate::config::SessionConfig;
use crate::db::{open_db, open_db_in_memory};
use crate::model::note::{Note, NoteDraft, NoteId, NotePatch};
use crate::repo::note_repo::{RepoError, SqliteNoteRepository};
use crate::service::hierarchy::{Breadcrumbs, HierarchyIndex};
use crate::service::note_service::{NoteService, StoreError, StoreResult};
use async_trait::async_trait;
use log::{info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

/// Canonical persistence consumed by the metadata bridge.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Loads the durable record of one note.
    async fn load_note(&self, note_id: NoteId) -> StoreResult<Note>;
    /// Writes bridged metadata fields and returns the committed record.
    async fn write_metadata(&self, note_id: NoteId, patch: &NotePatch) -> StoreResult<Note>;
}

struct CachedIndex {
    version: u64,
    index: Arc<HierarchyIndex>,
}

/// Shareable note record store.
pub struct NoteStore {
    conn: Mutex<Connection>,
    index: std::sync::Mutex<Option<CachedIndex>>,
    structure_version: AtomicU64,
    breadcrumb_ceiling: usize,
}

impl NoteStore {
    /// Wraps a migrated connection.
    pub fn new(conn: Connection, config: &SessionConfig) -> StoreResult<Self> {
        SqliteNoteRepository::try_new(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            index: std::sync::Mutex::new(None),
            structure_version: AtomicU64::new(0),
            breadcrumb_ceiling: config.normalized().breadcrumb_ceiling,
        })
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>, config: &SessionConfig) -> StoreResult<Self> {
        let conn = open_db(path).map_err(RepoError::from)?;
        Self::new(conn, config)
    }

    /// Opens an ephemeral in-memory store.
    pub fn open_in_memory(config: &SessionConfig) -> StoreResult<Self> {
        let conn = open_db_in_memory().map_err(RepoError::from)?;
        Self::new(conn, config)
    }

    pub async fn create(&self, draft: NoteDraft) -> StoreResult<Note> {
        let note = self.mutate(|service| service.create_note(draft)).await?;
        info!(
            "event=note_create module=store status=ok note_id={} has_parent={}",
            note.id,
            note.parent_id.is_some()
        );
        Ok(note)
    }

    pub async fn get(&self, id: NoteId) -> StoreResult<Note> {
        self.with_service(|service| service.get_note(id)).await
    }

    pub async fn update(&self, id: NoteId, patch: NotePatch) -> StoreResult<Note> {
        self.mutate(|service| service.update_note(id, &patch)).await
    }

    /// Re-parents `id` under `new_parent` (`None` = root).
    pub async fn move_note(&self, id: NoteId, new_parent: Option<NoteId>) -> StoreResult<Note> {
        let result = self
            .mutate(|service| service.move_note(id, new_parent))
            .await;
        match &result {
            Ok(_) => info!(
                "event=note_move module=store status=ok note_id={} to_root={}",
                id,
                new_parent.is_none()
            ),
            Err(StoreError::CyclicMoveRejected { parent_id, .. }) => warn!(
                "event=note_move module=store status=rejected note_id={} parent_id={} error_code=cyclic_move",
                id, parent_id
            ),
            Err(err) => warn!(
                "event=note_move module=store status=error note_id={} error={}",
                id, err
            ),
        }
        result
    }

    pub async fn set_trashed(&self, id: NoteId, value: bool) -> StoreResult<Note> {
        self.mutate(|service| service.set_trashed(id, value)).await
    }

    pub async fn set_locked(&self, id: NoteId, value: bool) -> StoreResult<Note> {
        self.mutate(|service| service.set_locked(id, value)).await
    }

    pub async fn set_offline_enabled(&self, id: NoteId, value: bool) -> StoreResult<Note> {
        self.mutate(|service| service.set_offline_enabled(id, value))
            .await
    }

    /// Lists trashed notes, most recently edited first.
    pub async fn list_trashed(&self) -> StoreResult<Vec<Note>> {
        self.with_service(|service| service.list_trashed()).await
    }

    /// Lists non-trashed children of `parent` (`None` = root notes).
    pub async fn children(&self, parent: Option<NoteId>) -> StoreResult<Vec<Note>> {
        let index = self.index().await?;
        if let Some(parent_id) = parent {
            if !index.contains(parent_id) {
                return Err(StoreError::NotFound(parent_id));
            }
        }
        Ok(index.children(parent))
    }

    /// Computes the root-to-note path of `id`.
    pub async fn breadcrumbs(&self, id: NoteId) -> StoreResult<Breadcrumbs> {
        self.index()
            .await?
            .breadcrumbs(id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Returns the current hierarchy index, rebuilding it when stale.
    pub async fn index(&self) -> StoreResult<Arc<HierarchyIndex>> {
        let version = self.structure_version.load(Ordering::Acquire);
        if let Some(cached) = self.cached_index(version) {
            return Ok(cached);
        }

        let notes = self.with_service(|service| service.list_all()).await?;
        let index = Arc::new(HierarchyIndex::build(notes, self.breadcrumb_ceiling));
        let mut slot = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if self.structure_version.load(Ordering::Acquire) == version {
            *slot = Some(CachedIndex {
                version,
                index: Arc::clone(&index),
            });
        }
        Ok(index)
    }

    fn cached_index(&self, version: u64) -> Option<Arc<HierarchyIndex>> {
        let slot = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|cached| cached.version == version)
            .map(|cached| Arc::clone(&cached.index))
    }

    async fn mutate<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: for<'c> FnOnce(&NoteService<SqliteNoteRepository<'c>>) -> StoreResult<T> + Send,
    {
        let result = self.with_service(f).await;
        if result.is_ok() {
            self.structure_version.fetch_add(1, Ordering::AcqRel);
            *self.index.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        result
    }

    async fn with_service<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: for<'c> FnOnce(&NoteService<SqliteNoteRepository<'c>>) -> StoreResult<T> + Send,
    {
        let conn = self.conn.lock().await;
        let repo = SqliteNoteRepository::try_new(&conn)?;
        f(&NoteService::new(repo))
    }
}

#[async_trait]
impl CanonicalStore for NoteStore {
    async fn load_note(&self, note_id: NoteId) -> StoreResult<Note> {
        self.get(note_id).await
    }

    async fn write_metadata(&self, note_id: NoteId, patch: &NotePatch) -> StoreResult<Note> {
        self.update(note_id, patch.clone()).await
    }
}
