//! Session registry: one collaborative session per document key.
//!
//! # Responsibility
//! - Open provider sessions on request and hand out shared handles.
//! - Keep a single active session per controller across navigation.
//! - Flush pending metadata before releasing a provider in the background.
//!
//! # Invariants
//! - At most one `Session` per `DocumentKey` is registered at any time.
//! - Opening a key that is registered or mid-open never calls the provider
//!   a second time.
//! - Registering a session closes every other registered key first.
//! - A failed, panicked or superseded open leaves nothing registered for
//!   its key.
//! - For one key, a new provider open starts only after the previous
//!   release (flush + `close_provider`) finished.
//!
//! Registry and bridge state are only locked between suspension points; the
//! registry lock is always taken before the bridge lock.

use crate::model::note::NoteId;
use crate::service::note_service::StoreError;
use crate::session::bridge::{MetadataBridge, StagedEdit};
use crate::session::key::DocumentKey;
use crate::session::provider::{
    CollabProvider, ContentHandle, OpenOptions, ProviderHandle, SharedMap,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Errors returned by `SessionRegistry::open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The provider could not open the document; retry starts fresh.
    ProviderUnavailable { key: DocumentKey, reason: String },
    /// The note behind the session does not exist.
    NoteNotFound(NoteId),
    /// The controller moved on (another key was opened, or this key was
    /// closed) before this open completed; the provider was released.
    Superseded(DocumentKey),
    /// The note store failed while reconciling the session.
    Store(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderUnavailable { key, reason } => {
                write!(f, "provider unavailable for {key}: {reason}")
            }
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::Superseded(key) => write!(f, "session open superseded: {key}"),
            Self::Store(message) => write!(f, "note store error: {message}"),
        }
    }
}

impl Error for RegistryError {}

impl From<StoreError> for RegistryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NoteNotFound(id),
            other => Self::Store(other.to_string()),
        }
    }
}

/// One open collaborative editing session. Owned by the registry; callers
/// hold borrowed `Arc`s that must not outlive the matching `close`.
pub struct Session {
    document_key: DocumentKey,
    note_id: NoteId,
    provider: ProviderHandle,
    offline_enabled: bool,
}

impl Session {
    pub fn document_key(&self) -> &DocumentKey {
        &self.document_key
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn offline_enabled(&self) -> bool {
        self.offline_enabled
    }

    pub fn shared_map(&self) -> &Arc<dyn SharedMap> {
        &self.provider.shared_map
    }

    pub fn content(&self) -> &ContentHandle {
        &self.provider.content
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("document_key", &self.document_key)
            .field("note_id", &self.note_id)
            .field("offline_enabled", &self.offline_enabled)
            .finish_non_exhaustive()
    }
}

type OpenResult = Result<Arc<Session>, RegistryError>;
type SharedOpen = Shared<BoxFuture<'static, OpenResult>>;
type SharedRelease = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<DocumentKey, Arc<Session>>,
    in_flight: HashMap<DocumentKey, (u64, SharedOpen)>,
    releasing: HashMap<DocumentKey, (u64, SharedRelease)>,
    /// Key of the latest open request the controller has not closed since.
    wanted: Option<DocumentKey>,
    next_release_id: u64,
    next_open_id: u64,
}

struct RegistryInner {
    provider: Arc<dyn CollabProvider>,
    bridge: MetadataBridge,
    state: Mutex<RegistryState>,
}

/// Owned registry of collaborative sessions for one page controller.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn CollabProvider>, bridge: MetadataBridge) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                provider,
                bridge,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Bridge receiving field edits for sessions of this registry.
    pub fn bridge(&self) -> &MetadataBridge {
        &self.inner.bridge
    }

    /// Opens (or returns the already open) session for `key`.
    ///
    /// Any other registered key is closed before the new session is
    /// registered. Must be called from within a Tokio runtime.
    pub async fn open(
        &self,
        key: DocumentKey,
        note_id: NoteId,
        options: OpenOptions,
    ) -> OpenResult {
        let pending = {
            let mut state = self.inner.lock_state();
            state.wanted = Some(key.clone());
            if let Some(session) = state.sessions.get(&key) {
                debug!(
                    "event=session_open module=registry status=reuse key={}",
                    key
                );
                return Ok(Arc::clone(session));
            }
            if let Some(in_flight) = state
                .in_flight
                .get(&key)
                .map(|(_, open)| open.clone())
            {
                debug!(
                    "event=session_open module=registry status=join key={}",
                    key
                );
                in_flight
            } else {
                let others: Vec<DocumentKey> = state.sessions.keys().cloned().collect();
                for other in others {
                    RegistryInner::close_locked(&self.inner, &mut state, &other);
                }
                let task = tokio::spawn(RegistryInner::open_task(
                    Arc::clone(&self.inner),
                    key.clone(),
                    note_id,
                    options,
                ));
                state.next_open_id += 1;
                let open_id = state.next_open_id;
                let task_inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                let shared = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(err) => {
                            // The task died before clearing its own entry.
                            task_inner.clear_in_flight(&task_key, open_id);
                            error!(
                                "event=session_open module=registry status=error key={} error_code=open_task_failed error={}",
                                task_key, err
                            );
                            Err(RegistryError::ProviderUnavailable {
                                key: task_key,
                                reason: format!("open task failed: {err}"),
                            })
                        }
                    }
                }
                .boxed()
                .shared();
                state.in_flight.insert(key, (open_id, shared.clone()));
                shared
            }
        };
        pending.await
    }

    /// Deregisters `key` now and releases its provider in the background.
    ///
    /// Pending metadata edits are written to the shared map before this
    /// returns and reach the store before the provider is released.
    /// Closing an unknown or already closed key is a no-op.
    pub fn close(&self, key: &DocumentKey) {
        let mut state = self.inner.lock_state();
        if state.wanted.as_ref() == Some(key) {
            state.wanted = None;
        }
        if !RegistryInner::close_locked(&self.inner, &mut state, key) {
            debug!(
                "event=session_close module=registry status=skip key={} reason=not_open",
                key
            );
        }
    }

    /// Like `close`, but resolves once the provider release has finished.
    pub async fn close_and_wait(&self, key: &DocumentKey) {
        self.close(key);
        let release = self
            .inner
            .lock_state()
            .releasing
            .get(key)
            .map(|(_, release)| release.clone());
        if let Some(release) = release {
            release.await;
        }
    }

    /// Closes every session and waits for all background releases.
    pub async fn shutdown(&self) {
        let releases: Vec<SharedRelease> = {
            let mut state = self.inner.lock_state();
            state.wanted = None;
            let keys: Vec<DocumentKey> = state.sessions.keys().cloned().collect();
            for key in keys {
                RegistryInner::close_locked(&self.inner, &mut state, &key);
            }
            state
                .releasing
                .values()
                .map(|(_, release)| release.clone())
                .collect()
        };
        futures::future::join_all(releases).await;
    }

    pub fn get(&self, key: &DocumentKey) -> Option<Arc<Session>> {
        self.inner.lock_state().sessions.get(key).cloned()
    }

    pub fn is_open(&self, key: &DocumentKey) -> bool {
        self.inner.lock_state().sessions.contains_key(key)
    }

    /// The controller's active session, if any.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.inner.lock_state().sessions.values().next().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryInner {
    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the in-flight entry for `key` if it still belongs to `open_id`.
    fn clear_in_flight(&self, key: &DocumentKey, open_id: u64) {
        let mut state = self.lock_state();
        if state
            .in_flight
            .get(key)
            .is_some_and(|(current, _)| *current == open_id)
        {
            state.in_flight.remove(key);
        }
    }

    async fn open_task(
        inner: Arc<RegistryInner>,
        key: DocumentKey,
        note_id: NoteId,
        options: OpenOptions,
    ) -> OpenResult {
        let started_at = Instant::now();
        info!(
            "event=session_open module=registry status=start key={} note_id={} offline={}",
            key, note_id, options.offline_enabled
        );

        let previous_release = inner
            .lock_state()
            .releasing
            .get(&key)
            .map(|(_, release)| release.clone());
        if let Some(release) = previous_release {
            release.await;
        }

        let handle = match inner.provider.open_provider(&key, note_id, options).await {
            Ok(handle) => handle,
            Err(err) => {
                inner.lock_state().in_flight.remove(&key);
                error!(
                    "event=session_open module=registry status=error key={} duration_ms={} error_code=provider_unavailable error={}",
                    key,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(RegistryError::ProviderUnavailable {
                    key,
                    reason: err.message,
                });
            }
        };

        let reconciled = inner
            .bridge
            .reconcile_on_open(note_id, &handle.shared_map)
            .await;

        let mut state = inner.lock_state();
        state.in_flight.remove(&key);
        if let Err(err) = reconciled {
            Self::spawn_release(&inner, &mut state, key.clone(), None);
            error!(
                "event=session_open module=registry status=error key={} duration_ms={} error_code=reconcile_failed error={}",
                key,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
        if state.wanted.as_ref() != Some(&key) {
            inner.bridge.detach(note_id, &handle.shared_map);
            Self::spawn_release(&inner, &mut state, key.clone(), None);
            warn!(
                "event=session_open module=registry status=superseded key={} duration_ms={}",
                key,
                started_at.elapsed().as_millis()
            );
            return Err(RegistryError::Superseded(key));
        }

        let others: Vec<DocumentKey> = state
            .sessions
            .keys()
            .filter(|other| **other != key)
            .cloned()
            .collect();
        for other in others {
            Self::close_locked(&inner, &mut state, &other);
        }

        let session = Arc::new(Session {
            document_key: key.clone(),
            note_id,
            provider: handle,
            offline_enabled: options.offline_enabled,
        });
        state.sessions.insert(key.clone(), Arc::clone(&session));
        info!(
            "event=session_open module=registry status=ok key={} note_id={} duration_ms={}",
            key,
            note_id,
            started_at.elapsed().as_millis()
        );
        Ok(session)
    }

    /// Removes `key` from the registry and schedules its release.
    /// Returns `false` when nothing was registered.
    fn close_locked(
        inner: &Arc<RegistryInner>,
        state: &mut RegistryState,
        key: &DocumentKey,
    ) -> bool {
        let Some(session) = state.sessions.remove(key) else {
            return false;
        };
        let staged = inner.bridge.stage_pending(session.note_id);
        inner.bridge.write_to_map(session.note_id, &staged);
        inner.bridge.detach(session.note_id, session.shared_map());
        info!(
            "event=session_close module=registry status=ok key={} note_id={} flushed_fields={}",
            key,
            session.note_id,
            staged.len()
        );
        Self::spawn_release(inner, state, key.clone(), Some((session.note_id, staged)));
        true
    }

    fn spawn_release(
        inner: &Arc<RegistryInner>,
        state: &mut RegistryState,
        key: DocumentKey,
        flush: Option<(NoteId, Vec<StagedEdit>)>,
    ) {
        state.next_release_id += 1;
        let release_id = state.next_release_id;
        let task_inner = Arc::clone(inner);
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            if let Some((note_id, staged)) = flush {
                // A failure here is already logged and broadcast by the bridge;
                // the provider still has to be released.
                let _ = task_inner.bridge.persist(note_id, staged).await;
            }
            match task_inner.provider.close_provider(&task_key).await {
                Ok(()) => info!(
                    "event=provider_release module=registry status=ok key={}",
                    task_key
                ),
                Err(err) => error!(
                    "event=provider_release module=registry status=error key={} error={}",
                    task_key, err
                ),
            }
            let mut state = task_inner.lock_state();
            if state
                .releasing
                .get(&task_key)
                .is_some_and(|(current, _)| *current == release_id)
            {
                state.releasing.remove(&task_key);
            }
        });
        let release = async move {
            let _ = task.await;
        }
        .boxed()
        .shared();
        state.releasing.insert(key, (release_id, release));
    }
}
