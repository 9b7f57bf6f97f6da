//! Metadata bridge between collaborative sessions and the note store.
//!
//! # Responsibility
//! - Debounce bridged field edits per `(note, field)`.
//! - Commit each edit to the session's shared map first, then to the store.
//! - Reconcile shared map and store when a session opens.
//! - Surface store write failures instead of dropping them.
//!
//! # Invariants
//! - At most one pending write exists per `(note, field)`; a newer edit
//!   replaces it and restarts the window.
//! - A timer only commits the write it was scheduled for (generation check),
//!   and removes it from `pending` before its first suspension point.
//! - A store attempt only carries edits still current in `committing`; an
//!   older retry never overwrites a newer generation of the same field.
//! - While a session is attached its shared map is authoritative; at open
//!   the store wins, overlaid with writes that have not reached it yet.

use crate::config::SessionConfig;
use crate::model::note::{BridgedEdit, BridgedField, NoteId, NotePatch};
use crate::service::note_service::StoreError;
use crate::service::note_store::CanonicalStore;
use crate::session::provider::SharedMap;
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SAVE_FAILURE_CHANNEL_CAPACITY: usize = 32;

/// Store write that still failed after the immediate retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFailure {
    pub note_id: NoteId,
    pub fields: Vec<BridgedField>,
    pub reason: String,
}

/// Errors surfaced by explicit flushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The store rejected the write; the user must be told changes may be lost.
    ChangesMayNotBeSaved(SaveFailure),
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChangesMayNotBeSaved(failure) => write!(
                f,
                "changes may not be saved for note {}: {}",
                failure.note_id, failure.reason
            ),
        }
    }
}

impl Error for BridgeError {}

/// What reconciliation changed in a freshly opened shared map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Fields missing from the map and filled in.
    pub seeded: Vec<BridgedField>,
    /// Fields whose map value diverged and was replaced.
    pub overwritten: Vec<BridgedField>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.seeded.is_empty() && self.overwritten.is_empty()
    }
}

/// Edit taken out of the debounce window, on its way to map and store.
#[derive(Debug, Clone)]
pub(crate) struct StagedEdit {
    edit: BridgedEdit,
    generation: u64,
}

struct PendingWrite {
    edit: BridgedEdit,
    generation: u64,
    timer: JoinHandle<()>,
}

type FieldSlot = (NoteId, BridgedField);

#[derive(Default)]
struct BridgeState {
    next_generation: u64,
    pending: HashMap<FieldSlot, PendingWrite>,
    committing: HashMap<FieldSlot, StagedEdit>,
    attached: HashMap<NoteId, Arc<dyn SharedMap>>,
    unsaved: HashMap<NoteId, BTreeSet<BridgedField>>,
}

struct BridgeInner {
    store: Arc<dyn CanonicalStore>,
    debounce: Duration,
    flush_retries: u32,
    state: Mutex<BridgeState>,
    failures: broadcast::Sender<SaveFailure>,
}

/// Debounced dual-writer for bridged note metadata. Cheap to clone.
#[derive(Clone)]
pub struct MetadataBridge {
    inner: Arc<BridgeInner>,
}

impl MetadataBridge {
    pub fn new(store: Arc<dyn CanonicalStore>, config: &SessionConfig) -> Self {
        let config = config.normalized();
        let (failures, _) = broadcast::channel(SAVE_FAILURE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BridgeInner {
                store,
                debounce: config.debounce_window,
                flush_retries: config.flush_retries,
                state: Mutex::new(BridgeState::default()),
                failures,
            }),
        }
    }

    /// Records one edit and (re)starts its debounce window.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_field_edit(&self, note_id: NoteId, edit: BridgedEdit) {
        let field = edit.field();
        let delay = self.inner.debounce;
        let mut state = self.inner.lock_state();
        state.next_generation += 1;
        let generation = state.next_generation;
        if let Some(previous) = state.pending.remove(&(note_id, field)) {
            previous.timer.abort();
        }

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.commit_due(note_id, field, generation).await;
        });
        state.pending.insert(
            (note_id, field),
            PendingWrite {
                edit,
                generation,
                timer,
            },
        );
    }

    /// Commits every pending write of one note now, bypassing the window.
    pub async fn flush(&self, note_id: NoteId) -> Result<(), BridgeError> {
        let staged = self.inner.stage_pending(note_id);
        if staged.is_empty() {
            return Ok(());
        }
        self.inner.write_to_map(note_id, &staged);
        self.inner.persist(note_id, staged).await
    }

    /// Flushes every note with pending writes. Returns the first failure
    /// after attempting all of them.
    pub async fn flush_all(&self) -> Result<(), BridgeError> {
        let note_ids: BTreeSet<NoteId> = self
            .inner
            .lock_state()
            .pending
            .keys()
            .map(|(note_id, _)| *note_id)
            .collect();
        let mut first_error = None;
        for note_id in note_ids {
            if let Err(err) = self.flush(note_id).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Loads the store record, brings the shared map in line with it, and
    /// attaches the map so later commits reach it.
    pub async fn reconcile_on_open(
        &self,
        note_id: NoteId,
        map: &Arc<dyn SharedMap>,
    ) -> Result<ReconcileReport, StoreError> {
        let note = self.inner.store.load_note(note_id).await?;
        let mut state = self.inner.lock_state();
        let mut report = ReconcileReport::default();

        for field in BridgedField::ALL {
            let slot = (note_id, field);
            let desired = match state
                .pending
                .get(&slot)
                .map(|pending| &pending.edit)
                .or_else(|| state.committing.get(&slot).map(|staged| &staged.edit))
            {
                Some(edit) => edit.map_value().map(str::to_string),
                None => note.bridged_value(field).map(str::to_string),
            };
            let current = map.get(field.map_key());
            if current == desired {
                continue;
            }
            match desired {
                Some(value) => map.set(field.map_key(), &value),
                None => map.remove(field.map_key()),
            }
            if current.is_none() {
                report.seeded.push(field);
            } else {
                report.overwritten.push(field);
            }
        }

        state.attached.insert(note_id, Arc::clone(map));
        info!(
            "event=metadata_reconcile module=bridge status=ok note_id={} seeded={} overwritten={}",
            note_id,
            report.seeded.len(),
            report.overwritten.len()
        );
        Ok(report)
    }

    /// Whether a write for this note failed and has not succeeded since.
    pub fn has_unsaved_changes(&self, note_id: NoteId) -> bool {
        self.inner
            .lock_state()
            .unsaved
            .get(&note_id)
            .is_some_and(|fields| !fields.is_empty())
    }

    /// Whether any edit of this note is still inside its debounce window.
    pub fn has_pending(&self, note_id: NoteId) -> bool {
        self.inner
            .lock_state()
            .pending
            .keys()
            .any(|(pending_note, _)| *pending_note == note_id)
    }

    /// Receives one message per write that exhausted its retries.
    pub fn subscribe_save_failures(&self) -> broadcast::Receiver<SaveFailure> {
        self.inner.failures.subscribe()
    }

    pub(crate) fn stage_pending(&self, note_id: NoteId) -> Vec<StagedEdit> {
        self.inner.stage_pending(note_id)
    }

    pub(crate) fn write_to_map(&self, note_id: NoteId, staged: &[StagedEdit]) {
        self.inner.write_to_map(note_id, staged);
    }

    pub(crate) async fn persist(
        &self,
        note_id: NoteId,
        staged: Vec<StagedEdit>,
    ) -> Result<(), BridgeError> {
        self.inner.persist(note_id, staged).await
    }

    /// Detaches `map` from the note, unless a newer map replaced it.
    pub(crate) fn detach(&self, note_id: NoteId, map: &Arc<dyn SharedMap>) {
        let mut state = self.inner.lock_state();
        if state
            .attached
            .get(&note_id)
            .is_some_and(|attached| Arc::ptr_eq(attached, map))
        {
            state.attached.remove(&note_id);
        }
    }
}

impl BridgeInner {
    fn lock_state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn commit_due(&self, note_id: NoteId, field: BridgedField, generation: u64) {
        let staged = {
            let mut state = self.lock_state();
            match state.pending.get(&(note_id, field)) {
                Some(pending) if pending.generation == generation => {}
                _ => return,
            }
            let Some(pending) = state.pending.remove(&(note_id, field)) else {
                return;
            };
            let staged = StagedEdit {
                edit: pending.edit,
                generation,
            };
            state.committing.insert((note_id, field), staged.clone());
            vec![staged]
        };
        self.write_to_map(note_id, &staged);
        // Failures are already logged and broadcast; nobody awaits a timer.
        let _ = self.persist(note_id, staged).await;
    }

    fn stage_pending(&self, note_id: NoteId) -> Vec<StagedEdit> {
        let mut state = self.lock_state();
        let slots: Vec<FieldSlot> = state
            .pending
            .keys()
            .filter(|(pending_note, _)| *pending_note == note_id)
            .copied()
            .collect();
        let mut staged = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(pending) = state.pending.remove(&slot) {
                pending.timer.abort();
                let edit = StagedEdit {
                    edit: pending.edit,
                    generation: pending.generation,
                };
                state.committing.insert(slot, edit.clone());
                staged.push(edit);
            }
        }
        staged
    }

    fn write_to_map(&self, note_id: NoteId, staged: &[StagedEdit]) {
        let Some(map) = self.lock_state().attached.get(&note_id).cloned() else {
            debug!(
                "event=metadata_commit module=bridge status=skip target=map note_id={} reason=no_session",
                note_id
            );
            return;
        };
        for item in staged {
            let key = item.edit.field().map_key();
            match item.edit.map_value() {
                Some(value) => map.set(key, value),
                None => map.remove(key),
            }
        }
    }

    async fn persist(&self, note_id: NoteId, staged: Vec<StagedEdit>) -> Result<(), BridgeError> {
        let attempts = self.flush_retries + 1;
        let mut staged = staged;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            staged = self.retain_current(note_id, staged);
            if staged.is_empty() {
                return Ok(());
            }
            let patch = patch_of(&staged);
            let fields = patch.fields();

            match self.store.write_metadata(note_id, &patch).await {
                Ok(_) => {
                    self.finish(note_id, &staged, &fields, true);
                    info!(
                        "event=metadata_commit module=bridge status=ok note_id={} fields={} attempt={}",
                        note_id,
                        fields.len(),
                        attempt
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "event=metadata_commit module=bridge status=retry note_id={} attempt={} error={}",
                        note_id, attempt, err
                    );
                    last_error = err.to_string();
                }
            }
        }

        // A newer commit of the same fields owns their outcome now.
        staged = self.retain_current(note_id, staged);
        if staged.is_empty() {
            return Ok(());
        }
        let fields = patch_of(&staged).fields();
        self.finish(note_id, &staged, &fields, false);
        error!(
            "event=metadata_flush_failed module=bridge status=error note_id={} fields={} attempts={} error_code=changes_may_not_be_saved",
            note_id,
            fields.len(),
            attempts
        );
        let failure = SaveFailure {
            note_id,
            fields,
            reason: last_error,
        };
        let _ = self.failures.send(failure.clone());
        Err(BridgeError::ChangesMayNotBeSaved(failure))
    }

    /// Drops staged edits whose slot was staged again by a newer commit.
    fn retain_current(&self, note_id: NoteId, mut staged: Vec<StagedEdit>) -> Vec<StagedEdit> {
        let state = self.lock_state();
        let before = staged.len();
        staged.retain(|item| {
            state
                .committing
                .get(&(note_id, item.edit.field()))
                .is_some_and(|current| current.generation == item.generation)
        });
        if staged.len() < before {
            debug!(
                "event=metadata_commit module=bridge status=skip note_id={} superseded={} reason=newer_generation",
                note_id,
                before - staged.len()
            );
        }
        staged
    }

    fn finish(&self, note_id: NoteId, staged: &[StagedEdit], fields: &[BridgedField], saved: bool) {
        let mut state = self.lock_state();
        for item in staged {
            let slot = (note_id, item.edit.field());
            if state
                .committing
                .get(&slot)
                .is_some_and(|current| current.generation == item.generation)
            {
                state.committing.remove(&slot);
            }
        }
        let unsaved = state.unsaved.entry(note_id).or_default();
        for field in fields {
            if saved {
                unsaved.remove(field);
            } else {
                unsaved.insert(*field);
            }
        }
        if unsaved.is_empty() {
            state.unsaved.remove(&note_id);
        }
    }
}

fn patch_of(staged: &[StagedEdit]) -> NotePatch {
    let mut patch = NotePatch::default();
    for item in staged {
        patch.apply_edit(item.edit.clone());
    }
    patch
}
