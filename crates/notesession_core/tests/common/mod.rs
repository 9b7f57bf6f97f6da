#![allow(dead_code)]

use async_trait::async_trait;
use notesession_core::{
    CanonicalStore, CollabProvider, DocumentKey, MemorySharedMap, Note, NoteId, NotePatch,
    NoteStore, OpenOptions, ProviderError, ProviderHandle, SessionConfig, SharedMap, StoreError,
    StoreResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Ordered record of provider and store calls shared between mocks.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn memory_store() -> Arc<NoteStore> {
    Arc::new(NoteStore::open_in_memory(&SessionConfig::default()).unwrap())
}

/// Provider double that keeps one shared map per key across reopenings,
/// the way an offline cache would.
pub struct MockProvider {
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    panic_next_open: AtomicBool,
    open_delay: Mutex<Duration>,
    maps: Mutex<HashMap<DocumentKey, Arc<MemorySharedMap>>>,
    log: EventLog,
}

impl MockProvider {
    pub fn new(log: EventLog) -> Self {
        Self {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_open: AtomicBool::new(false),
            panic_next_open: AtomicBool::new(false),
            open_delay: Mutex::new(Duration::ZERO),
            maps: Mutex::new(HashMap::new()),
            log,
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_fail_open(&self, value: bool) {
        self.fail_open.store(value, Ordering::SeqCst);
    }

    /// Makes the next `open_provider` call panic; later calls behave.
    pub fn panic_next_open(&self) {
        self.panic_next_open.store(true, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn map_for(&self, key: &DocumentKey) -> Arc<MemorySharedMap> {
        Arc::clone(
            self.maps
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(MemorySharedMap::new())),
        )
    }
}

#[async_trait]
impl CollabProvider for MockProvider {
    async fn open_provider(
        &self,
        key: &DocumentKey,
        _note_id: NoteId,
        _options: OpenOptions,
    ) -> Result<ProviderHandle, ProviderError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("open:{key}"));
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panic_next_open.swap(false, Ordering::SeqCst) {
            panic!("provider crashed while opening {key}");
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ProviderError::new("offline and no cached copy"));
        }
        let map: Arc<dyn SharedMap> = self.map_for(key);
        Ok(ProviderHandle::new(map, Arc::new(key.to_string())))
    }

    async fn close_provider(&self, key: &DocumentKey) -> Result<(), ProviderError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("close:{key}"));
        Ok(())
    }
}

/// One `write_metadata` call seen by `RecordingStore`.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub at: Instant,
    pub note_id: NoteId,
    pub patch: NotePatch,
}

/// Canonical store wrapper that records writes and can be told to fail.
pub struct RecordingStore {
    inner: Arc<NoteStore>,
    fail_writes: AtomicBool,
    fail_next: AtomicUsize,
    write_delay: Mutex<Duration>,
    attempts: AtomicUsize,
    writes: Mutex<Vec<RecordedWrite>>,
    log: EventLog,
}

impl RecordingStore {
    pub fn new(inner: Arc<NoteStore>, log: EventLog) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            write_delay: Mutex::new(Duration::ZERO),
            attempts: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn set_fail_writes(&self, value: bool) {
        self.fail_writes.store(value, Ordering::SeqCst);
    }

    /// Fails the next `count` attempts, then defers to `set_fail_writes`.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Time every attempt spends in flight before it succeeds or fails.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Every write attempt, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful writes in commit order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CanonicalStore for RecordingStore {
    async fn load_note(&self, note_id: NoteId) -> StoreResult<Note> {
        self.inner.get(note_id).await
    }

    async fn write_metadata(&self, note_id: NoteId, patch: &NotePatch) -> StoreResult<Note> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let fail_once = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok();
        if fail_once || self.fail_writes.load(Ordering::SeqCst) {
            self.log.lock().unwrap().push(format!("write_failed:{note_id}"));
            return Err(StoreError::InconsistentState("disk full"));
        }
        let note = self.inner.update(note_id, patch.clone()).await?;
        self.writes.lock().unwrap().push(RecordedWrite {
            at: Instant::now(),
            note_id,
            patch: patch.clone(),
        });
        self.log.lock().unwrap().push(format!("write:{note_id}"));
        Ok(note)
    }
}
