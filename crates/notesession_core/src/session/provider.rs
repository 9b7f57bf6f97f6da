//! Collaborative document provider seam.
//!
//! The replication engine itself is external; core only needs to open and
//! release one provider per document key and read/write its shared map.

use crate::model::note::NoteId;
use crate::session::key::DocumentKey;
use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

/// Conflict-free replicated key/value map carrying live metadata.
pub trait SharedMap: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Plain in-process map, for providers without real replication.
#[derive(Debug, Default)]
pub struct MemorySharedMap {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SharedMap for MemorySharedMap {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Opaque handle to the rich-text content of an open document.
pub type ContentHandle = Arc<dyn Any + Send + Sync>;

/// Everything a provider hands back for one opened document.
#[derive(Clone)]
pub struct ProviderHandle {
    pub shared_map: Arc<dyn SharedMap>,
    pub content: ContentHandle,
}

impl ProviderHandle {
    pub fn new(shared_map: Arc<dyn SharedMap>, content: ContentHandle) -> Self {
        Self {
            shared_map,
            content,
        }
    }
}

impl Debug for ProviderHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle").finish_non_exhaustive()
    }
}

/// Options fixed for the lifetime of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub offline_enabled: bool,
}

/// Provider-side failure, reported as an opaque message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider error: {}", self.message)
    }
}

impl Error for ProviderError {}

/// Collaborative document provider.
#[async_trait]
pub trait CollabProvider: Send + Sync {
    /// Opens (or loads from offline cache) the document behind `key`.
    async fn open_provider(
        &self,
        key: &DocumentKey,
        note_id: NoteId,
        options: OpenOptions,
    ) -> Result<ProviderHandle, ProviderError>;

    /// Releases the document. Must persist dirty state before resolving.
    async fn close_provider(&self, key: &DocumentKey) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::{MemorySharedMap, SharedMap};

    #[test]
    fn memory_map_set_get_remove() {
        let map = MemorySharedMap::new();
        assert_eq!(map.get("title"), None);
        map.set("title", "Plan");
        map.set("title", "Plan B");
        assert_eq!(map.get("title").as_deref(), Some("Plan B"));
        map.remove("title");
        assert!(map.snapshot().is_empty());
    }
}
