//! The index extension registry (§3, §4.1, §5, §6).
//!
//! "Concurrent map supporting lock-free `try_add`, `try_get`" maps directly
//! onto `dashmap::DashMap` — the same crate the teacher repo's
//! `lnx-controller::indexes` module reaches for to hold its global index
//! table, just scoped down to one index's extension set instead of the
//! whole host's index set.

use std::sync::Arc;

use dashmap::DashMap;

use crate::document::IndexableDocument;

/// A named hook receiving batches of documents that were just indexed.
pub trait Extension: Send + Sync {
    fn on_documents_indexed(&self, documents: &[IndexableDocument]) -> anyhow::Result<()>;

    /// Torn down alongside the owning index. Dispose-time failures are
    /// logged and swallowed (§7) — they never stop the remaining teardown
    /// steps.
    fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: DashMap<String, Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            extensions: DashMap::new(),
        }
    }

    /// Inserts only if `key` isn't already registered; returns whether the
    /// insert happened.
    pub fn try_add(&self, key: impl Into<String>, extension: Arc<dyn Extension>) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.extensions.entry(key.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(extension);
                true
            },
        }
    }

    /// Unconditionally sets (or replaces) the extension registered at `key`.
    pub fn set(&self, key: impl Into<String>, extension: Arc<dyn Extension>) {
        self.extensions.insert(key.into(), extension);
    }

    pub fn try_get(&self, key: &str) -> Option<Arc<dyn Extension>> {
        self.extensions.get(key).map(|entry| entry.value().clone())
    }

    /// Invokes every registered extension with the batch of documents
    /// indexed during the current write call. A failure here propagates
    /// (§7: `ExtensionFailed` during indexing is not swallowed).
    pub fn notify_indexed(&self, index_name: &str, documents: &[IndexableDocument]) -> anyhow::Result<()> {
        for entry in self.extensions.iter() {
            entry
                .value()
                .on_documents_indexed(documents)
                .map_err(|source| crate::error::IndexCoreError::ExtensionFailed {
                    index_name: index_name.to_string(),
                    extension_key: entry.key().clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Disposes every registered extension, logging and continuing past
    /// individual failures (§7).
    pub fn dispose_all(&self) {
        for entry in self.extensions.iter() {
            if let Err(err) = entry.value().dispose() {
                log::error!("extension '{}' failed to dispose: {:?}", entry.key(), err);
            }
        }
        self.extensions.clear();
    }
}
