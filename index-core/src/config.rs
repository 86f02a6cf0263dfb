use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Ambient configuration and error sink handed to every write call.
///
/// This is an external collaborator (§6): the host process constructs one
/// per batch (or re-uses one across several) and the core only ever reads
/// and writes through it, never owns its lifetime.
pub struct WorkContext {
    /// Caps the size of a single `index_documents` batch; purely advisory
    /// to the host's scheduler, the core does not enforce it itself.
    pub max_number_of_items_to_index_in_single_batch: usize,

    /// RAM→disk promotion threshold in bytes for temp indexes.
    pub temp_index_in_memory_max_bytes: u64,

    /// If set, new indexes default to in-memory storage.
    pub run_in_memory: bool,

    cancelled: AtomicBool,
    errors: Mutex<Vec<IndexingError>>,
}

/// One recorded failure, keyed by document id when derivable.
#[derive(Debug, Clone)]
pub struct IndexingError {
    pub index_name: String,
    pub document_key: Option<String>,
    pub message: String,
}

impl WorkContext {
    pub fn new(
        max_number_of_items_to_index_in_single_batch: usize,
        temp_index_in_memory_max_bytes: u64,
        run_in_memory: bool,
    ) -> Self {
        Self {
            max_number_of_items_to_index_in_single_batch,
            temp_index_in_memory_max_bytes,
            run_in_memory,
            cancelled: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Records an indexing failure under the given category.
    ///
    /// `category` follows §7: `"Creating Analyzer"` for analyzer
    /// construction failures, empty string for write-action failures.
    pub fn add_error(
        &self,
        index_name: &str,
        document_key: Option<&str>,
        category: &str,
        message: impl std::fmt::Display,
    ) {
        let message = if category.is_empty() {
            message.to_string()
        } else {
            format!("{}: {}", category, message)
        };

        self.errors.lock().push(IndexingError {
            index_name: index_name.to_string(),
            document_key: document_key.map(str::to_string),
            message,
        });
    }

    pub fn errors(&self) -> Vec<IndexingError> {
        self.errors.lock().clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for WorkContext {
    fn default() -> Self {
        // Matches the teacher's defaults for a single unbounded batch
        // running against an on-disk index.
        Self::new(8192, 32 * 1024 * 1024, false)
    }
}

/// Indexing/reduce statistics sink (§6). A real deployment wires this to
/// persistent storage counters; tests use an in-memory counter.
pub trait StorageActions: Send + Sync {
    fn increment_indexing_attempt(&self);
    fn decrement_indexing_attempt(&self);
    fn increment_indexing_failure(&self);

    fn increment_reduce_attempt(&self);
    fn decrement_reduce_attempt(&self);
    fn increment_reduce_failure(&self);
}

/// An in-memory `StorageActions` used by the demo CLI and by tests.
#[derive(Default)]
pub struct CountingStorageActions {
    pub indexing_attempts: std::sync::atomic::AtomicI64,
    pub indexing_failures: std::sync::atomic::AtomicI64,
    pub reduce_attempts: std::sync::atomic::AtomicI64,
    pub reduce_failures: std::sync::atomic::AtomicI64,
}

impl StorageActions for CountingStorageActions {
    fn increment_indexing_attempt(&self) {
        self.indexing_attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_indexing_attempt(&self) {
        self.indexing_attempts.fetch_sub(1, Ordering::SeqCst);
    }

    fn increment_indexing_failure(&self) {
        self.indexing_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_reduce_attempt(&self) {
        self.reduce_attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_reduce_attempt(&self) {
        self.reduce_attempts.fetch_sub(1, Ordering::SeqCst);
    }

    fn increment_reduce_failure(&self) {
        self.reduce_failures.fetch_add(1, Ordering::SeqCst);
    }
}
