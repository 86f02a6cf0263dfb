//! A single-index inverted-index engine core: serialized writes behind a
//! lock-free, lease-isolated reader snapshot, a fault-tolerant streaming
//! indexing pipeline, pluggable per-field analyzers, RAM→disk promotion for
//! temporary indexes, and a paged/distinct query loop with post-filter
//! support.
//!
//! This crate is deliberately narrow: it owns one index's write protocol,
//! directory, searcher snapshot and extension registry. Multi-index
//! orchestration, persistence of document sidecars, and any network surface
//! are left to a host process — see `lnx-cli` for a minimal one.

pub mod analyzer;
pub mod config;
pub mod definition;
pub mod directory;
pub mod document;
pub mod enumerator;
pub mod error;
pub mod extensions;
pub mod index;
pub mod query;
pub mod searcher;
pub mod value;

pub use config::{CountingStorageActions, IndexingError, StorageActions, WorkContext};
pub use definition::Definition;
pub use directory::StorageType;
pub use document::{FieldValue, IndexableDocument, IndexableField, IndexingMode};
pub use error::IndexCoreError;
pub use index::IndexCore;
pub use query::{FieldsToFetch, PageSize, ProjectedDocument, Query, QueryOutcome, QueryTrigger, SortDescriptor};
