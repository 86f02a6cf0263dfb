use thiserror::Error;

/// The typed error kinds a caller may need to match on.
///
/// Everything else (directory IO, tantivy internals, extension failures)
/// crosses the crate boundary as `anyhow::Error` once it has been recorded
/// wherever §7 of the design requires it.
#[derive(Debug, Error)]
pub enum IndexCoreError {
    /// A query or sort descriptor referenced a field that isn't declared
    /// in the index's schema (and isn't a `_Range` suffix of one, nor the
    /// well-known distance field).
    #[error("field '{field}' is not declared in the index schema")]
    InvalidArgument { field: String },

    /// A write, remove, flush or extension mutation was attempted after
    /// `dispose()` had already torn the index down.
    #[error("index '{index_name}' has already been disposed")]
    AlreadyDisposed { index_name: String },

    /// Building the per-field analyzer for a write or query failed.
    #[error("failed to construct analyzer for index '{index_name}': {source}")]
    AnalyzerConstruction {
        index_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The caller-supplied write action returned an error.
    #[error("write action failed for index '{index_name}': {source}")]
    WriteActionFailed {
        index_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// An extension's `on_documents_indexed` callback failed outside of
    /// dispose (during dispose this is logged and swallowed instead).
    #[error("extension '{extension_key}' failed on index '{index_name}': {source}")]
    ExtensionFailed {
        index_name: String,
        extension_key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Closing the directory during dispose failed. Always swallowed by
    /// the caller after being logged; kept as a typed variant so the
    /// logging call site can report its origin uniformly.
    #[error("failed to close directory for index '{index_name}': {source}")]
    DirectoryCloseFailed {
        index_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A single source document failed the caller's transformation
    /// function. Reported through the Robust Enumerator's `on_error`
    /// callback; never propagates out of `index_documents`.
    #[error("transforming document failed: {source}")]
    PerItemTransformFailed {
        #[source]
        source: anyhow::Error,
    },
}
