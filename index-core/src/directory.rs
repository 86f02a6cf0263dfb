//! Directory storage backend selection and RAM→disk promotion (§4.1, §6).
//!
//! The core treats `Directory` as an opaque collaborator (§6: "the core
//! does not inspect its on-disk format") and only ever drives it through
//! tantivy's own `Index`/`Directory` API — `create_in_ram`,
//! `create_from_tempdir`, `create_in_dir`, and for promotion, copying every
//! managed file byte-for-byte from the old directory into a fresh
//! `MmapDirectory`.

use std::path::{Path, PathBuf};

use tantivy::directory::MmapDirectory;
use tantivy::schema::Schema;
use tantivy::{Directory, Index, IndexBuilder};

/// Where an index's segments physically live.
#[derive(Debug, Clone)]
pub enum StorageType {
    /// Non-persistent; lives entirely in memory until promoted.
    Memory,
    /// Non-persistent; backed by an OS tempdir that is cleaned up when the
    /// `Index` (and its directory handle) is dropped.
    TempFile,
    /// Persistent, at the given path.
    FileSystem(PathBuf),
}

impl StorageType {
    pub fn is_ram_backed(&self) -> bool {
        matches!(self, StorageType::Memory | StorageType::TempFile)
    }
}

pub fn open_index(schema: Schema, storage: &StorageType) -> anyhow::Result<Index> {
    let builder = IndexBuilder::default().schema(schema);
    let index = match storage {
        StorageType::Memory => builder.create_in_ram()?,
        StorageType::TempFile => builder.create_from_tempdir()?,
        StorageType::FileSystem(path) => {
            std::fs::create_dir_all(path)?;
            builder.create_in_dir(path)?
        },
    };
    Ok(index)
}

/// Approximates the in-memory footprint of a RAM-backed index by summing
/// the byte length of every file tantivy currently manages for it. This is
/// the quantity the §4.1 promotion threshold is compared against.
pub fn directory_size_bytes(index: &Index) -> anyhow::Result<u64> {
    let directory = index.directory();
    let mut total = 0u64;
    for file in directory.list_managed_files() {
        if let Ok(bytes) = directory.atomic_read(&file) {
            total += bytes.len() as u64;
        }
    }
    Ok(total)
}

/// Materializes a RAM-backed index's files onto `target_dir` and opens a
/// fresh `Index` over the result (§4.1: "materialize the RAM directory
/// contents to a filesystem directory... swap the Index's Directory to the
/// filesystem one").
///
/// The caller is responsible for having already committed the old index's
/// writer — an uncommitted segment is not yet a managed file and would be
/// silently dropped by this copy.
pub fn promote_to_filesystem(old_index: &Index, target_dir: &Path) -> anyhow::Result<Index> {
    std::fs::create_dir_all(target_dir)?;
    let mut fs_directory = MmapDirectory::open(target_dir)?;

    let old_directory = old_index.directory();
    for file in old_directory.list_managed_files() {
        let bytes = old_directory.atomic_read(&file)?;
        fs_directory.atomic_write(&file, &bytes)?;
    }

    let new_index = Index::open(fs_directory)?;
    Ok(new_index)
}
