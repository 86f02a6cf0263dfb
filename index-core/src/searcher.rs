//! Searcher Holder (§4.4): owns the current read-only snapshot and hands
//! out reference-counted leases to queriers.
//!
//! `arc-swap` gives us lock-free publication (`ArcSwap::store`) and
//! `Arc`'s own strong-count bookkeeping gives us the "release the previous
//! snapshot once its outstanding leases drop to zero" behavior for free: a
//! [`SearcherLease`] is just a clone of the `Arc<IndexSnapshot>`, and
//! whatever the snapshot holds is dropped once the last clone (held by the
//! holder or by any lease) goes away.
//!
//! A `tantivy::Searcher` obtained from `IndexReader::searcher()` is already
//! an immutable point-in-time view — calling `reload()` on the `IndexReader`
//! only changes what a *future* `.searcher()` call returns, it does not
//! mutate `Searcher`s already handed out. So the snapshot captures the
//! `Searcher`, not the `IndexReader`; the `IndexReader` itself lives on the
//! holder and is only ever touched by the single writer thread calling
//! `refresh`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tantivy::{Index, IndexReader, ReloadPolicy, Searcher};

/// An immutable reader view of the index at a point in time (§3).
pub struct IndexSnapshot {
    searcher: Searcher,
    /// True once this snapshot was opened against a filesystem-backed
    /// directory. Used by tests asserting the RAM→disk promotion
    /// invariant.
    pub is_filesystem_backed: bool,
}

impl IndexSnapshot {
    pub fn searcher(&self) -> Searcher {
        self.searcher.clone()
    }
}

impl Drop for IndexSnapshot {
    fn drop(&mut self) {
        log::debug!(
            "index snapshot released (filesystem_backed={})",
            self.is_filesystem_backed
        );
    }
}

/// A reference-counted handle on an [`IndexSnapshot`]. Dropping the lease is
/// the scoped release the design calls for: there is no separate "release"
/// call to forget, because there is nothing to call — the `Arc` does it.
pub type SearcherLease = Arc<IndexSnapshot>;

pub struct SearcherHolder {
    reader: IndexReader,
    current: ArcSwap<IndexSnapshot>,
}

impl SearcherHolder {
    /// Opens the first, read-only searcher for an index with no writer yet
    /// (§4.4: "on first creation, open a read-only searcher on the
    /// Directory").
    pub fn open_initial(index: &Index, is_filesystem_backed: bool) -> anyhow::Result<Self> {
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let searcher = reader.searcher();

        Ok(Self {
            reader,
            current: ArcSwap::from_pointee(IndexSnapshot {
                searcher,
                is_filesystem_backed,
            }),
        })
    }

    /// Publishes a new snapshot. Any lease acquired before this call keeps
    /// observing the old snapshot; any lease acquired after observes the
    /// new one — the happens-before ordering guarantee of §4.4 is exactly
    /// `ArcSwap`'s publication semantics.
    fn set_snapshot(&self, snapshot: IndexSnapshot) {
        log::debug!(
            "publishing new index snapshot (filesystem_backed={})",
            snapshot.is_filesystem_backed
        );
        self.current.store(Arc::new(snapshot));
    }

    /// Reloads the reader to the writer's latest commit and republishes a
    /// fresh snapshot built from it (§4.4: "refresh after writes"). tantivy
    /// has no true uncommitted-read view, so "near-real-time" here means
    /// reload immediately after the writer's commit rather than reading
    /// directly off the writer (documented in DESIGN.md).
    pub fn refresh(&self, is_filesystem_backed: bool) -> anyhow::Result<()> {
        self.reader.reload()?;

        self.set_snapshot(IndexSnapshot {
            searcher: self.reader.searcher(),
            is_filesystem_backed,
        });

        Ok(())
    }

    /// Returns a scoped lease on the current snapshot.
    pub fn get_searcher(&self) -> SearcherLease {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantivy::schema::{Schema, TEXT};

    fn build_index() -> Index {
        let mut builder = Schema::builder();
        builder.add_text_field("body", TEXT);
        let schema = builder.build();
        Index::create_in_ram(schema)
    }

    #[test]
    fn lease_acquired_before_refresh_sees_old_snapshot() {
        let index = build_index();
        let holder = SearcherHolder::open_initial(&index, false).unwrap();

        let old_lease = holder.get_searcher();
        assert_eq!(old_lease.searcher().num_docs(), 0);

        let mut writer = index.writer(15_000_000).unwrap();
        let field = index.schema().get_field("body").unwrap();
        let mut doc = tantivy::Document::default();
        doc.add_text(field, "hello");
        writer.add_document(doc);
        writer.commit().unwrap();

        holder.refresh(false).unwrap();

        // The lease taken before refresh still reflects the old snapshot.
        assert_eq!(old_lease.searcher().num_docs(), 0);

        // A lease taken after refresh observes the write.
        let new_lease = holder.get_searcher();
        assert_eq!(new_lease.searcher().num_docs(), 1);
    }
}
