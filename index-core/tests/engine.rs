//! End-to-end scenarios exercising write/query/concurrency/promotion across
//! the public surface rather than a single module in isolation.

use std::sync::Arc;
use std::thread;

use tantivy::schema::{Schema, FAST, INDEXED, STORED, STRING, TEXT};

use index_core::analyzer::AnalyzerRegistry;
use index_core::document::{FieldValue, IndexableDocument, IndexableField, DOCUMENT_ID_FIELD_NAME};
use index_core::query::{FieldsToFetch, PageSize, Query, QueryTrigger, SortDescriptor};
use index_core::{CountingStorageActions, Definition, IndexCore, StorageType, WorkContext};

fn schema_with_rank() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(DOCUMENT_ID_FIELD_NAME, STRING | STORED);
    builder.add_text_field("body", TEXT | STORED);
    builder.add_i64_field("rank", INDEXED | STORED | FAST);
    builder.build()
}

fn doc(id: &str, body: &str, rank: i64) -> IndexableDocument {
    let mut d = IndexableDocument::new();
    d.push(IndexableField::text(DOCUMENT_ID_FIELD_NAME, id));
    d.push(IndexableField::text("body", body));
    d.push(IndexableField {
        name: "rank".to_string(),
        value: FieldValue::Long(rank),
        stored: true,
        indexed: true,
        analyzed: false,
    });
    d
}

fn no_triggers() -> Vec<Box<dyn QueryTrigger>> {
    Vec::new()
}

#[test]
fn two_documents_are_written_and_found_by_text_query() {
    let index = IndexCore::create(
        "docs",
        Definition::new("docs"),
        schema_with_rank(),
        StorageType::Memory,
        AnalyzerRegistry::with_builtin(),
        Vec::new(),
    )
    .unwrap();

    let ctx = WorkContext::default();
    let stats = CountingStorageActions::default();

    index
        .index_documents(
            |(id, body, rank): (&str, &str, i64)| Ok(vec![doc(id, body, rank)]),
            vec![("a", "the quick fox", 1), ("b", "a lazy dog", 2)],
            &ctx,
            &stats,
        )
        .unwrap();
    index.flush().unwrap();

    let triggers = no_triggers();
    let handle = index.query(&triggers).unwrap();
    let outcome = handle
        .execute(
            Query {
                query_text: "body:fox".to_string(),
                start: 0,
                page_size: PageSize::Bounded(10),
                sort: vec![],
                distinct: false,
                fields_to_fetch: FieldsToFetch::named(vec![DOCUMENT_ID_FIELD_NAME]),
            },
            |_| true,
        )
        .unwrap();

    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(
        outcome.hits[0].get(DOCUMENT_ID_FIELD_NAME).unwrap(),
        "a"
    );
}

#[test]
fn distinct_paging_does_not_repeat_a_projection_across_pages() {
    let index = IndexCore::create(
        "dup",
        Definition::new("dup"),
        schema_with_rank(),
        StorageType::Memory,
        AnalyzerRegistry::with_builtin(),
        Vec::new(),
    )
    .unwrap();

    let ctx = WorkContext::default();
    let stats = CountingStorageActions::default();

    // Two distinct bodies, each repeated, so the distinct projection space
    // has exactly two members though six documents exist.
    index
        .index_documents(
            |(id, body): (&str, &str)| Ok(vec![doc(id, body, 0)]),
            vec![
                ("1", "red"), ("2", "red"), ("3", "red"),
                ("4", "blue"), ("5", "blue"), ("6", "blue"),
            ],
            &ctx,
            &stats,
        )
        .unwrap();
    index.flush().unwrap();

    let triggers = no_triggers();
    let handle = index.query(&triggers).unwrap();

    let first_page = handle
        .execute(
            Query {
                query_text: String::new(),
                start: 0,
                page_size: PageSize::Bounded(1),
                sort: vec![],
                distinct: true,
                fields_to_fetch: FieldsToFetch::named(vec!["body"]),
            },
            |_| true,
        )
        .unwrap();
    assert_eq!(first_page.hits.len(), 1);

    let second_page = handle
        .execute(
            Query {
                query_text: String::new(),
                start: 1,
                page_size: PageSize::Bounded(1),
                sort: vec![],
                distinct: true,
                fields_to_fetch: FieldsToFetch::named(vec!["body"]),
            },
            |_| true,
        )
        .unwrap();
    assert_eq!(second_page.hits.len(), 1);
    assert_ne!(first_page.hits[0], second_page.hits[0]);
}

#[test]
fn per_document_transform_failures_are_counted_and_do_not_abort_the_batch() {
    let index = IndexCore::create(
        "flaky",
        Definition::new("flaky"),
        schema_with_rank(),
        StorageType::Memory,
        AnalyzerRegistry::with_builtin(),
        Vec::new(),
    )
    .unwrap();

    let ctx = WorkContext::default();
    let stats = CountingStorageActions::default();

    index
        .index_documents(
            |n: i32| {
                if n % 4 == 0 {
                    anyhow::bail!("simulated failure on {}", n)
                } else {
                    Ok(vec![doc(&n.to_string(), "body", n as i64)])
                }
            },
            0..12,
            &ctx,
            &stats,
        )
        .unwrap();
    index.flush().unwrap();

    use std::sync::atomic::Ordering;
    assert_eq!(stats.indexing_failures.load(Ordering::SeqCst), 3); // 0, 4, 8
    assert_eq!(ctx.errors().len(), 3);

    let triggers = no_triggers();
    let handle = index.query(&triggers).unwrap();
    let outcome = handle
        .execute(
            Query {
                query_text: String::new(),
                start: 0,
                page_size: PageSize::All,
                sort: vec![],
                distinct: false,
                fields_to_fetch: FieldsToFetch::named(vec![DOCUMENT_ID_FIELD_NAME]),
            },
            |_| true,
        )
        .unwrap();
    assert_eq!(outcome.hits.len(), 9);
}

#[test]
fn a_lease_taken_before_a_concurrent_write_never_observes_it() {
    let index = Arc::new(
        IndexCore::create(
            "concurrent",
            Definition::new("concurrent"),
            schema_with_rank(),
            StorageType::Memory,
            AnalyzerRegistry::with_builtin(),
            Vec::new(),
        )
        .unwrap(),
    );

    let lease = index.get_searcher();
    assert_eq!(lease.searcher().num_docs(), 0);

    let writer_index = index.clone();
    let handle = thread::spawn(move || {
        let ctx = WorkContext::default();
        let stats = CountingStorageActions::default();
        writer_index
            .index_documents(
                |id: &str| Ok(vec![doc(id, "body", 0)]),
                vec!["x"],
                &ctx,
                &stats,
            )
            .unwrap();
    });
    handle.join().unwrap();

    // The lease predates the write and must still see zero documents.
    assert_eq!(lease.searcher().num_docs(), 0);

    // A fresh lease observes the write.
    let fresh = index.get_searcher();
    assert_eq!(fresh.searcher().num_docs(), 1);
}

#[test]
fn ram_backed_temp_index_promotes_to_filesystem_once_over_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("promoted");

    let index = IndexCore::create(
        "promote-me",
        Definition::new("promote-me").temp(),
        schema_with_rank(),
        StorageType::Memory,
        AnalyzerRegistry::with_builtin(),
        Vec::new(),
    )
    .unwrap();

    // A context with a minuscule threshold forces promotion on the very
    // first non-empty batch.
    let ctx = WorkContext::new(8192, 1, false);
    let stats = CountingStorageActions::default();

    index
        .index_documents(
            |id: &str| Ok(vec![doc(id, "some reasonably long body text", 0)]),
            vec!["a"],
            &ctx,
            &stats,
        )
        .unwrap();

    let lease = index.get_searcher();
    assert!(lease.is_filesystem_backed);

    let _ = target; // promotion target path is internal; assert via the lease flag only
}

#[test]
fn sorting_on_a_range_sidecar_field_succeeds_and_on_an_undeclared_field_fails() {
    let definition = Definition::new("sorted").with_indexing_mode(
        "rank",
        index_core::IndexingMode::Analyzed,
    );

    let index = IndexCore::create(
        "sorted",
        definition,
        schema_with_rank(),
        StorageType::Memory,
        AnalyzerRegistry::with_builtin(),
        Vec::new(),
    )
    .unwrap();

    let ctx = WorkContext::default();
    let stats = CountingStorageActions::default();
    index
        .index_documents(
            |(id, rank): (&str, i64)| Ok(vec![doc(id, "body", rank)]),
            vec![("a", 3), ("b", 1), ("c", 2)],
            &ctx,
            &stats,
        )
        .unwrap();
    index.flush().unwrap();

    let triggers = no_triggers();
    let handle = index.query(&triggers).unwrap();

    let ok = handle.execute(
        Query {
            query_text: String::new(),
            start: 0,
            page_size: PageSize::All,
            sort: vec![SortDescriptor {
                field: "rank".to_string(),
                descending: false,
            }],
            distinct: false,
            fields_to_fetch: FieldsToFetch::named(vec![DOCUMENT_ID_FIELD_NAME]),
        },
        |_| true,
    );
    assert!(ok.is_ok());

    let err = handle.execute(
        Query {
            query_text: String::new(),
            start: 0,
            page_size: PageSize::All,
            sort: vec![SortDescriptor {
                field: "does_not_exist".to_string(),
                descending: false,
            }],
            distinct: false,
            fields_to_fetch: FieldsToFetch::named(vec![DOCUMENT_ID_FIELD_NAME]),
        },
        |_| true,
    );
    assert!(err.is_err());
}
