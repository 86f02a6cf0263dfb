//! Query Operation (§4.5): one-shot object executing a single query against
//! a leased snapshot, implementing paging, distinct, post-filter, sorting
//! and field-existence validation.

use std::time::Instant;

use hashbrown::{HashMap, HashSet};

use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, Query as TantivyQuery, QueryParser, QueryParserError};
use tantivy::schema::{Field, Schema, Value as SchemaValue};
use tantivy::tokenizer::TextAnalyzer;
use tantivy::{Document as TantivyDocument, Index, Order, Searcher};

use crate::analyzer::{apply_querying_generators, AnalyzerFactory, AnalyzerGenerator, AnalyzerRegistry};
use crate::definition::Definition;
use crate::document::{is_sidecar_field, DISTANCE_FIELD_NAME, EMPTY_STRING, NULL_VALUE, SIDECAR_CONVERT_TO_JSON, SIDECAR_RANGE};
use crate::error::IndexCoreError;
use crate::searcher::SearcherHolder;

/// The page-size rescaling heuristic of §4.5 step 8 is capped at this
/// multiple of the caller's original page size, resolving the Open
/// Question of §9 in favor of bounded growth against a pathological
/// post-filter.
pub const MAX_RESCALE_FACTOR: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Bounded(usize),
    All,
}

#[derive(Debug, Clone)]
pub struct SortDescriptor {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct FieldsToFetch {
    pub names: Vec<String>,
}

impl FieldsToFetch {
    pub fn named(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all_stored(schema: &Schema) -> Self {
        let names = schema
            .fields()
            .filter(|(_, entry)| entry.is_stored())
            .map(|(_, entry)| entry.name().to_string())
            .filter(|name| !is_sidecar_field(name))
            .collect();
        Self { names }
    }
}

/// Input parameters for a single query execution (§3).
#[derive(Debug, Clone)]
pub struct Query {
    pub query_text: String,
    pub start: usize,
    pub page_size: PageSize,
    pub sort: Vec<SortDescriptor>,
    pub distinct: bool,
    pub fields_to_fetch: FieldsToFetch,
}

pub type ProjectedDocument = HashMap<String, serde_json::Value>;

/// Output mutable counters plus the page of results (§3).
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub hits: Vec<ProjectedDocument>,
    pub total_hits: usize,
    pub skipped: usize,
}

/// External collaborator (§6): may rewrite the parsed query before it runs.
pub trait QueryTrigger: Send + Sync {
    fn process_query(
        &self,
        index_name: &str,
        query: Box<dyn TantivyQuery>,
        request: &Query,
    ) -> Box<dyn TantivyQuery>;
}

pub struct QueryOperation<'a> {
    pub index_name: &'a str,
    pub index: &'a Index,
    pub schema: &'a Schema,
    pub definition: &'a Definition,
    pub searcher_holder: &'a SearcherHolder,
    pub analyzer_registry: &'a AnalyzerRegistry,
    pub query_generators: &'a [Box<dyn AnalyzerGenerator>],
    pub query_triggers: &'a [Box<dyn QueryTrigger>],
}

impl<'a> QueryOperation<'a> {
    pub fn execute(
        &self,
        query: Query,
        include_in_results: impl Fn(&ProjectedDocument) -> bool,
    ) -> anyhow::Result<QueryOutcome> {
        let started = Instant::now();
        log::debug!(
            "index '{}': query '{}' (start={}, page_size={:?}, distinct={})",
            self.index_name,
            query.query_text,
            query.start,
            query.page_size,
            query.distinct
        );

        self.validate(&query)?;

        let parsed = self.parse(&query)?;
        let rewritten = self
            .query_triggers
            .iter()
            .fold(parsed, |current, trigger| {
                trigger.process_query(self.index_name, current, &query)
            });

        let lease = self.searcher_holder.get_searcher();
        let searcher = lease.searcher();

        let outcome = match query.page_size {
            PageSize::All => self.execute_all(&searcher, rewritten.as_ref(), &query, include_in_results),
            PageSize::Bounded(original_page_size) => self.execute_paged(
                &searcher,
                rewritten.as_ref(),
                &query,
                original_page_size,
                include_in_results,
            ),
        };

        log::debug!(
            "index '{}': query '{}' took {:?}",
            self.index_name,
            query.query_text,
            started.elapsed()
        );

        outcome
    }

    /// Step 1: every field named in a sort descriptor must be declared, be
    /// a `_Range` suffix of a declared field, or be the well-known
    /// distance field. Query-text field validity is delegated to the
    /// query parser itself (Non-goal: no query-language parsing lives
    /// here) and surfaces as the same error kind below.
    fn validate(&self, query: &Query) -> Result<(), IndexCoreError> {
        for sort in &query.sort {
            if sort.field == DISTANCE_FIELD_NAME {
                continue;
            }
            if self.definition.declares_field(&sort.field) {
                continue;
            }
            return Err(IndexCoreError::InvalidArgument {
                field: sort.field.clone(),
            });
        }
        Ok(())
    }

    /// Step 2: an empty query string matches everything; otherwise the
    /// query text is parsed against a per-field analyzer composed via the
    /// Analyzer Factory and any analyzer-generator plugins. The composed
    /// analyzer is registered under each field's own tokenizer name
    /// immediately before parsing, since `QueryParser` has no per-call
    /// analyzer override — that's the only extension point tantivy
    /// exposes for this.
    fn parse(&self, query: &Query) -> Result<Box<dyn TantivyQuery>, IndexCoreError> {
        if query.query_text.trim().is_empty() {
            return Ok(Box::new(AllQuery));
        }

        let search_fields = self.default_search_fields();
        let per_field = AnalyzerFactory::build(
            crate::analyzer::standard_analyzer(),
            self.definition,
            self.analyzer_registry,
        );

        for field in &search_fields {
            let entry = self.schema.get_field_entry(*field);
            let composed: TextAnalyzer = apply_querying_generators(
                self.query_generators,
                self.index_name,
                &query.query_text,
                per_field.get(entry.name()),
            );
            self.index.tokenizers().register(entry.name(), composed);
        }

        let parser = QueryParser::for_index(self.index, search_fields);
        parser.parse_query(&query.query_text).map_err(|err| match err {
            QueryParserError::FieldDoesNotExist(field) => IndexCoreError::InvalidArgument { field },
            other => IndexCoreError::InvalidArgument {
                field: other.to_string(),
            },
        })
    }

    /// Default fields searched when the query text has no explicit field
    /// prefix: every field the Definition declares an analyzer or a
    /// non-`NotAnalyzed` indexing mode for.
    fn default_search_fields(&self) -> Vec<Field> {
        let mut names: HashSet<String> = self.definition.analyzers.keys().cloned().collect();
        for (field, mode) in &self.definition.indexing_modes {
            if !matches!(mode, crate::document::IndexingMode::NotAnalyzed) {
                names.insert(field.clone());
            }
        }

        names
            .into_iter()
            .filter_map(|name| self.schema.get_field(&name))
            .collect()
    }

    fn execute_all(
        &self,
        searcher: &Searcher,
        query: &dyn TantivyQuery,
        request: &Query,
        include_in_results: impl Fn(&ProjectedDocument) -> bool,
    ) -> anyhow::Result<QueryOutcome> {
        let addresses = searcher.search(query, &DocSetCollector)?;
        let mut seen = HashSet::new();
        let mut outcome = QueryOutcome::default();
        outcome.total_hits = addresses.len();

        // `DocSetCollector` returns an unordered set; impose a stable
        // document-order traversal before projecting and filtering.
        let mut addresses: Vec<_> = addresses.into_iter().collect();
        addresses.sort_by_key(|addr| (addr.segment_ord, addr.doc_id));

        for addr in addresses {
            let stored = searcher.doc(addr)?;
            let projected = project(&stored, self.schema, &request.fields_to_fetch);

            if !include_in_results(&projected) {
                outcome.skipped += 1;
                continue;
            }

            if request.distinct {
                let key = canonical_key(&projected);
                if !seen.insert(key) {
                    outcome.skipped += 1;
                    continue;
                }
            }

            outcome.hits.push(projected);
        }

        Ok(outcome)
    }

    fn execute_paged(
        &self,
        searcher: &Searcher,
        query: &dyn TantivyQuery,
        request: &Query,
        original_page_size: usize,
        include_in_results: impl Fn(&ProjectedDocument) -> bool,
    ) -> anyhow::Result<QueryOutcome> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut outcome = QueryOutcome::default();

        // The true match count is independent of the paging window and of
        // any rescale the loop below does, so compute it once up front
        // with a dedicated `Count` collector rather than reading it off
        // `fetch_ranked`'s `TopDocs`-limited result (which only ever holds
        // `cursor_start + current_page_size` hits).
        outcome.total_hits = searcher.search(query, &Count)?;

        // Step 6: materialize every hit in [0, start) up front and mark
        // each projection already-seen, so distinctness holds across page
        // boundaries even though this `QueryOperation` has no memory of
        // earlier calls.
        if request.distinct && request.start > 0 {
            let prefix = self.fetch_ranked(searcher, query, request, request.start)?;
            for addr in prefix.iter().take(request.start) {
                let stored = searcher.doc(*addr)?;
                let projected = project(&stored, self.schema, &request.fields_to_fetch);
                seen.insert(canonical_key(&projected));
            }
        }

        let mut cursor_start = request.start;
        let mut current_page_size = original_page_size;

        loop {
            let ranked = self.fetch_ranked(searcher, query, request, cursor_start + current_page_size)?;

            let window_end = ranked.len().min(cursor_start + current_page_size);
            let mut skipped_this_pass = 0usize;

            for addr in &ranked[cursor_start.min(ranked.len())..window_end] {
                let stored = searcher.doc(*addr)?;
                let projected = project(&stored, self.schema, &request.fields_to_fetch);

                if !include_in_results(&projected) {
                    outcome.skipped += 1;
                    skipped_this_pass += 1;
                    continue;
                }

                if request.distinct {
                    let key = canonical_key(&projected);
                    if !seen.insert(key) {
                        outcome.skipped += 1;
                        skipped_this_pass += 1;
                        continue;
                    }
                }

                outcome.hits.push(projected);
                if outcome.hits.len() == original_page_size {
                    return Ok(outcome);
                }
            }

            let exhausted = window_end < cursor_start + current_page_size;
            if exhausted || skipped_this_pass == 0 {
                break;
            }

            // Step 8: rescale and re-enter the loop at the next offset.
            let rescaled = skipped_this_pass.saturating_mul(original_page_size);
            let capped = rescaled.min(original_page_size.saturating_mul(MAX_RESCALE_FACTOR));
            cursor_start += current_page_size;
            current_page_size = capped.max(1);
        }

        Ok(outcome)
    }

    fn fetch_ranked(
        &self,
        searcher: &Searcher,
        query: &dyn TantivyQuery,
        request: &Query,
        limit: usize,
    ) -> anyhow::Result<Vec<tantivy::DocAddress>> {
        let limit = limit.max(1);

        if let Some(sort) = request.sort.first() {
            if sort.field != DISTANCE_FIELD_NAME {
                let base_name = sort.field.trim_end_matches(SIDECAR_RANGE);
                if self.schema.get_field(base_name).is_some() {
                    let order = if sort.descending { Order::Desc } else { Order::Asc };
                    let collector = TopDocs::with_limit(limit).order_by_fast_field::<u64>(base_name, order);
                    let ranked = searcher.search(query, &collector)?;
                    return Ok(ranked.into_iter().map(|(_, addr)| addr).collect());
                }
            }
        }

        let collector = TopDocs::with_limit(limit);
        let ranked = searcher.search(query, &collector)?;
        Ok(ranked.into_iter().map(|(_score, addr)| addr).collect())
    }
}

/// Projects a stored document through `fields_to_fetch` per §4.5's
/// Projection rules.
pub fn project(
    stored: &TantivyDocument,
    schema: &Schema,
    fields_to_fetch: &FieldsToFetch,
) -> ProjectedDocument {
    let mut out = ProjectedDocument::new();

    for name in &fields_to_fetch.names {
        if is_sidecar_field(name) {
            continue;
        }

        let field = match schema.get_field(name) {
            Some(field) => field,
            None => continue,
        };

        let has_is_array_sidecar = schema
            .get_field(&format!("{}{}", name, crate::document::SIDECAR_IS_ARRAY))
            .map(|sidecar_field| !stored.get_all(sidecar_field).next().is_none())
            .unwrap_or(false);

        let convert_to_json = schema
            .get_field(&format!("{}{}", name, SIDECAR_CONVERT_TO_JSON))
            .map(|sidecar_field| !stored.get_all(sidecar_field).next().is_none())
            .unwrap_or(false);

        let values: Vec<serde_json::Value> = stored
            .get_all(field)
            .map(|value| create_property(value, convert_to_json))
            .collect();

        if values.is_empty() {
            continue;
        }

        let projected = if values.len() == 1 && !has_is_array_sidecar {
            values.into_iter().next().unwrap()
        } else {
            serde_json::Value::Array(values)
        };

        out.insert(name.clone(), projected);
    }

    out
}

/// CreateProperty rules (§4.5).
fn create_property(value: &SchemaValue, convert_to_json: bool) -> serde_json::Value {
    let raw = match value {
        SchemaValue::Str(s) => s.clone(),
        SchemaValue::U64(n) => return serde_json::json!(n),
        SchemaValue::I64(n) => return serde_json::json!(n),
        SchemaValue::F64(n) => return serde_json::json!(n),
        SchemaValue::Bytes(b) => return serde_json::json!(base64_encode(b)),
        SchemaValue::Date(d) => return serde_json::json!(format!("{:?}", d)),
        _ => return serde_json::Value::Null,
    };

    if convert_to_json {
        if let Ok(parsed) = serde_json::from_str(&raw) {
            return parsed;
        }
    }

    if raw == NULL_VALUE {
        serde_json::Value::Null
    } else if raw == EMPTY_STRING {
        serde_json::Value::String(String::new())
    } else {
        serde_json::Value::String(raw)
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);

        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(b2 & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn canonical_key(doc: &ProjectedDocument) -> String {
    let mut entries: Vec<(&String, &serde_json::Value)> = doc.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    serde_json::to_string(&entries).unwrap_or_default()
}
