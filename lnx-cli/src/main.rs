#[macro_use]
extern crate log;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use structopt::StructOpt;

use index_core::document::{FieldValue, IndexableDocument, IndexableField};
use index_core::query::{FieldsToFetch, PageSize, Query, QueryTrigger, SortDescriptor};
use index_core::{CountingStorageActions, Definition, IndexCore, StorageType, WorkContext};

#[derive(Debug, StructOpt)]
#[structopt(name = "lnx-cli", about = "A minimal driver for the index-core engine.")]
struct Settings {
    /// The log level filter, any logs that are above this level won't be
    /// displayed.
    #[structopt(long, default_value = "info", env)]
    log_level: LevelFilter,

    /// An optional bool to use ANSI colours for log levels. You probably
    /// want to disable this if using file-based logging.
    #[structopt(long, env)]
    pretty_logs: Option<bool>,

    /// A newline-delimited JSON file of documents to index. Each line must
    /// be a flat JSON object; every key becomes a text field.
    #[structopt(long, parse(from_os_str))]
    documents: PathBuf,

    /// Where the index lives: "memory", "tempfile", or a filesystem path.
    #[structopt(long, default_value = "memory")]
    storage: String,

    /// The query string to run once indexing has finished. An empty string
    /// matches every document.
    #[structopt(long, default_value = "")]
    query: String,

    /// Return at most this many hits.
    #[structopt(long, default_value = "10")]
    limit: usize,

    /// Suppress duplicate projected documents.
    #[structopt(long)]
    distinct: bool,
}

fn main() {
    let settings = Settings::from_args();

    if let Err(err) = setup_logger(settings.log_level, settings.pretty_logs.unwrap_or(true)) {
        eprintln!("error setting up logging: {:?}", err);
        return;
    }

    if let Err(err) = run(settings) {
        error!("error during run: {:?}", err);
    }
}

fn setup_logger(level: LevelFilter, pretty: bool) -> Result<()> {
    let mut colours = ColoredLevelConfig::new();

    if pretty {
        colours = colours
            .info(Color::Green)
            .warn(Color::Yellow)
            .error(Color::BrightRed)
            .debug(Color::Magenta)
            .trace(Color::Cyan);
    }

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} | {} | {:<5} - {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                colours.color(record.level()),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}

fn parse_storage(raw: &str) -> StorageType {
    match raw {
        "memory" => StorageType::Memory,
        "tempfile" => StorageType::TempFile,
        path => StorageType::FileSystem(PathBuf::from(path)),
    }
}

/// Builds a schema covering every key seen across the document file, typing
/// each field as text and marking the reserved id field as such too. A real
/// deployment declares its schema up front; this demo infers one so the CLI
/// has no config file of its own to maintain.
fn infer_schema_and_definition(path: &PathBuf) -> Result<(tantivy::schema::Schema, Definition)> {
    use tantivy::schema::{Schema, STORED, STRING, TEXT};

    let file = fs::File::open(path).with_context(|| format!("opening {:?}", path))?;
    let reader = BufReader::new(file);

    let mut field_names: Vec<String> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)?;
        if let serde_json::Value::Object(map) = value {
            for key in map.keys() {
                if !field_names.iter().any(|n| n == key) {
                    field_names.push(key.clone());
                }
            }
        }
    }

    let mut builder = Schema::builder();
    builder.add_text_field(
        index_core::document::DOCUMENT_ID_FIELD_NAME,
        STRING | STORED,
    );
    for name in &field_names {
        builder.add_text_field(name, TEXT | STORED);
    }

    Ok((builder.build(), Definition::new("cli_index")))
}

fn run(settings: Settings) -> Result<()> {
    let (schema, definition) = infer_schema_and_definition(&settings.documents)?;
    let storage = parse_storage(&settings.storage);

    let index = IndexCore::create(
        "cli_index",
        definition,
        schema,
        storage,
        index_core::analyzer::AnalyzerRegistry::with_builtin(),
        Vec::new(),
    )?;

    let ctx = WorkContext::default();
    let stats = CountingStorageActions::default();

    let file = fs::File::open(&settings.documents)?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()?;

    index.index_documents(
        |line: String| -> Result<Vec<IndexableDocument>> {
            let value: serde_json::Value = serde_json::from_str(&line)?;
            let object = value
                .as_object()
                .context("each line must be a JSON object")?;

            let mut document = IndexableDocument::new();
            for (key, val) in object {
                let text = match val {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                document.push(IndexableField {
                    name: key.clone(),
                    value: FieldValue::Text(text),
                    stored: true,
                    indexed: true,
                    analyzed: key != index_core::document::DOCUMENT_ID_FIELD_NAME,
                });
            }
            Ok(vec![document])
        },
        lines.into_iter().filter(|l| !l.trim().is_empty()),
        &ctx,
        &stats,
    )?;

    index.flush()?;

    for failure in ctx.errors() {
        warn!("document failed to index: {}", failure.message);
    }
    info!(
        "indexed batch complete ({} attempts recorded)",
        stats.indexing_attempts.load(std::sync::atomic::Ordering::SeqCst)
    );

    let triggers: Vec<Box<dyn QueryTrigger>> = Vec::new();
    let handle = index.query(&triggers)?;

    let outcome = handle.execute(
        Query {
            query_text: settings.query.clone(),
            start: 0,
            page_size: PageSize::Bounded(settings.limit),
            sort: Vec::<SortDescriptor>::new(),
            distinct: settings.distinct,
            fields_to_fetch: FieldsToFetch::all_stored(index.schema()),
        },
        |_| true,
    )?;

    info!(
        "query '{}' returned {} hit(s), {} skipped",
        settings.query, outcome.total_hits, outcome.skipped
    );
    for hit in &outcome.hits {
        println!("{}", serde_json::to_string(hit)?);
    }

    index.dispose();

    Ok(())
}
