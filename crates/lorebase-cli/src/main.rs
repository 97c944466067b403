//! Lorebase CLI
//!
//! Single-shot interface over the corpus:
//! - `index` / `search` / `stats` / `doc` — scan and query the in-memory store
//! - `create` / `update` / `archive` — crash-safe mutations through the
//!   atomic mutator (duplicate-checked, consistency-verified)
//! - `register` / `unregister` / `resolve` / `ids` — logical identifier
//!   registry maintenance
//! - `links` — typed relation extraction, optionally dumped as JSON
//!
//! The index is rebuilt per invocation; only the registry file persists
//! between runs. Status goes to stderr, machine-readable output to stdout.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use lorebase_links::{Relation, RelationExtractor, RelationsFileV1};
use lorebase_store::{
    classify, AtomicMutator, DigestDuplicateChecker, DocumentKind, DocumentStore, LogicalId,
    MutationReceipt, ScanOptions, StoreStatistics,
};
use parking_lot::RwLock;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lorebase")]
#[command(
    author,
    version,
    about = "Lorebase: searchable knowledge corpus with crash-safe mutations"
)]
struct Cli {
    #[command(flatten)]
    corpus: CorpusArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CorpusArgs {
    /// Corpus root directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Registry file (default: `<root>/.lorebase/registry.json`).
    #[arg(long, global = true)]
    registry: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the corpus root and report what got indexed.
    Index {
        /// Re-index files even when their mtime is unchanged.
        #[arg(long)]
        force: bool,
        /// Index only the top level of the root.
        #[arg(long)]
        no_recursive: bool,
        /// File extensions to index (default: md).
        #[arg(long = "ext")]
        extensions: Vec<String>,
        /// Skip files larger than this many bytes.
        #[arg(long)]
        max_file_bytes: Option<u64>,
        /// Directory names pruned from the walk.
        #[arg(long = "exclude")]
        exclude_dirs: Vec<String>,
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ranked search over the corpus.
    Search {
        query: String,
        /// Restrict results to one document kind (task, incident, standard, ...).
        #[arg(long)]
        kind: Option<String>,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Corpus statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Show one document, addressed by path or logical identifier.
    Doc {
        reference: String,
        /// Print the full document as JSON.
        #[arg(long)]
        json: bool,
        /// Print the raw content after the metadata.
        #[arg(long)]
        content: bool,
    },

    /// Create a document (rejects duplicates and existing paths).
    Create {
        path: PathBuf,
        /// Inline content; falls back to --file, then stdin.
        #[arg(long)]
        content: Option<String>,
        /// Read content from a file.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Override the classified kind.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Overwrite a document in place (backup, write, verify, rollback on failure).
    Update {
        path: PathBuf,
        /// Inline content; falls back to --file, then stdin.
        #[arg(long)]
        content: Option<String>,
        /// Read content from a file.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Override the classified kind.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Move a document under the archive root, partitioned by kind.
    Archive {
        path: PathBuf,
        /// Archive root (default: `<root>/archive`).
        #[arg(long)]
        archive_root: Option<PathBuf>,
        /// Override the classified kind.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Bind a logical identifier to a path.
    Register { id: String, path: PathBuf },

    /// Remove a logical identifier.
    Unregister { id: String },

    /// Print the path a logical identifier points at.
    Resolve { id: String },

    /// List every registered identifier with its path.
    Ids,

    /// Typed relation extraction over the corpus.
    Links {
        #[command(subcommand)]
        command: LinksCommands,
    },
}

#[derive(Subcommand)]
enum LinksCommands {
    /// Extract relations whose source is one document.
    Analyze {
        path: PathBuf,
        /// Write a versioned relations dump instead of printing.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the dump as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Extract relations for every registered document.
    All {
        /// Write a versioned relations dump instead of printing.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the dump as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let root = cli
        .corpus
        .root
        .canonicalize()
        .with_context(|| format!("corpus root {} not found", cli.corpus.root.display()))?;
    let registry_file = cli
        .corpus
        .registry
        .clone()
        .unwrap_or_else(|| root.join(".lorebase").join("registry.json"));

    match cli.command {
        Commands::Index {
            force,
            no_recursive,
            extensions,
            max_file_bytes,
            exclude_dirs,
            json,
        } => cmd_index(
            &root,
            &registry_file,
            force,
            no_recursive,
            extensions,
            max_file_bytes,
            exclude_dirs,
            json,
        ),
        Commands::Search {
            query,
            kind,
            limit,
            json,
        } => cmd_search(&root, &registry_file, &query, kind.as_deref(), limit, json),
        Commands::Stats { json } => cmd_stats(&root, &registry_file, json),
        Commands::Doc {
            reference,
            json,
            content,
        } => cmd_doc(&root, &registry_file, &reference, json, content),
        Commands::Create {
            path,
            content,
            file,
            kind,
        } => cmd_create(&root, &registry_file, path, content, file, kind.as_deref()),
        Commands::Update {
            path,
            content,
            file,
            kind,
        } => cmd_update(&root, &registry_file, path, content, file, kind.as_deref()),
        Commands::Archive {
            path,
            archive_root,
            kind,
        } => cmd_archive(&root, &registry_file, path, archive_root, kind.as_deref()),
        Commands::Register { id, path } => cmd_register(&root, &registry_file, &id, path),
        Commands::Unregister { id } => cmd_unregister(&registry_file, &id),
        Commands::Resolve { id } => cmd_resolve(&registry_file, &id),
        Commands::Ids => cmd_ids(&registry_file),
        Commands::Links { command } => cmd_links(&root, &registry_file, command),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

// ============================================================================
// Store plumbing
// ============================================================================

/// Open the store and index the corpus root with default scan options.
fn open_indexed(root: &Path, registry_file: &Path) -> Result<Arc<RwLock<DocumentStore>>> {
    let store = Arc::new(RwLock::new(DocumentStore::open(registry_file)));
    store
        .write()
        .index_directory(root, &ScanOptions::default())?;
    Ok(store)
}

/// Mutator wired the way the CLI always wants it: digest-based duplicate
/// checking on, no external sync probe.
fn corpus_mutator(store: &Arc<RwLock<DocumentStore>>, archive_root: PathBuf) -> AtomicMutator {
    let checker = Arc::new(DigestDuplicateChecker::new(Arc::clone(store)));
    AtomicMutator::new(Arc::clone(store), archive_root).with_duplicate_checker(checker)
}

/// Absolute inputs pass through; relative ones are taken from the corpus root.
fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn parse_kind(raw: Option<&str>) -> Result<Option<DocumentKind>> {
    raw.map(|raw| raw.parse::<DocumentKind>().map_err(|err| anyhow!(err)))
        .transpose()
}

/// Content from `--content`, `--file`, or stdin, in that order.
fn read_content(inline: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(inline) = inline {
        return Ok(inline);
    }
    if let Some(file) = file {
        return fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()));
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading content from stdin")?;
    Ok(buffer)
}

fn report_receipt(receipt: &MutationReceipt) {
    for warning in &receipt.warnings {
        eprintln!("{} {}", "warn".yellow().bold(), warning);
    }
    eprintln!(
        "{} {} {}",
        "ok".green().bold(),
        receipt.operation,
        receipt.path.display()
    );
    println!("{}", receipt.path.display());
}

// ============================================================================
// Query commands
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_index(
    root: &Path,
    registry_file: &Path,
    force: bool,
    no_recursive: bool,
    extensions: Vec<String>,
    max_file_bytes: Option<u64>,
    exclude_dirs: Vec<String>,
    json: bool,
) -> Result<()> {
    let mut options = ScanOptions {
        force,
        recursive: !no_recursive,
        ..ScanOptions::default()
    };
    if !extensions.is_empty() {
        options.extensions = extensions;
    }
    if let Some(limit) = max_file_bytes {
        options.max_file_bytes = limit;
    }
    if !exclude_dirs.is_empty() {
        options.exclude_dirs = exclude_dirs;
    }

    let store = Arc::new(RwLock::new(DocumentStore::open(registry_file)));
    let indexed = store.write().index_directory(root, &options)?;
    let stats = store.read().statistics();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    eprintln!(
        "{} indexed {} files under {}",
        "ok".green().bold(),
        indexed,
        root.display()
    );
    print_stats(&stats);
    Ok(())
}

fn cmd_search(
    root: &Path,
    registry_file: &Path,
    query: &str,
    kind: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let kind = parse_kind(kind)?;
    let store = open_indexed(root, registry_file)?;
    let hits = store.read().search(query, kind, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        eprintln!("{} nothing matches {:?}", "none".yellow().bold(), query);
        return Ok(());
    }
    for hit in &hits {
        let title = hit.title.as_deref().unwrap_or("");
        println!(
            "{:>4}  {:<18} {}  {}",
            hit.score,
            hit.kind.as_str(),
            hit.path.display(),
            title.dimmed()
        );
    }
    Ok(())
}

fn cmd_stats(root: &Path, registry_file: &Path, json: bool) -> Result<()> {
    let store = open_indexed(root, registry_file)?;
    let stats = store.read().statistics();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &StoreStatistics) {
    println!("documents: {}", stats.documents);
    for (kind, count) in &stats.by_kind {
        println!("  {:<20} {}", kind.as_str(), count);
    }
    println!("total tokens: {}", stats.total_tokens);
    println!("distinct words: {}", stats.distinct_words);
    println!("registered ids: {}", stats.logical_ids);
}

fn cmd_doc(
    root: &Path,
    registry_file: &Path,
    reference: &str,
    json: bool,
    content: bool,
) -> Result<()> {
    let store = open_indexed(root, registry_file)?;
    let store = store.read();

    let document = match reference.parse::<LogicalId>() {
        Ok(id) if store.registry().resolve(&id).is_some() => store.get_document_by_id(&id),
        _ => store.get_document(&resolve_path(root, Path::new(reference))),
    };
    let Some(document) = document else {
        bail!("no indexed document for `{reference}`");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(document)?);
        return Ok(());
    }
    println!("path: {}", document.path.display());
    println!("kind: {}", document.kind);
    if let Some(title) = &document.title {
        println!("title: {title}");
    }
    println!("modified: {}", document.last_modified.to_rfc3339());
    println!("digest: {}", document.digest);
    if let Some(id) = store.registry().reverse(&document.path) {
        println!("id: {id}");
    }
    if content {
        println!();
        print!("{}", document.raw_content);
    }
    Ok(())
}

// ============================================================================
// Mutation commands
// ============================================================================

fn cmd_create(
    root: &Path,
    registry_file: &Path,
    path: PathBuf,
    inline: Option<String>,
    file: Option<PathBuf>,
    kind: Option<&str>,
) -> Result<()> {
    let path = resolve_path(root, &path);
    let content = read_content(inline, file)?;
    let kind = match parse_kind(kind)? {
        Some(kind) => kind,
        None => classify(&path, Some(&content)),
    };

    let store = open_indexed(root, registry_file)?;
    let mutator = corpus_mutator(&store, root.join("archive"));
    let receipt = mutator.create(&path, &content, kind)?;
    report_receipt(&receipt);
    Ok(())
}

fn cmd_update(
    root: &Path,
    registry_file: &Path,
    path: PathBuf,
    inline: Option<String>,
    file: Option<PathBuf>,
    kind: Option<&str>,
) -> Result<()> {
    let path = resolve_path(root, &path);
    let content = read_content(inline, file)?;

    let store = open_indexed(root, registry_file)?;
    let kind = match parse_kind(kind)? {
        Some(kind) => kind,
        None => {
            let guard = store.read();
            guard
                .get_document(&path)
                .map(|doc| doc.kind)
                .unwrap_or_else(|| classify(&path, Some(&content)))
        }
    };

    let mutator = corpus_mutator(&store, root.join("archive"));
    let receipt = mutator.update(&path, &content, kind)?;
    report_receipt(&receipt);
    Ok(())
}

fn cmd_archive(
    root: &Path,
    registry_file: &Path,
    path: PathBuf,
    archive_root: Option<PathBuf>,
    kind: Option<&str>,
) -> Result<()> {
    let path = resolve_path(root, &path);
    let archive_root = archive_root
        .map(|dir| resolve_path(root, &dir))
        .unwrap_or_else(|| root.join("archive"));

    let store = open_indexed(root, registry_file)?;
    let kind = match parse_kind(kind)? {
        Some(kind) => kind,
        None => {
            let guard = store.read();
            match guard.get_document(&path) {
                Some(doc) => doc.kind,
                None => classify(&path, fs::read_to_string(&path).ok().as_deref()),
            }
        }
    };

    let mutator = corpus_mutator(&store, archive_root);
    let receipt = mutator.archive(&path, kind)?;
    report_receipt(&receipt);
    Ok(())
}

// ============================================================================
// Registry commands
// ============================================================================

fn cmd_register(root: &Path, registry_file: &Path, id: &str, path: PathBuf) -> Result<()> {
    let id: LogicalId = id.parse()?;
    let path = resolve_path(root, &path);

    let mut store = DocumentStore::open(registry_file);
    store.registry_mut().register(id.clone(), &path)?;
    eprintln!("{} {} -> {}", "ok".green().bold(), id, path.display());
    Ok(())
}

fn cmd_unregister(registry_file: &Path, id: &str) -> Result<()> {
    let id: LogicalId = id.parse()?;

    let mut store = DocumentStore::open(registry_file);
    if store.registry_mut().unregister(&id)? {
        eprintln!("{} removed {}", "ok".green().bold(), id);
    } else {
        eprintln!("{} {} was not registered", "none".yellow().bold(), id);
    }
    Ok(())
}

fn cmd_resolve(registry_file: &Path, id: &str) -> Result<()> {
    let id: LogicalId = id.parse()?;
    let store = DocumentStore::open(registry_file);
    match store.registry().resolve(&id) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("`{id}` is not registered"),
    }
}

fn cmd_ids(registry_file: &Path) -> Result<()> {
    let store = DocumentStore::open(registry_file);
    for (id, path) in store.registry().iter() {
        println!("{}  {}", id, path.display());
    }
    Ok(())
}

// ============================================================================
// Relation commands
// ============================================================================

fn cmd_links(root: &Path, registry_file: &Path, command: LinksCommands) -> Result<()> {
    let store = open_indexed(root, registry_file)?;
    let extractor = RelationExtractor::new(Arc::clone(&store));

    match command {
        LinksCommands::Analyze { path, out, json } => {
            let path = resolve_path(root, &path);
            let relations = extractor.analyze(&path)?;
            emit_relations(relations, out, json)
        }
        LinksCommands::All { out, json } => {
            let relations = extractor.analyze_all()?;
            emit_relations(relations, out, json)
        }
    }
}

fn emit_relations(relations: Vec<Relation>, out: Option<PathBuf>, json: bool) -> Result<()> {
    let dump = RelationsFileV1::new(relations);

    if let Some(out) = out {
        dump.save(&out)?;
        eprintln!(
            "{} wrote {} relations to {}",
            "ok".green().bold(),
            dump.relations.len(),
            out.display()
        );
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&dump)?);
        return Ok(());
    }
    if dump.relations.is_empty() {
        eprintln!("{} no relations found", "none".yellow().bold());
        return Ok(());
    }
    for relation in &dump.relations {
        println!(
            "{} -[{}]-> {}  {:.2}",
            relation.source_id, relation.relation_type, relation.target_id, relation.confidence
        );
    }
    Ok(())
}
