//! CLI for the notegraph note store.
//!
//! Subcommands:
//!  - `add`     : capture a note
//!  - `list`    : list notes, newest first
//!  - `search`  : semantic search over note content
//!  - `edit`    : replace a note's content
//!  - `delete`  : delete a note
//!  - `graph`   : print the relationship graph
//!  - `related` : notes most similar to a given note
//!  - `show`    : print a single note
//!  - `import`  : capture one note per line of a file (batched embedding)
//!  - `reembed` : embed notes whose stored embedding is missing or unusable
//!
//! Configuration is layered: defaults, `--config` JSON file, `NOTEGRAPH_*`
//! environment variables, then the global flags below. With `--json` every
//! command prints a `{success, data?, error?, kind?}` envelope on stdout.
//!
//! Usage examples:
//!  cargo run -p notegraph -- add "Mountain trails are beautiful"
//!  cargo run -p notegraph -- search mountains --limit 3
//!  cargo run -p notegraph -- --embedder fake graph --json

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use notegraph::config::{env_vars, EmbedderKind, NotegraphConfig};
use notegraph::utils::logging;
use notegraph::vector::EmbeddingEncoding;
use notegraph::{ActionResponse, GraphSnapshot, Note, NoteError, NoteId, NoteService, ScoredNote};

mod progress;

use crate::progress::Progress;

/// Characters of content shown per note in human-readable listings.
const LIST_PREVIEW_CHARS: usize = 80;

/// CLI entrypoint.
#[derive(Parser)]
#[command(
    name = "notegraph",
    about = "Capture notes and explore their semantic relationships",
    version
)]
struct Cli {
    /// JSON config file.
    #[arg(long, global = true, value_name = "PATH", env = "NOTEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Note store file (overrides config and NOTEGRAPH_STORE).
    #[arg(short = 's', long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    /// Embedding provider: ollama|fake.
    #[arg(long, global = true)]
    embedder: Option<String>,

    /// Embedding model served by the provider.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Embedding dimension of the provider/model.
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Write embeddings to the store file as bracketed text instead of arrays.
    #[arg(long, global = true)]
    text_embeddings: bool,

    /// Output results as JSON to stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a new note.
    Add(TextArgs),

    /// List notes, newest first.
    List(ListArgs),

    /// Semantic search over notes.
    Search(SearchArgs),

    /// Replace the content of an existing note.
    Edit(EditArgs),

    /// Delete a note.
    Delete(IdArgs),

    /// Print the relationship graph (symmetric top-K nearest neighbours).
    Graph(GraphArgs),

    /// Notes most similar to a given note.
    Related(RelatedArgs),

    /// Print one note.
    Show(IdArgs),

    /// Capture one note per non-empty line of a file ("-" reads stdin).
    Import(ImportArgs),

    /// Embed notes that lack a usable embedding.
    Reembed,
}

/// Note text given as words on the command line, or "-" for stdin.
#[derive(Args, Debug)]
struct TextArgs {
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Maximum number of notes to print.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Query text.
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    /// Maximum number of results (default from config: 5).
    #[arg(short = 'k', long)]
    limit: Option<usize>,

    /// Minimum similarity (inclusive). Default from config: 0.3
    #[arg(long)]
    min_score: Option<f32>,
}

#[derive(Args, Debug)]
struct EditArgs {
    /// Note id.
    id: NoteId,

    #[command(flatten)]
    text: TextArgs,
}

#[derive(Args, Debug)]
struct IdArgs {
    /// Note id.
    id: NoteId,
}

#[derive(Args, Debug)]
struct GraphArgs {
    /// Neighbours proposed per note (default from config: 2).
    #[arg(short = 'k', long)]
    k: Option<usize>,
}

#[derive(Args, Debug)]
struct RelatedArgs {
    /// Note id.
    id: NoteId,

    /// Maximum number of related notes.
    #[arg(short = 'k', long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// File with one note per line, or "-" for stdin.
    #[arg(value_name = "PATH")]
    file: PathBuf,
}

/// Application entry point.
fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let json = cli.json;
    match run(cli) {
        Ok(()) => Ok(()),
        Err(err) if json => {
            let response: ActionResponse<()> = match err.downcast_ref::<NoteError>() {
                Some(note_err) => ActionResponse::err(note_err),
                None => ActionResponse {
                    success: false,
                    data: None,
                    error: Some(format!("{err:#}")),
                    kind: None,
                },
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = load_config(&cli)?;

    // Per-command knobs that live in the service configuration.
    match &cli.command {
        Commands::Search(args) => {
            if let Some(min) = args.min_score {
                cfg.search.min_threshold = min;
            }
        }
        Commands::Graph(args) => {
            if let Some(k) = args.k {
                cfg.graph.k = k;
            }
        }
        _ => {}
    }
    cfg.validate().context("invalid configuration")?;
    debug!(?cfg, "effective configuration");

    let service = NoteService::from_config(&cfg).context("opening note service")?;
    let json = cli.json;

    match cli.command {
        Commands::Add(args) => run_add(&service, args, json),
        Commands::List(args) => run_list(&service, args, json),
        Commands::Search(args) => run_search(&service, args, json),
        Commands::Edit(args) => run_edit(&service, args, json),
        Commands::Delete(args) => run_delete(&service, args, json),
        Commands::Graph(_) => run_graph(&service, json),
        Commands::Related(args) => run_related(&service, args, json),
        Commands::Show(args) => run_show(&service, args, json),
        Commands::Import(args) => run_import(&service, args, json),
        Commands::Reembed => run_reembed(&service, json),
    }
}

/// Defaults, then `--config`, then `NOTEGRAPH_*` variables, then global flags.
fn load_config(cli: &Cli) -> Result<NotegraphConfig> {
    let mut cfg = match cli.config {
        Some(ref path) => NotegraphConfig::load(path)?,
        None => NotegraphConfig::default(),
    };
    cfg.apply_overrides_from(|key| {
        // NOTEGRAPH_CONFIG is consumed by clap above.
        if key == env_vars::CONFIG {
            None
        } else {
            std::env::var(key).ok()
        }
    })?;

    if let Some(ref path) = cli.store {
        cfg.store.path = Some(path.clone());
    }
    if let Some(ref kind) = cli.embedder {
        cfg.embedder.kind = kind.parse::<EmbedderKind>()?;
    }
    if let Some(ref model) = cli.model {
        cfg.embedder.model = model.clone();
    }
    if let Some(dimension) = cli.dimension {
        cfg.embedder.dimension = dimension;
    }
    if cli.text_embeddings {
        cfg.store.encoding = EmbeddingEncoding::Text;
    }
    Ok(cfg)
}

/// Join positional words into one text; a lone "-" reads stdin instead.
fn read_text(words: &[String]) -> Result<String> {
    if words.len() == 1 && words[0] == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("reading note text from stdin")?;
        return Ok(buf);
    }
    Ok(words.join(" "))
}

fn print_json<T: Serialize>(data: T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&ActionResponse::ok(data))?);
    Ok(())
}

fn print_note_line(note: &Note) {
    println!(
        "#{:<5} {}  {}",
        note.id,
        note.created_at.format("%Y-%m-%d %H:%M"),
        note.preview(LIST_PREVIEW_CHARS)
    );
}

fn print_scored(hits: &[ScoredNote]) {
    for hit in hits {
        println!(
            "{}. #{} score={:.3}  {}",
            hit.rank,
            hit.note.id,
            hit.similarity,
            hit.note.preview(LIST_PREVIEW_CHARS)
        );
    }
}

fn run_add(service: &NoteService, args: TextArgs, json: bool) -> Result<()> {
    let text = read_text(&args.text)?;
    let note = service.create_note(&text).context("creating note")?;
    if json {
        return print_json(note);
    }
    println!("Created note #{}", note.id);
    Ok(())
}

fn run_list(service: &NoteService, args: ListArgs, json: bool) -> Result<()> {
    let mut notes = service.get_notes();
    if let Some(limit) = args.limit {
        notes.truncate(limit);
    }
    if json {
        return print_json(notes);
    }
    if notes.is_empty() {
        println!("No notes yet.");
    }
    for note in &notes {
        print_note_line(note);
    }
    Ok(())
}

fn run_search(service: &NoteService, args: SearchArgs, json: bool) -> Result<()> {
    let query = args.query.join(" ");
    let hits = service
        .search_notes(&query, args.limit)
        .with_context(|| format!("searching for {query:?}"))?;
    if json {
        return print_json(hits);
    }
    if hits.is_empty() {
        println!("No notes match {query:?}.");
        return Ok(());
    }
    println!("Top {} matching notes for {:?}:", hits.len(), query);
    print_scored(&hits);
    Ok(())
}

fn run_edit(service: &NoteService, args: EditArgs, json: bool) -> Result<()> {
    let text = read_text(&args.text.text)?;
    let note = service
        .update_note(args.id, &text)
        .with_context(|| format!("updating note #{}", args.id))?;
    if json {
        return print_json(note);
    }
    println!("Updated note #{}", note.id);
    Ok(())
}

fn run_delete(service: &NoteService, args: IdArgs, json: bool) -> Result<()> {
    service
        .delete_note(args.id)
        .with_context(|| format!("deleting note #{}", args.id))?;
    if json {
        return print_json(serde_json::json!({ "id": args.id }));
    }
    println!("Deleted note #{}", args.id);
    Ok(())
}

fn run_graph(service: &NoteService, json: bool) -> Result<()> {
    let graph: GraphSnapshot = service.get_graph_data();
    if json {
        return print_json(graph);
    }
    println!(
        "Graph: {} nodes, {} edges (k = {})",
        graph.nodes.len(),
        graph.edges.len(),
        service.config().graph.k
    );
    for node in &graph.nodes {
        println!("  #{:<5} degree={}  {}", node.id, node.degree, node.label);
    }
    if !graph.edges.is_empty() {
        println!("\nEdges:");
        for edge in &graph.edges {
            println!("  {} <-> {} (sim: {:.3})", edge.source, edge.target, edge.weight);
        }
    }
    Ok(())
}

fn run_related(service: &NoteService, args: RelatedArgs, json: bool) -> Result<()> {
    let hits = service
        .get_related_notes(args.id, args.limit)
        .with_context(|| format!("finding notes related to #{}", args.id))?;
    if json {
        return print_json(hits);
    }
    if hits.is_empty() {
        println!("No related notes found.");
        return Ok(());
    }
    println!("Notes related to #{}:", args.id);
    print_scored(&hits);
    Ok(())
}

fn run_show(service: &NoteService, args: IdArgs, json: bool) -> Result<()> {
    let note = service
        .get_note(args.id)
        .with_context(|| format!("loading note #{}", args.id))?;
    if json {
        return print_json(note);
    }
    println!("note_id={}", note.id);
    println!("created_at={}", note.created_at.to_rfc3339());
    if let Some(updated) = note.updated_at {
        println!("updated_at={}", updated.to_rfc3339());
    }
    println!(
        "embedding={}",
        match note.valid_embedding(service.store().dimension()) {
            Some(e) => format!("{} dims", e.len()),
            None => "missing".to_string(),
        }
    );
    println!("\n{}", note.content);
    Ok(())
}

fn run_import(service: &NoteService, args: ImportArgs, json: bool) -> Result<()> {
    let raw = if args.file.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("reading notes from stdin")?;
        buf
    } else {
        fs::read_to_string(&args.file)
            .with_context(|| format!("reading {}", args.file.display()))?
    };

    let lines: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        bail!("no notes found in {}", args.file.display());
    }

    let bar = Progress::new(lines.len(), "Embedding notes...");
    let notes = match service.create_notes(&lines, bar.callback()) {
        Ok(notes) => notes,
        Err(e) => {
            bar.abandon();
            return Err(e).context("importing notes");
        }
    };
    bar.finish(format!("Imported {} notes.", notes.len()));

    if json {
        return print_json(notes);
    }
    Ok(())
}

fn run_reembed(service: &NoteService, json: bool) -> Result<()> {
    let pending = service
        .store()
        .snapshot()
        .iter()
        .filter(|n| n.valid_embedding(service.store().dimension()).is_none())
        .count();
    let bar = Progress::new(pending, "Re-embedding notes...");
    let repaired = match service.reembed_all(bar.callback()) {
        Ok(n) => n,
        Err(e) => {
            bar.abandon();
            return Err(e).context("re-embedding notes");
        }
    };
    bar.finish(format!("Re-embedded {repaired} notes."));

    if json {
        return print_json(serde_json::json!({ "reembedded": repaired }));
    }
    Ok(())
}
