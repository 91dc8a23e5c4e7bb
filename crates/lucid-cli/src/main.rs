mod server;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lucid_core::{
    Answer, AssertOutcome, CancelToken, EngineConfig, EntryId, InferenceError, Lexicon, Session,
    SessionError, build_lexicon, export_json, import_json,
};
use lucid_store::{KbStore, default_base_dir};
use rmcp::{ServiceExt, transport::stdio};

#[derive(Parser)]
#[command(name = "lucid", about = "Controlled-language knowledge base CLI and MCP server")]
struct Cli {
    /// Knowledge base to operate on
    #[arg(long, global = true, default_value = "default")]
    kb: String,

    /// Config file (defaults to <data-dir>/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extra vocabulary file, may be repeated
    #[arg(long, global = true)]
    lexicon: Vec<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Assert one or more statements
    Assert {
        /// Statements, e.g. "A farmer owns a donkey."
        text: String,
    },

    /// Retract an entry by id
    Retract {
        /// Entry id as printed by `assert` or `list`
        id: u64,
    },

    /// Ask a question
    Query {
        /// Question, e.g. "Who owns a donkey?"
        text: String,

        /// Print the proof behind the answer
        #[arg(long)]
        explain: bool,
    },

    /// Assert the statements of one or more text files
    Ingest {
        /// File path(s) to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Compile files in parallel (no pronouns across files)
        #[arg(long)]
        parallel: bool,
    },

    /// List entries
    List {
        /// Include retracted entries
        #[arg(long)]
        all: bool,
    },

    /// Show knowledge base statistics
    Stats,

    /// Export the entry log to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Replace the knowledge base with an exported JSON log
    Import {
        /// Input file path
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Assert { text } => cmd_assert(&cli, text),
        Commands::Retract { id } => cmd_retract(&cli, EntryId(*id)),
        Commands::Query { text, explain } => cmd_query(&cli, text, *explain).await,
        Commands::Ingest { files, parallel } => cmd_ingest(&cli, files, *parallel),
        Commands::List { all } => cmd_list(&cli, *all),
        Commands::Stats => cmd_stats(&cli),
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path } => cmd_import(&cli, path),
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Read the engine config and build the lexicon: builtin words, then
/// `<data-dir>/lexicon.toml`, then the config's files, then `--lexicon`.
///
/// An explicit `--config` must exist; the default location is optional.
fn load_config(cli: &Cli) -> Result<(EngineConfig, Lexicon)> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_base_dir().join("config.toml"));

    let (config, config_dir) = if cli.config.is_some() || path.exists() {
        let src = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = EngineConfig::from_toml_str(&src)
            .with_context(|| format!("invalid config {}", path.display()))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (config, dir)
    } else {
        (EngineConfig::default(), PathBuf::new())
    };

    let data_words = default_base_dir().join("lexicon.toml");
    let files: Vec<PathBuf> = data_words
        .exists()
        .then_some(data_words)
        .into_iter()
        .chain(config.lexicon.files.iter().map(|f| config_dir.join(f)))
        .chain(cli.lexicon.iter().cloned())
        .collect();
    let sources = files
        .iter()
        .map(|f| fs::read_to_string(f).with_context(|| format!("failed to read {}", f.display())))
        .collect::<Result<Vec<_>>>()?;
    let lexicon = build_lexicon(&sources).context("failed to build lexicon")?;

    Ok((config, lexicon))
}

/// Open the named knowledge base and replay its log into a fresh session.
fn open_session(cli: &Cli) -> Result<(KbStore, Session)> {
    let (config, lexicon) = load_config(cli)?;
    let store = KbStore::open(&cli.kb, None).context("failed to open knowledge base")?;
    let log = store.load_log().context("failed to load entry log")?;
    let session = Session::new(lexicon, config);
    session
        .replay(&log)
        .context("failed to replay entry log")?;
    tracing::debug!(kb = store.name(), entries = log.len(), "session ready");
    Ok((store, session))
}

fn persist(store: &KbStore, session: &Session) -> Result<()> {
    store
        .sync_log(&session.log())
        .context("failed to persist entry log")?;
    Ok(())
}

/// Run a query on the blocking pool. The engine enforces its own deadline;
/// the outer timeout cancels a search that overruns it anyway.
pub(crate) async fn ask(session: &Arc<Session>, text: &str) -> Result<Answer, SessionError> {
    let cancel = CancelToken::new();
    let grace = session.config().budget().timeout + Duration::from_millis(500);
    let mut task = tokio::task::spawn_blocking({
        let session = Arc::clone(session);
        let text = text.to_string();
        let cancel = cancel.clone();
        move || session.query_with(&text, &cancel)
    });

    let joined = match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(?grace, "query overran its deadline, cancelling");
            cancel.cancel();
            task.await
        }
    };
    match joined {
        Ok(result) => result,
        Err(e) => match e.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(_) => Err(SessionError::Inference(InferenceError::Cancelled)),
        },
    }
}

fn print_outcome(outcome: &AssertOutcome) {
    if outcome.created {
        println!("asserted entry {}", outcome.id);
    } else {
        println!("entry {} already present", outcome.id);
    }
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    for denial in &outcome.violations {
        println!("  violates entry {denial}");
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(cli: &Cli) -> Result<()> {
    let (store, session) = open_session(cli)?;
    tracing::info!("starting MCP server for knowledge base '{}'", store.name());

    let server = server::LucidServer::new(store, session);
    let service = match server.clone().serve(stdio()).await {
        Ok(service) => service,
        Err(e) => {
            // The client closed stdin before initializing.
            tracing::warn!("MCP session ended during initialization: {e}");
            server.checkpoint_wal().await;
            return Ok(());
        }
    };

    tokio::select! {
        result = service.waiting() => {
            result.context("MCP server task failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    server.checkpoint_wal().await;
    Ok(())
}

fn cmd_assert(cli: &Cli, text: &str) -> Result<()> {
    let (store, session) = open_session(cli)?;
    let result = session.assert(text, "cli");
    // Statements before a failing one stay asserted.
    persist(&store, &session)?;

    for outcome in result.context("assert failed")? {
        print_outcome(&outcome);
    }
    Ok(())
}

fn cmd_retract(cli: &Cli, id: EntryId) -> Result<()> {
    let (store, session) = open_session(cli)?;
    session.retract(id).context("retract failed")?;
    persist(&store, &session)?;
    println!("retracted entry {id}");
    Ok(())
}

async fn cmd_query(cli: &Cli, text: &str, explain: bool) -> Result<()> {
    let (_store, session) = open_session(cli)?;
    let session = Arc::new(session);
    let answer = match ask(&session, text).await {
        Ok(answer) => answer,
        Err(SessionError::Inference(e)) => {
            println!("unknown ({e})");
            return Ok(());
        }
        Err(e) => return Err(e).context("query failed"),
    };

    println!("{answer}");
    if explain {
        print!("{}", session.explain(&answer));
    } else if cli.verbose {
        let cited: Vec<String> = answer.cited().iter().map(ToString::to_string).collect();
        eprintln!("--- cited entries: {} ---", cited.join(", "));
    }
    Ok(())
}

fn cmd_ingest(cli: &Cli, files: &[PathBuf], parallel: bool) -> Result<()> {
    let (store, session) = open_session(cli)?;

    let mut texts = Vec::with_capacity(files.len());
    for path in files {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        texts.push((path.display().to_string(), content));
    }

    let result = if parallel {
        ingest_batch(&session, &texts)
    } else {
        ingest_each(&session, &texts)
    };
    // Whatever was asserted before a failure is kept.
    persist(&store, &session)?;
    let created = result?;

    println!("done. new={created}, active={}", session.stats().active);
    Ok(())
}

fn ingest_each(session: &Session, texts: &[(String, String)]) -> Result<usize> {
    let mut created = 0;
    for (source, content) in texts {
        let outcomes = session
            .assert(content, source)
            .with_context(|| format!("failed to ingest {source}"))?;
        created += outcomes.iter().filter(|o| o.created).count();
        println!("ingested {source} → {} statements", outcomes.len());
        for outcome in outcomes.iter().filter(|o| !o.warnings.is_empty() || !o.violations.is_empty()) {
            print_outcome(outcome);
        }
    }
    Ok(created)
}

fn ingest_batch(session: &Session, texts: &[(String, String)]) -> Result<usize> {
    let outcomes = session
        .assert_batch(texts)
        .context("failed to ingest batch")?;
    println!("ingested {} files → {} statements", texts.len(), outcomes.len());
    for outcome in outcomes.iter().filter(|o| !o.warnings.is_empty() || !o.violations.is_empty()) {
        print_outcome(outcome);
    }
    Ok(outcomes.iter().filter(|o| o.created).count())
}

fn cmd_list(cli: &Cli, all: bool) -> Result<()> {
    let (_store, session) = open_session(cli)?;
    let entries = session.entries(all);
    if entries.is_empty() {
        println!("(no entries)");
    }
    for record in entries {
        let marker = if record.active { "" } else { " (retracted)" };
        println!(
            "{:>4}  {}{marker}  {}",
            record.id.0, record.provenance, record.drs
        );
        if !record.provenance.text.is_empty() {
            println!("      {}", record.provenance.text);
        }
    }
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let (store, session) = open_session(cli)?;
    let stats = session.stats();

    println!("kb:           {}", store.name());
    println!("entries:      {}", stats.entries);
    println!("active:       {}", stats.active);
    println!("facts:        {}", stats.facts);
    println!("rules:        {}", stats.rules);
    println!("negative:     {}", stats.negative_facts);
    println!("denials:      {}", stats.denials);
    println!("individuals:  {}", stats.individuals);
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let (_store, session) = open_session(cli)?;
    let json = export_json(&session.snapshot()).context("failed to serialize entry log")?;
    fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;

    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path) -> Result<()> {
    let (store, session) = open_session(cli)?;
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let log = import_json(&json).context("invalid export file")?;

    // Replay first so a broken log never reaches the store.
    session.replay(&log).context("failed to replay imported log")?;
    store
        .replace_log(&log)
        .context("failed to write imported log")?;

    println!(
        "imported from {}. entries={}, active={}",
        path.display(),
        log.len(),
        session.stats().active
    );
    Ok(())
}
