//! CLI entry point for `mimestash`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use tracing::info;

use mimestash::config::{self, Config};
use mimestash::detach::{AttachmentScanner, ScanSettings};
use mimestash::export::eml::write_message;
use mimestash::hash::{self, Digest};
use mimestash::parser::mime::parse_message;
use mimestash::store::ContentStore;

#[derive(Parser)]
#[command(
    name = "mimestash",
    version,
    about = "Detach large MIME parts into a content-addressed store and serve them back over HTTP"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, or JSON when the name ends in .json)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Detach oversized parts from a message and write the rewritten message
    Detach {
        /// Message to read (stdin when omitted)
        input: Option<PathBuf>,
        /// Where to write the rewritten message (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Serve stored payloads over HTTP
    Serve {
        /// Bind address (overrides server.addr)
        #[arg(long)]
        addr: Option<String>,
        /// Bind port (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the keyed digest of a file
    Digest { file: PathBuf },
    /// Show a stored object
    Stat {
        digest: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // An explicit --config must load; the fallback locations may not exist.
    let config = config::load_config(cli.config.as_deref())?;

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Detach { input, output } => {
            cmd_detach(&config, input.as_deref(), output.as_deref())
        }
        Commands::Serve { addr, port } => cmd_serve(&config, addr, port),
        Commands::Digest { file } => cmd_digest(&config, &file),
        Commands::Stat { digest, json } => cmd_stat(&config, &digest, json),
        Commands::Config => cmd_config(&config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
///
/// stdout is never used for logs: `detach` writes the message there.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mimestash.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

// ── detach ──────────────────────────────────────────────────────

/// Read one message, detach, write the result. Nothing is written unless
/// the whole scan succeeded.
fn cmd_detach(config: &Config, input: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    let settings = ScanSettings::from_config(config)?;
    let store_dir = config::store_dir(config);
    let store = ContentStore::at_path(&store_dir)
        .with_context(|| format!("Cannot open store at {}", store_dir.display()))?;
    let scanner = AttachmentScanner::new(settings, store);

    let raw = read_input(input)?;
    let mut root = parse_message(&raw)?;

    let start = Instant::now();
    let detached = scanner.scan(&mut root, config.milter.size)?;
    if detached.is_empty() {
        // Untouched messages pass through as read, mbox `From ` line included.
        write_output(output, &raw)?;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "Nothing to detach");
        return Ok(());
    }
    let rewritten = write_message(&root);

    write_output(output, &rewritten)?;

    let total: u64 = detached.iter().map(|d| d.size).sum();
    info!(
        parts = detached.len(),
        detached = %format_size(total, BINARY),
        input = %format_size(raw.len() as u64, BINARY),
        output = %format_size(rewritten.len() as u64, BINARY),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Detach complete"
    );
    Ok(())
}

fn read_input(input: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut buf)
                .context("Cannot read message from stdin")?;
            Ok(buf)
        }
    }
}

/// Write to stdout, or atomically replace `path`.
fn write_output(output: Option<&Path>, data: &[u8]) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir)
                .with_context(|| format!("Cannot create temp file in {}", dir.display()))?;
            tmp.write_all(data)?;
            tmp.flush()?;
            tmp.persist(path)
                .with_context(|| format!("Cannot write {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

// ── serve ───────────────────────────────────────────────────────

fn cmd_serve(config: &Config, addr: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    // Digests in URLs must match what detach produces.
    config.hash_algorithm()?;

    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    let port = port.unwrap_or(config.server.port);
    let store = ContentStore::read_only_at(config::store_dir(config));

    let runtime = tokio::runtime::Runtime::new().context("Cannot start async runtime")?;
    runtime.block_on(mimestash::server::serve(&addr, port, store))
}

// ── inspection ──────────────────────────────────────────────────

fn cmd_digest(config: &Config, file: &Path) -> anyhow::Result<()> {
    let algorithm = config.hash_algorithm()?;
    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("Cannot open {}", file.display()))?,
    );
    let digest = hash::digest(algorithm, config.common.key.as_bytes(), reader)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    println!("{digest}  {}", file.display());
    Ok(())
}

fn cmd_stat(config: &Config, digest: &str, json: bool) -> anyhow::Result<()> {
    let digest: Digest = digest.parse()?;
    let store = ContentStore::read_only_at(config::store_dir(config));
    let object = store.stat(&digest)?;

    if json {
        let value = serde_json::json!({
            "digest": object.digest,
            "path": object.path.to_string_lossy(),
            "type": object.meta.media_type,
            "name": object.meta.name,
            "size": object.size_bytes,
            "last_modified": object.last_modified.to_rfc3339(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Digest:        {}", object.digest);
        println!("Path:          {}", object.path.display());
        println!("Type:          {}", object.meta.media_type);
        println!("Name:          {}", object.meta.name);
        println!(
            "Size:          {} ({} bytes)",
            format_size(object.size_bytes, BINARY),
            object.size_bytes
        );
        println!(
            "Last modified: {}",
            mimestash::server::date::format_http_date(object.last_modified)
        );
    }
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mimestash", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}
