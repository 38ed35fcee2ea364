//! linksync command line interface.
//!
//! The bare command performs a single scan of the root directory and
//! propagates any moves into the affected notes. The `watch` subcommand keeps
//! the watcher running on the configured interval until interrupted.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use linksync_core::{LinkSyncer, PhysicalFileSystem, SyncConfig};

#[derive(Parser)]
#[command(
    name = "linksync",
    version,
    about = "Synchronize image and note links in Markdown and HTML files",
    long_about = "Synchronize image and note links in Markdown and HTML files.\n\n\
        Launch the program in the root directory that contains note files and\n\
        images. Use the 'watch' command to pick up changes automatically.\n\n\
        The watcher polls the file system, so avoid running it over very large\n\
        trees or the root of the file system."
)]
struct Cli {
    /// Path to the watched directory (defaults to the working directory)
    #[arg(short, long, value_name = "DIR", global = true)]
    path: Option<PathBuf>,

    /// Path to the log file
    #[arg(short, long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Maximum parsable file size in KiB
    #[arg(long, value_name = "KIB", global = true)]
    size: Option<u64>,

    /// YAML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch for changes and update links continuously
    Watch {
        /// Poll interval in milliseconds
        #[arg(short, long, value_name = "MS")]
        interval: Option<u64>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read config file {}", path.display()))?;
            SyncConfig::from_yaml(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => SyncConfig::default(),
    };
    if let Some(path) = &cli.path {
        config.root = path.clone();
    }
    if let Some(log) = &cli.log {
        config.log_path = Some(log.clone());
    }
    if let Some(size) = cli.size {
        config.max_file_size = size * 1024;
    }
    Ok(config)
}

fn init_logging(config: &SyncConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false);
    match &config.log_path {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("unable to open log file {}", path.display()))?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    if config.root == PathBuf::from(".") {
        config.root = std::env::current_dir().context("unable to resolve working directory")?;
    }
    let root = config
        .root
        .canonicalize()
        .with_context(|| format!("unable to open root directory {}", config.root.display()))?;

    init_logging(&config)?;

    let fs = Arc::new(PhysicalFileSystem::new(&root));
    let syncer = Arc::new(LinkSyncer::new(fs, &config));

    let took = syncer.process_files();
    info!(
        "Watching {} ({} files, {} linked) indexed in {took:.2?}",
        root.display(),
        syncer.sources_len(),
        syncer.refs_len(),
    );

    match cli.command {
        None => {
            syncer.run_once().await?;
            syncer.close();
        }
        Some(Command::Watch { interval }) => {
            let interval = interval.unwrap_or(config.interval_ms);
            let events = syncer.watch(Duration::from_millis(interval));
            tokio::signal::ctrl_c()
                .await
                .context("unable to listen for shutdown signal")?;
            syncer.close();
            let _ = events.await;
            info!("Stopped");
        }
    }

    Ok(())
}
