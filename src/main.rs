//! # Knowledge Harness CLI (`kh`)
//!
//! The `kh` binary drives the resolution engine from the command line:
//! initialize a cache, load resources through the configured connectors,
//! read individual observations, and inspect the alias index.
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh init` | Create the cache directory and validate the config |
//! | `kh load <uri>` | Resolve a knowledge URI or web URL and cache it |
//! | `kh observe <uri>` | Read one observation (affordance or observable) |
//! | `kh aliases` | List cached external URLs and their resources |
//!
//! ## Examples
//!
//! ```bash
//! # Prepare the cache
//! kh init --config ./config/kh.toml
//!
//! # Load a file through the filesystem connector, observing its body
//! kh load ndk://file/docs/guide.md --observe '$body'
//!
//! # Force a refresh, ignoring cached revisions
//! kh load ndk://file/docs/guide.md --mode force
//!
//! # Read a single chunk
//! kh observe 'ndk://file/docs/guide.md/$chunk/00'
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use knowledge_harness::action::{Action, LoadMode, QueryOutcome};
use knowledge_harness::config::{self, Config};
use knowledge_harness::connector::{ConnectorRegistry, RequestContext};
use knowledge_harness::connector_fs::FilesystemConnector;
use knowledge_harness::engine::Engine;
use knowledge_harness::ingest::IngestLimits;
use knowledge_harness::store::KnowledgeStore;
use knowledge_harness::store_fs::FsStore;
use knowledge_harness::uri::{Affordance, KnowledgeUri, Reference};

/// Knowledge Harness CLI — resolve and cache external content behind
/// `ndk://` knowledge URIs.
#[derive(Parser)]
#[command(
    name = "kh",
    about = "Knowledge Harness — a resolution and caching engine for external content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Trust cached content while revision tags match.
    Auto,
    /// Refetch unconditionally and overwrite the cache.
    Force,
    /// Serve the cache verbatim; never dispatch to a connector.
    None,
}

impl From<ModeArg> for LoadMode {
    fn from(mode: ModeArg) -> LoadMode {
        match mode {
            ModeArg::Auto => LoadMode::Auto,
            ModeArg::Force => LoadMode::Force,
            ModeArg::None => LoadMode::None,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the cache directory and validate the configuration.
    ///
    /// Idempotent — running it against an existing cache is safe.
    Init,

    /// Resolve a reference and cache the result.
    ///
    /// Accepts a knowledge URI (`ndk://realm/subrealm/path`) or an
    /// external `https://` URL that a connector can claim. Prints the
    /// query outcome as JSON.
    Load {
        /// The knowledge URI or web URL to load.
        uri: String,

        /// Cache behavior for this load.
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,

        /// Affordances to observe alongside the metadata (e.g. `$body`).
        #[arg(long = "observe")]
        observe: Vec<String>,

        /// Expand stored relations this many hops out.
        #[arg(long, default_value_t = 0)]
        expand: u32,
    },

    /// Read one observation and print its content.
    ///
    /// The URI must carry an affordance (`.../$body`) or observable
    /// (`.../$chunk/00`) suffix.
    Observe {
        /// The observation URI.
        uri: String,

        /// Cache behavior for the refresh.
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
    },

    /// List cached external URLs and the resources they resolve to.
    Aliases,
}

fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let store = KnowledgeStore::new(Arc::new(FsStore::new(config.storage.root.clone())));
    let mut registry = ConnectorRegistry::new();
    if !config.connectors.filesystem.is_empty() {
        let connector = FilesystemConnector::new(&config.connectors.filesystem)
            .context("Failed to build filesystem connector")?;
        registry
            .register(Arc::new(connector))
            .context("Failed to register filesystem connector")?;
    }
    Ok(Engine::new(store, Arc::new(registry))
        .with_limits(IngestLimits {
            max_tokens: config.chunking.max_tokens,
            threshold_tokens: config.chunking.threshold_tokens,
        })
        .with_batch_size(config.query.batch_size))
}

/// Public credentials come from the env vars named in `[credentials]`;
/// the request context resolves them per realm at call time, so here we
/// only check that the configured vars exist.
fn warn_missing_credentials(config: &Config) {
    for (realm, credential) in &config.credentials {
        for var in [&credential.user_var, &credential.pass_var, &credential.token_var]
            .into_iter()
            .flatten()
        {
            if std::env::var(var).is_err() {
                tracing::warn!(realm, var, "credential env var is not set");
            }
        }
    }
}

fn print_outcome(outcome: &QueryOutcome) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&cfg.storage.root).with_context(|| {
                format!("Failed to create cache root: {}", cfg.storage.root.display())
            })?;
            build_engine(&cfg)?;
            warn_missing_credentials(&cfg);
            println!("Cache initialized at {}.", cfg.storage.root.display());
        }
        Commands::Load {
            uri,
            mode,
            observe,
            expand,
        } => {
            let reference: Reference = uri.parse()?;
            let observe: Vec<Affordance> = observe
                .iter()
                .map(|s| s.parse())
                .collect::<Result<_, _>>()?;
            let engine = build_engine(&cfg)?;
            let ctx = RequestContext::new(HashMap::new());
            let outcome = engine
                .execute_query(
                    &ctx,
                    vec![Action::Load {
                        uri: reference,
                        load_mode: mode.into(),
                        expand_depth: expand,
                        observe,
                    }],
                )
                .await;
            print_outcome(&outcome)?;
        }
        Commands::Observe { uri, mode } => {
            let uri: KnowledgeUri = uri.parse()?;
            let engine = build_engine(&cfg)?;
            let ctx = RequestContext::new(HashMap::new());
            let outcome = engine
                .execute_query(
                    &ctx,
                    vec![Action::Observe {
                        uri,
                        load_mode: mode.into(),
                    }],
                )
                .await;
            print_outcome(&outcome)?;
        }
        Commands::Aliases => {
            let store = KnowledgeStore::new(Arc::new(FsStore::new(cfg.storage.root.clone())));
            let records = store.list_aliases().await?;
            if records.is_empty() {
                println!("No aliases cached.");
            }
            for record in records {
                println!("{} -> {}", record.url, record.resource);
            }
        }
    }

    Ok(())
}
