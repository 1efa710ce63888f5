use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use flowstate::cache::{CacheKey, DemandCache};
use flowstate::config::RuntimeConfig;
use flowstate::logging;
use flowstate::storage::{storage_key, FileStore, KeyValueStore};

#[derive(Parser)]
#[command(name = "flowstate")]
#[command(about = "Inspect and purge persisted client runtime state")]
struct Cli {
    /// Config file (default: <config_dir>/flowstate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory, overriding the config
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persisted cache entries
    #[command(subcommand)]
    Cache(CacheCommands),
    /// Persisted navigation stacks
    #[command(subcommand)]
    Stack(StackCommands),
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List entries, optionally for one scope
    List { scope: Option<String> },
    /// Print one entry's value as JSON
    Show { scope: String, key: String },
    /// Remove every entry under a scope
    Clear { scope: String },
}

#[derive(Subcommand)]
enum StackCommands {
    /// Print the persisted routes of a stack
    Show { id: String },
    /// Forget a persisted stack
    Clear { id: String },
    /// Print the persisted tab selection
    Current,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if std::env::var_os(logging::LOG_ENV).is_some() {
        logging::init_tracing();
    } else {
        logging::init_stderr(cli.verbose);
    }

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load_from(path),
        None => RuntimeConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Commands::Config = cli.command {
        let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    let dir = cli.dir.clone().unwrap_or_else(|| config.storage.resolved_dir());
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&dir).with_context(|| format!("Failed to open storage at {}", dir.display()))?,
    );

    match cli.command {
        Commands::Cache(command) => run_cache(command, &config, store),
        Commands::Stack(command) => run_stack(command, &config, store.as_ref()),
        Commands::Config => Ok(()),
    }
}

fn run_cache(command: CacheCommands, config: &RuntimeConfig, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let cache = DemandCache::with_storage(config.cache.clone(), store);
    cache.hydrate();

    match command {
        CacheCommands::List { scope } => {
            for entry in cache.entries(scope.as_deref()) {
                let written = entry
                    .written_at
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                println!("{}\twritten={}\tdeps={}", entry.id, written, entry.deps);
            }
        }
        CacheCommands::Show { scope, key } => {
            let key = CacheKey::<serde_json::Value>::new(scope, key);
            let Some(value) = cache.read(&key) else {
                bail!("No persisted entry {}", key.id());
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        CacheCommands::Clear { scope } => {
            let removed = cache.clear_scope(&scope);
            println!("Removed {} entries from '{}'", removed, scope);
        }
    }
    Ok(())
}

fn run_stack(command: StackCommands, config: &RuntimeConfig, store: &dyn KeyValueStore) -> Result<()> {
    let ns = config.navigation.namespace.as_str();
    match command {
        StackCommands::Show { id } => {
            let bytes = store
                .get(&storage_key(&[ns, "stack", &id]))?
                .with_context(|| format!("No persisted stack '{}'", id))?;
            let routes: serde_json::Value =
                serde_json::from_slice(&bytes).context("Persisted stack is not valid JSON")?;
            println!("{}", serde_json::to_string_pretty(&routes)?);
        }
        StackCommands::Clear { id } => {
            store.remove(&storage_key(&[ns, "stack", &id]))?;
            println!("Cleared stack '{}'", id);
        }
        StackCommands::Current => {
            let current = match store.get(&storage_key(&[ns, "group", flowstate::runtime::TAB_GROUP]))? {
                Some(bytes) => serde_json::from_slice::<String>(&bytes)
                    .context("Persisted tab selection is not valid")?,
                None => config
                    .navigation
                    .initial_stack()
                    .unwrap_or_default()
                    .to_string(),
            };
            println!("{}", current);
        }
    }
    Ok(())
}
