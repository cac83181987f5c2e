mod cli;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use checkout_proto::parse_lines;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use window_bus::{LocalWindowBus, WindowBus};

use tenera_handoff::{
    CartPayload, CartStore, CheckoutOrchestrator, FileStore, HandoffConfig, HttpOrderSink,
    KeyValueStore, NullOrderSink, OrderSink, RecordingNavigator, StorageMirror, WindowMessenger,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = cli::Cli::parse();
    run(cli).await
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match fmt().with_env_filter(filter).try_init() {
        Ok(()) => Ok(()),
        Err(err)
            if err
                .to_string()
                .contains("attempted to set a global default subscriber more than once") =>
        {
            Ok(())
        }
        Err(err) => Err(anyhow!(err)),
    }
}

async fn run(cli: cli::Cli) -> Result<()> {
    let config = HandoffConfig::from_env();
    match cli.command {
        cli::Commands::Checkout {
            cart_file,
            offline,
            state_dir,
        } => {
            let store = Arc::new(FileStore::new(resolve_state_dir(state_dir))?);
            let mirror = Arc::new(StorageMirror::new(store, config.storage_keys.clone()));
            let lines = match cart_file {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("reading cart file {}", path.display()))?;
                    parse_lines(&raw)
                        .with_context(|| format!("parsing cart file {}", path.display()))?
                }
                None => Vec::new(),
            };

            let bus = Arc::new(LocalWindowBus::new());
            let window = bus.register(&config.origin);
            let messenger = Arc::new(WindowMessenger::new(
                bus,
                window,
                config.allowed_origins.clone(),
            ));
            let sink: Arc<dyn OrderSink> = if offline {
                Arc::new(NullOrderSink)
            } else {
                Arc::new(HttpOrderSink::new(&config.gate_base_url, config.post_timeout)?)
            };
            let navigator = Arc::new(RecordingNavigator::new());
            let orchestrator = CheckoutOrchestrator::new(
                config,
                Arc::new(CartStore::with_lines(lines)),
                mirror,
                messenger,
                sink,
                navigator.clone(),
            )?;

            let outcome = orchestrator.checkout().await;
            println!("synced:   {}", outcome.synced);
            println!(
                "cart:     {} item(s), {} kobo",
                outcome.snapshot.item_count(),
                outcome.snapshot.total_minor()
            );
            match &outcome.plan.payload {
                CartPayload::Inline => println!("payload:  inline"),
                CartPayload::Reference(reference) => println!("payload:  reference {reference}"),
                CartPayload::Omitted => println!("payload:  omitted"),
            }
            if let Some(url) = navigator.last() {
                println!("redirect: {url}");
            }
        }
        cli::Commands::Inspect { state_dir } => {
            let store = FileStore::new(resolve_state_dir(state_dir))?;
            for key in &config.storage_keys {
                match store.get(key) {
                    Ok(Some(raw)) => println!("{key}: {raw}"),
                    Ok(None) => println!("{key}: <empty>"),
                    Err(err) => println!("{key}: <unreadable: {err}>"),
                }
            }
        }
        cli::Commands::Clear { state_dir } => {
            let store = Arc::new(FileStore::new(resolve_state_dir(state_dir))?);
            StorageMirror::new(store, config.storage_keys.clone()).clear();
            println!("cleared {} storage key(s)", config.storage_keys.len());
        }
    }
    Ok(())
}

fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        directories::ProjectDirs::from("life", "Tenera", "tenera-handoff")
            .map(|dirs| dirs.data_dir().to_path_buf())
    })
    .unwrap_or_else(|| std::env::temp_dir().join("tenera-handoff"))
}
