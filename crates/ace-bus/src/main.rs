//! ace — run a layer stack on the in-process broker

use ace_broker::MemoryBroker;
use ace_bus::{cognitive_control, AceConfig, CognitiveControl, LayerRuntime};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "ace",
    about = "Layered cognitive architecture: inter-layer message bus",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Path to a TOML config file. Defaults are used if absent or unreadable.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective config as TOML and exit
    #[arg(long, default_value_t = false)]
    dump_config: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => AceConfig::load(path),
        None => AceConfig::default(),
    };
    if cli.dump_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let broker = MemoryBroker::with_credentials(config.broker.clone());
    let mut runtime = LayerRuntime::new(config, Arc::new(broker.clone()))?;
    if runtime.stack().get(cognitive_control::LAYER_NAME).is_some() {
        runtime = runtime.with_processor(
            cognitive_control::LAYER_NAME,
            Arc::new(CognitiveControl::default()),
        );
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received");
                shutdown.cancel();
            }
        });
    }
    if let Some(secs) = cli.run_for {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            shutdown.cancel();
        });
    }

    let report = runtime.run(shutdown).await?;
    tracing::info!(
        "drained {} layer(s), aborted {}, {} message(s) published",
        report.drained.len(),
        report.aborted.len(),
        broker.published_count()
    );
    if !report.is_clean() {
        anyhow::bail!("shutdown was not clean: {:?}", report);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ace=info,ace_bus=info,ace_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
