use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use marqueed::Config;
use marqueed::Engine;
use marqueed::api;
use marqueed::api::ApiContext;
use marqueed::backend::FirebaseBackend;
use marqueed::persist::HintFile;

#[derive(Parser)]
#[command(
    name = "marqueed",
    version,
    about = "Mirrors and commands the bulbs of a marquee sign through a realtime backend"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "marqueed.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("marqueed starting");
    tracing::info!("Loaded config from: {}", args.config.display());
    tracing::info!(
        "Controlling {} switches via {}",
        config.switches.ids.len(),
        config.backend.url
    );

    let backend = FirebaseBackend::new(&config.backend.url, config.backend.auth_token.clone());
    let hint = HintFile::new(&config.persistence.hint_path);
    let engine = Engine::new(
        backend,
        &config.switches.ids,
        config.liveness.timeout(),
        hint,
    );

    let backend_task = engine.start_backend();
    let ticker_task = engine.start_liveness_ticker(config.liveness.check_interval());

    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    if config.api.enabled {
        let ctx = ApiContext {
            snapshot_rx: engine.watch_state(),
            commands: engine.command_sender(),
        };
        let bind = config.api.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(bind, ctx, api_shutdown_rx).await {
                tracing::error!("HTTP API server error: {e}");
            }
        });
    }

    let engine_task = tokio::spawn(engine.run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {e}"),
    }

    let _ = api_shutdown_tx.send(());
    backend_task.abort();
    ticker_task.abort();
    engine_task.abort();

    tracing::info!("marqueed shutdown complete");
    Ok(())
}
