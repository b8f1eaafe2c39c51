use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use voxhire::session::SessionServices;
use voxhire::store::NatsStore;
use voxhire::{create_router, AppState, Config, HttpCompletionClient, HttpSttClient, HttpTtsClient};

#[derive(Parser, Debug)]
#[command(name = "voxhire", about = "Voice interview orchestration service")]
struct Args {
    /// Config file (without extension), resolved by the config crate
    #[arg(short, long, default_value = "config/voxhire")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Arc::new(Config::load(&args.config)?);

    info!("Voxhire v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let timeout = Duration::from_secs(cfg.services.request_timeout_secs);
    let services = SessionServices {
        stt: Arc::new(HttpSttClient::new(cfg.services.stt_url.clone(), timeout)?),
        generator: Arc::new(HttpCompletionClient::new(
            cfg.services.completion_url.clone(),
            timeout,
        )?),
        synthesizer: Arc::new(HttpTtsClient::new(cfg.services.tts_url.clone(), timeout)?),
        store: Arc::new(NatsStore::connect(&cfg.services.nats_url).await?),
    };

    let state = AppState::new(Arc::clone(&cfg), services);
    let router = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, router)
        .await
        .context("HTTP server exited")?;

    Ok(())
}
