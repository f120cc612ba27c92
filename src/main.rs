use anyhow::{Context, Result};
use clap::Parser;
use docingest::{
    api::{self, AppState},
    cache::MemoryCache,
    config::{self, Config},
    events::EventBus,
    ingest::{AccumulatorRegistry, ChunkService, IngestionStreamHandler},
    llm::{HttpLlmClient, LlmConfigService},
    logging,
    metrics::IngestMetrics,
    storage::MemoryStore,
    summary::SummaryGenerator,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "docingest",
    about = "Streamed document ingestion server with live progress events"
)]
struct Cli {
    /// Port to listen on; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Failed to load configuration")?;
    logging::init_tracing();

    let app = api::create_router(build_state(config)?);
    let (listener, port) = bind_listener(cli.port.or(config.server_port))
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn build_state(config: &Config) -> Result<AppState> {
    let store = Arc::new(MemoryStore::new().with_embedding_dimension(config.embedding_dimension));
    let accumulators = Arc::new(AccumulatorRegistry::new());
    let events = Arc::new(EventBus::new(config.event_channel_capacity));
    let metrics = Arc::new(IngestMetrics::new());
    let llm_configs = Arc::new(LlmConfigService::new(
        Arc::new(MemoryCache::new(config.cache_capacity)),
        config.llm_config_ttl,
    ));
    let llm = HttpLlmClient::new(config.llm_endpoints.clone())
        .context("Failed to construct LLM HTTP client")?;

    let summaries = Arc::new(SummaryGenerator::new(
        accumulators.clone(),
        llm_configs.clone(),
        Arc::new(llm),
        store.clone(),
        store.clone(),
    ));
    let chunks = ChunkService::new(store.clone(), store, accumulators);
    let ingest = Arc::new(IngestionStreamHandler::new(
        chunks,
        summaries.clone(),
        events.clone(),
        metrics.clone(),
    ));

    Ok(AppState {
        ingest,
        events,
        metrics,
        llm_configs,
        summaries,
    })
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
