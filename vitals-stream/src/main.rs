use std::path::PathBuf;

use axum::{Json, Router, extract::State, routing::get};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vitals_stream::{
    ClickHouseGoldSink, Config, FileLineSink, GoldSink, MemoryGoldSink, MessageSource, MockSource,
    Pipeline, PipelineState, PipelineStats, SourceConfig, SqliteGoldSink, TcpSource,
    WarehouseConfig,
};

#[derive(Parser)]
#[command(name = "vitals-stream")]
#[command(about = "Patient vitals streaming pipeline")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vitals-stream.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tracing=info,vitals_stream=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let applied = config.apply_env(|key| std::env::var(key).ok());
    if !applied.is_empty() {
        info!(?applied, "Applied environment overrides");
    }
    config.validate()?;

    info!(
        project = %config.pipeline.project,
        region = %config.pipeline.region,
        subscription = %config.source.subscription(),
        bronze_path = %config.sinks.bronze_path,
        silver_path = %config.sinks.silver_path,
        gold_table = %config.gold.table,
        http_addr = %config.server.http_addr,
        "Starting vitals-stream"
    );

    match config.gold.warehouse {
        WarehouseConfig::Memory => {
            info!("Using in-memory gold table");
            let gold = MemoryGoldSink::default();
            run_with_gold(config, gold).await?;
        }
        WarehouseConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite gold table");
            let gold = SqliteGoldSink::new(path, config.gold.table.clone()).await?;
            run_with_gold(config, gold).await?;
        }
        WarehouseConfig::Clickhouse {
            ref url,
            ref database,
        } => {
            info!(%url, %database, "Using ClickHouse gold table");
            let gold = ClickHouseGoldSink::new(url, database, config.gold.table.clone());
            run_with_gold(config, gold).await?;
        }
    }

    Ok(())
}

async fn run_with_gold<G: GoldSink>(config: Config, gold: G) -> color_eyre::Result<()> {
    gold.ensure_table().await?;
    info!(table = %config.gold.table, "Gold table ready");

    let capacity = config.pipeline.channel_capacity;

    match &config.source {
        SourceConfig::Mock {
            subscription,
            interval_ms,
            patient_count,
            invalid_percent,
        } => {
            info!(
                interval_ms,
                patient_count, invalid_percent, "Using mock source"
            );
            let source = MockSource::new(
                subscription.clone(),
                *interval_ms,
                *patient_count,
                *invalid_percent,
                capacity,
            );
            run_pipeline(source, gold, config).await
        }
        SourceConfig::Tcp { subscription, addr } => {
            info!(%addr, "Using TCP source");
            let source = TcpSource::new(*addr, subscription.clone(), capacity);
            run_pipeline(source, gold, config).await
        }
    }
}

async fn run_pipeline<M: MessageSource, G: GoldSink>(
    source: M,
    gold: G,
    config: Config,
) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();
    let state = PipelineState::new();
    let options = config.pipeline_options()?;

    let bronze = FileLineSink::new(
        config.sinks.bronze_path.clone(),
        "raw_data",
        config.sinks.temp_location.clone(),
    );
    let silver = FileLineSink::new(
        config.sinks.silver_path.clone(),
        "clean_data",
        config.sinks.temp_location.clone(),
    );

    let rx = source.start(cancel.clone()).await?;
    let pipeline = Pipeline::new(options, bronze, silver, gold, state.clone());
    let pipeline_handle = tokio::spawn(pipeline.run(rx, cancel.clone()));

    // HTTP server
    let http_addr = config.server.http_addr;
    let axum_app = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state);
    let axum_listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(axum_listener, axum_app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    cancel.cancel();

    if let Err(e) = pipeline_handle.await {
        error!(error = ?e, "Pipeline task failed");
    }

    info!("vitals-stream shut down complete");
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(state): State<PipelineState>) -> Json<PipelineStats> {
    Json(state.snapshot().await)
}
