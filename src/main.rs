//! Price forecast backend entrypoint: `run`, `schedule`, and `serve`
//! subcommands over the shared pipeline/store/registry collaborators.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use price_forecast_backend::api::{self, AppState};
use price_forecast_backend::config::{Config, ConfigFileOverrides};
use price_forecast_backend::forecasting::ForecastingEngine;
use price_forecast_backend::ingest::HttpDataSourceClient;
use price_forecast_backend::model_registry::ModelRegistry;
use price_forecast_backend::pipeline::PipelineExecutor;
use price_forecast_backend::scheduler::registry::JobRegistry;
use price_forecast_backend::scheduler::Scheduler;
use price_forecast_backend::store::ForecastStore;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "price-forecast", about = "Electricity market price forecasting backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one forecast cycle synchronously and exit.
    Run {
        #[arg(long)]
        target_date: Option<NaiveDate>,
        #[arg(long)]
        config_file: Option<String>,
    },
    /// Start the daily scheduler and block until SIGINT/SIGTERM.
    Schedule,
    /// Start the Query API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "price_forecast_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv::dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let repo_root_env = manifest_dir.join(".env");
    if repo_root_env.exists() {
        let _ = dotenv::from_path(&repo_root_env);
    }
}

struct Collaborators {
    store: Arc<ForecastStore>,
    registry: Arc<ModelRegistry>,
    pipeline: Arc<PipelineExecutor>,
    jobs: Arc<JobRegistry>,
    config: Config,
}

fn build_collaborators(config: Config) -> Result<Collaborators> {
    let store = Arc::new(ForecastStore::open(&config.storage_root).context("opening forecast store")?);

    let models_dir = Path::new(&config.storage_root).join("models");
    let registry = Arc::new(ModelRegistry::new(models_dir));
    registry.load_all().context("loading model registry")?;

    let data_source = Arc::new(HttpDataSourceClient::new(
        config.load_forecast.url.clone(),
        config.historical_prices.url.clone(),
        config.generation_forecast.url.clone(),
        non_empty(&config.load_forecast.api_key),
    ));
    let engine = Arc::new(ForecastingEngine::new(registry.clone()));
    let pipeline = Arc::new(PipelineExecutor::new(data_source, engine, store.clone()));
    let jobs = Arc::new(JobRegistry::new());

    Ok(Collaborators {
        store,
        registry,
        pipeline,
        jobs,
        config,
    })
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { target_date, config_file } => run_once(target_date, config_file).await,
        Command::Schedule => schedule().await,
        Command::Serve { host, port } => serve(host, port).await,
    }
}

fn load_config(config_file: Option<String>) -> Result<Config> {
    let mut config = Config::from_env();
    if let Some(path) = config_file {
        let overrides = ConfigFileOverrides::load(&path).with_context(|| format!("reading config file {path}"))?;
        config = config.apply_overrides(overrides);
    }
    Ok(config)
}

async fn run_once(target_date: Option<NaiveDate>, config_file: Option<String>) -> Result<()> {
    let config = load_config(config_file)?;
    let target_date = target_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let collaborators = build_collaborators(config)?;

    info!(%target_date, "running one forecast cycle");
    let report = collaborators
        .pipeline
        .run_cycle(target_date)
        .await
        .context("pipeline run failed")?;

    for outcome in &report.outcomes {
        info!(product = %outcome.product, state = ?outcome.state, warnings = outcome.warnings.len(), "cycle outcome");
    }
    Ok(())
}

async fn schedule() -> Result<()> {
    let config = Config::from_env();
    let collaborators = build_collaborators(config)?;

    let scheduler = Arc::new(Scheduler::new(collaborators.pipeline.clone(), collaborators.jobs.clone()));
    scheduler.clone().spawn();
    info!("scheduler started, waiting for daily trigger (07:00 America/Chicago)");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, exiting");
    Ok(())
}

async fn serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = Config::from_env();
    let host = host.unwrap_or_else(|| config.api_host.clone());
    let port = port.unwrap_or(config.api_port);
    let collaborators = build_collaborators(config)?;

    let data_source_urls = vec![
        collaborators.config.load_forecast.url.clone(),
        collaborators.config.historical_prices.url.clone(),
        collaborators.config.generation_forecast.url.clone(),
    ];
    let state = AppState::new(
        collaborators.store,
        collaborators.registry,
        collaborators.pipeline,
        collaborators.jobs,
        data_source_urls,
    );
    let app = api::build_router(state);

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.context("binding API listener")?;
    info!(%addr, "query API listening");
    axum::serve(listener, app).await.context("API server error")?;
    Ok(())
}
