//! SocTalk binary: runs the API server, alert pipeline, workflow engine,
//! resume scan, and SSE tailer in one process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use soctalk::api::auth::AuthConfig;
use soctalk::api::event_bus::EventBus;
use soctalk::api::{create_app, tailer, ApiState};
use soctalk::config::AppConfig;
use soctalk::graph::WorkflowEngine;
use soctalk::hil::backends::CliBackend;
use soctalk::hil::{HilBackend, HilService};
use soctalk::integrations::ToolClients;
use soctalk::llm::create_chat_model;
use soctalk::orchestrator::Orchestrator;
use soctalk::persistence::{db, Checkpointer, MemoryCheckpointer, PostgresCheckpointer};
use soctalk::polling::InvestigationQueue;

#[derive(Parser, Debug)]
#[command(name = "soctalk", about = "SocTalk - autonomous SOC agent")]
struct Args {
    /// Path to a .env configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.config {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("SocTalk starting");

    let config = Arc::new(AppConfig::from_env()?);
    let auth = Arc::new(AuthConfig::from_env()?);

    // Database (optional: without it the system runs with in-memory
    // checkpoints and no event persistence or API).
    let pool = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            Some(pool)
        }
        None => {
            warn!("DATABASE_URL not set; event persistence and API disabled");
            None
        }
    };

    // LLM clients
    let fast_llm = create_chat_model(
        &config.llm,
        &config.llm.fast_model,
        config.llm.temperature,
        1024,
    )?;
    let reasoning_llm = create_chat_model(&config.llm, &config.llm.reasoning_model, 0.1, 2048)?;

    // External tool adapters register here; the core only sees the
    // ToolClient trait. Out-of-process adapters are wired by deployment.
    let clients = ToolClients::default();

    // HIL service for interactive backends; the dashboard path needs none.
    let hil = match config.hil.backend.as_str() {
        "cli" => {
            let backend: Arc<dyn HilBackend> = Arc::new(CliBackend);
            Some(Arc::new(HilService::new(
                backend,
                pool.clone(),
                config.hil.timeout,
                Some(fast_llm.clone()),
            )))
        }
        "dashboard" => None,
        other => {
            warn!(
                backend = other,
                "No in-process adapter for this HIL backend; falling back to dashboard"
            );
            None
        }
    };

    let checkpointer: Arc<dyn Checkpointer> = match &pool {
        Some(pool) => Arc::new(PostgresCheckpointer::new(pool.clone())),
        None => Arc::new(MemoryCheckpointer::new()),
    };
    let engine = Arc::new(WorkflowEngine::new(checkpointer));
    let queue = Arc::new(InvestigationQueue::new(100));

    let cancel = CancellationToken::new();
    let mut api_task = None;
    let mut tailer_task = None;

    if let Some(pool) = &pool {
        let bus = Arc::new(EventBus::new(100));

        let api_state = ApiState {
            pool: pool.clone(),
            bus: bus.clone(),
            auth: auth.clone(),
            settings_readonly: config.settings_readonly,
        };
        let app = create_app(api_state);
        let listener = tokio::net::TcpListener::bind(&config.api_bind)
            .await
            .with_context(|| format!("failed to bind {}", config.api_bind))?;
        info!(bind = %config.api_bind, "API server listening");

        let api_cancel = cancel.clone();
        api_task = Some(tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { api_cancel.cancelled().await })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "API server exited with error");
            }
        }));

        let tailer_pool = pool.clone();
        let tailer_cancel = cancel.clone();
        tailer_task = Some(tokio::spawn(async move {
            tailer::run_event_tailer(tailer_pool, bus, tailer_cancel).await;
        }));
    }

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        pool.clone(),
        engine,
        queue,
        hil,
        clients,
        fast_llm,
        reasoning_llm,
    ));

    let orchestrator_cancel = cancel.clone();
    let orchestrator_task =
        tokio::spawn(async move { orchestrator.run(orchestrator_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    cancel.cancel();

    if let Err(e) = orchestrator_task.await {
        warn!(error = %e, "Orchestrator task join failed");
    }
    if let Some(task) = api_task {
        task.await.ok();
    }
    if let Some(task) = tailer_task {
        task.await.ok();
    }
    if let Some(pool) = pool {
        pool.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}
