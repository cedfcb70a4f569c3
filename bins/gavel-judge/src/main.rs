mod config;
mod engine;
mod evaluator;
mod executor;
mod monitor;


use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use tokio::signal;
use tracing::{error, info, warn};

use gavel_common::redis as queue;
use gavel_common::store::RedisStore;

use config::ToolchainRegistry;
use executor::JudgeOrchestrator;

type Orchestrator = JudgeOrchestrator<RedisStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Gavel judge booting...");

    let registry = load_registry()?;
    info!("Loaded toolchains: {:?}", registry.list_languages());

    // Connect to Redis
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", redis_url);

    let scratch_root = std::env::var("GAVEL_SCRATCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());
    info!("Scratch root: {}", scratch_root.display());

    let orchestrator = Arc::new(JudgeOrchestrator::new(
        registry,
        RedisStore::new(redis_conn.clone()),
        scratch_root,
    ));

    // Liveness probe plus stuck-run diagnosis: a submission that stays
    // pending shows up here as a long-lived active run.
    let health_addr =
        std::env::var("GAVEL_HEALTH_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    tokio::spawn(serve_health(health_addr, Arc::clone(&orchestrator)));

    // Setup graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        warn!("Received shutdown signal, draining queue...");
    };

    let mut intake_conn = redis_conn;
    tokio::select! {
        _ = worker_loop(&mut intake_conn, &orchestrator) => {},
        _ = shutdown => {},
    }

    info!("Judge shutdown complete");
    Ok(())
}

fn load_registry() -> anyhow::Result<ToolchainRegistry> {
    let path = std::env::var("GAVEL_TOOLCHAINS")
        .unwrap_or_else(|_| "config/toolchains.json".to_string());
    let path = Path::new(&path);

    if path.exists() {
        ToolchainRegistry::load(path)
    } else {
        info!(
            "Toolchain config {} not found, using built-in recipes",
            path.display()
        );
        Ok(ToolchainRegistry::builtin())
    }
}

async fn worker_loop(conn: &mut redis::aio::ConnectionManager, orchestrator: &Arc<Orchestrator>) {
    loop {
        // BLPOP with 5 second timeout so shutdown stays responsive
        match queue::pop_request(conn, 5.0).await {
            Ok(Some(request)) => {
                let submission_id = request.submission_id;
                info!(
                    submission_id,
                    language = %request.language,
                    test_cases = request.test_cases.len(),
                    source_size = request.code.len(),
                    "Received judge request"
                );

                match Arc::clone(orchestrator).spawn_judge(request) {
                    Ok(handle) => {
                        // Detached, but never fire-and-forget: the handle is
                        // awaited so completion and faults stay observable.
                        tokio::spawn(async move {
                            match handle.wait().await {
                                Ok(outcome) => info!(
                                    submission_id,
                                    status = ?outcome.status,
                                    score = outcome.score,
                                    "Judge run finished"
                                ),
                                Err(e) => {
                                    error!(submission_id, error = %e, "Judge run failed")
                                }
                            }
                        });
                    }
                    Err(e) => warn!(submission_id, error = %e, "Refused judge request"),
                }
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn serve_health(addr: String, orchestrator: Arc<Orchestrator>) {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .with_state(orchestrator);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind health endpoint");
            return;
        }
    };

    info!("Health endpoint listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Health endpoint error");
    }
}

async fn healthz(State(orchestrator): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    let active: Vec<_> = orchestrator
        .active_runs()
        .into_iter()
        .map(|(submission_id, age)| {
            serde_json::json!({
                "submission_id": submission_id,
                "running_secs": age.as_secs(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "languages": orchestrator.languages(),
        "active_runs": active,
    }))
}
