use std::path::PathBuf;
use std::sync::Arc;

use axum::http::header;
use axum::routing::post;
use tracing_subscriber::EnvFilter;

use chitter_server::config::ServerConfig;
use chitter_server::router::build_router;
use chitter_server::state::AppState;
use chitter_shared::service::ChatService;
use chitter_store_mem::{ChitterMem, FileSnapshotStore};
use chitter_store_sql::PostgresChitterDatabase;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let service: Arc<dyn ChatService> = if config.is_memory_backend() {
        let snapshot_store = Arc::new(FileSnapshotStore::new(config.snapshot_path.clone()));
        let mem = Arc::new(ChitterMem::new(Some(snapshot_store)));
        mem.load().await?;
        mem.spawn_background_tasks();
        tracing::info!(path = %config.snapshot_path, "in-memory backend loaded");
        mem
    } else {
        let pool = connect_with_retry(&config.postgres_url(), config.max_db_connections).await?;
        sqlx::migrate!("../../crates/store-sql/migrations")
            .run(&pool)
            .await?;
        let sql = Arc::new(PostgresChitterDatabase::new(pool));
        sql.spawn_background_tasks();
        tracing::info!("postgres backend connected");
        sql
    };

    let upload_dir = PathBuf::from(&config.upload_dir);
    tokio::fs::create_dir_all(&upload_dir).await.ok();

    let admin = AdminState {
        shutdown_token: Arc::new(config.shutdown_token.clone()),
        shutdown_tx,
    };
    let config = Arc::new(config);
    let state = AppState {
        service,
        config: config.clone(),
        upload_dir,
    };

    let app = build_router(state).merge(
        axum::Router::new()
            .route("/admin/shutdown", post(admin_shutdown))
            .with_state(admin),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    Ok(())
}

/// Boot-time connection retry: storage-connection errors are the one
/// failure the startup phase retries, bounded so a persistently
/// unreachable database still fails the process rather than hanging
/// forever.
async fn connect_with_retry(
    url: &str,
    max_connections: u32,
) -> Result<sqlx::PgPool, sqlx::Error> {
    const MAX_ATTEMPTS: u32 = 5;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < MAX_ATTEMPTS => {
                let backoff = std::time::Duration::from_secs(1 << (attempt - 1).min(4));
                tracing::warn!(
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    error = %e,
                    "database connection failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone)]
struct AdminState {
    shutdown_token: Arc<String>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

/// POST /admin/shutdown — triggers graceful shutdown when the bearer token
/// matches the configured `SHUTDOWN_TOKEN`. A blank configured token never
/// matches, so the endpoint is inert unless explicitly configured.
async fn admin_shutdown(
    axum::extract::State(admin): axum::extract::State<AdminState>,
    headers: axum::http::HeaderMap,
) -> axum::http::StatusCode {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if admin.shutdown_token.is_empty() || provided != admin.shutdown_token.as_str() {
        return axum::http::StatusCode::UNAUTHORIZED;
    }

    tracing::info!("shutdown requested via admin endpoint");
    let _ = admin.shutdown_tx.send(true);
    axum::http::StatusCode::ACCEPTED
}

async fn shutdown_signal(mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let admin_triggered = async {
        let _ = shutdown_rx.changed().await;
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = admin_triggered => {}
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
}

