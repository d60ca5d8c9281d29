use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_api::config::Config;
use chat_api::db::blocked_ips::PgBlockList;
use chat_api::db::comments::{CommentStore, PgCommentStore};
use chat_api::db::kv::MemoryStore;
use chat_api::{AppState, Backends};

/// How often expired comments and cooldown keys are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() {
    // .env is optional; the environment may already carry everything.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // In-memory KV store for cooldown keys; they only need to outlive a few seconds.
    let kv = Arc::new(MemoryStore::new());

    let backends = match config.database_url.as_deref() {
        Some(url) => {
            let db = chat_api::db::pool::connect(url).expect("failed to build database pool");
            Backends {
                comments: Arc::new(PgCommentStore::new(db.clone())),
                block_list: Arc::new(PgBlockList::new(db)),
                kv: kv.clone(),
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set; comments and blocks are kept in memory only");
            Backends {
                kv: kv.clone(),
                ..Backends::in_memory(&config)
            }
        }
    };

    let state = AppState::build(config, backends)
        .await
        .expect("failed to initialize chat state");

    tracing::info!(
        history_limit = state.config.history_limit,
        retention_hours = state.config.retention_hours,
        cooldown_secs = state.config.comment_cooldown_secs,
        "chat-api configured"
    );

    tokio::spawn(sweep(
        state.comments.clone(),
        kv,
        state.config.retention_hours,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(chat_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");
}

/// Prune comments past retention and expired kv keys.
async fn sweep(comments: Arc<dyn CommentStore>, kv: Arc<MemoryStore>, retention_hours: i64) {
    let mut timer = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        timer.tick().await;

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(retention_hours);
        match comments.prune_before(cutoff).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "expired comments pruned"),
            Err(e) => tracing::error!(error = %e, "comment retention sweep failed"),
        }

        let purged = kv.purge_expired();
        tracing::debug!(purged, "expired kv keys purged");
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}
