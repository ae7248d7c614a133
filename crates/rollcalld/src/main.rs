use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rollcall_core::{AttendanceDecider, CosineMatcher, EmbeddingCache, RecordStore};
use rollcall_store::SqliteRecordStore;

mod auth;
mod config;
mod embedder;
mod http;

use auth::{HttpTokenVerifier, StaticTokenVerifier, TokenVerifier};
use config::Config;
use embedder::HttpEmbedder;
use http::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }
    let store = SqliteRecordStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening record store at {}", config.db_path.display()))?;
    let store: Arc<dyn RecordStore> = Arc::new(store);
    tracing::info!(db = %config.db_path.display(), "record store opened");

    let cache = Arc::new(EmbeddingCache::new(config.cache_max_age));
    // Startup refresh failure is not fatal: requests retry via
    // ensure_fresh and the matcher reports the empty cache explicitly.
    if let Err(e) = cache.refresh(store.as_ref()).await {
        tracing::warn!(error = %e, "initial cache refresh failed; starting with empty cache");
    }

    let verifier: Arc<dyn TokenVerifier> = match (&config.auth_url, &config.api_token) {
        (Some(url), _) => {
            tracing::info!(url = %url, "using remote token verifier");
            Arc::new(HttpTokenVerifier::new(url.clone()))
        }
        (None, Some(token)) => {
            tracing::warn!("no ROLLCALL_AUTH_URL set; using static shared-secret verifier");
            Arc::new(StaticTokenVerifier::new(token.clone()))
        }
        (None, None) => anyhow::bail!("set ROLLCALL_AUTH_URL or ROLLCALL_API_TOKEN"),
    };

    let state = AppState {
        store: store.clone(),
        cache,
        embedder: Arc::new(HttpEmbedder::new(config.embedder_url.clone())),
        verifier,
        matcher: Arc::new(CosineMatcher::new(config.matcher)),
        decider: Arc::new(AttendanceDecider::new(store)),
    };

    let app = http::router(state, &config.allowed_origins);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
