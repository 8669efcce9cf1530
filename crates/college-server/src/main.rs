//! # college-server
//!
//! Coursework dataset service.
//!
//! This binary provides:
//! - **Dataset lifecycle**: students upload Markdown documents against a
//!   topic assignment; each upload is indexed in the background by an
//!   external retrieval service and can then be queried
//! - **Topics and rosters** managed by teachers
//! - **Saved chats**: Q&A transcripts scoped by per-dataset grants, with
//!   Markdown export
//! - **REST API** (axum) authenticated by bearer tokens resolved against an
//!   external identity service
//! - **Per-user rate limiting** on uploads and questions

mod api;
mod auth;
mod blob_store;
mod chats;
mod config;
mod datasets;
mod error;
mod indexer;
mod permissions;
mod rag;
mod rate_limit;
mod store;
mod topics;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use college_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::{HttpIdentityResolver, IdentityResolver};
use crate::blob_store::FsBlobStore;
use crate::chats::ChatEngine;
use crate::config::ServerConfig;
use crate::datasets::{DatasetEngine, DatasetLimits};
use crate::indexer::Indexer;
use crate::permissions::PermissionEngine;
use crate::rag::{HttpIndexingService, IndexingService};
use crate::rate_limit::RateLimiter;
use crate::store::Store;
use crate::topics::TopicEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,college_server=debug")),
        )
        .init();

    info!("Starting college server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let store = Store::new(db);

    // Blob store (creates directory if missing)
    let blobs = Arc::new(FsBlobStore::new(config.blob_storage_path.clone()).await?);

    let identity: Arc<dyn IdentityResolver> = Arc::new(HttpIdentityResolver::new(
        &config.auth_service_url,
        &config.auth_internal_token,
        config.auth_timeout,
    )?);
    let indexing: Arc<dyn IndexingService> = Arc::new(HttpIndexingService::new(
        &config.rag_service_url,
        &config.rag_service_token,
        config.rag_timeout,
    )?);

    let indexer = Indexer::new(indexing.clone(), store.clone());
    let datasets = DatasetEngine::new(
        store.clone(),
        blobs,
        indexing,
        indexer,
        DatasetLimits {
            max_datasets_per_user: config.max_datasets_per_user,
            max_file_size: config.max_file_size,
        },
    );

    let upload_limiter = RateLimiter::per_user(config.upload_rate_limit);
    let ask_limiter = RateLimiter::per_user(config.upload_rate_limit);
    let http_addr = config.http_addr;

    let app_state = AppState {
        datasets,
        topics: TopicEngine::new(store.clone(), identity.clone()),
        permissions: PermissionEngine::new(store.clone()),
        chats: ChatEngine::new(store),
        identity,
        upload_limiter: upload_limiter.clone(),
        ask_limiter: ask_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            upload_limiter.purge_stale(600.0).await;
            ask_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
