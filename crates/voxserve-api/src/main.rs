//! Voxserve Catalog Server
//!
//! Serves the dataset catalog over HTTP: public listings, per-user
//! catalog operations, and the manager console.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voxserve_api::auth::Authenticator;
use voxserve_api::config::Config;
use voxserve_api::registry::ContextRegistry;
use voxserve_api::sampler::{self, ByteCounter, ServerStats, TrafficSampler};
use voxserve_api::service::CatalogService;
use voxserve_api::serving::FsContextFactory;
use voxserve_api::AppState;
use voxserve_storage::CatalogStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(catalog = %config.catalog_path, "Using catalog");

    let store = match CatalogStore::open(&config.catalog_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open catalog: {}", e);
            std::process::exit(1);
        }
    };

    let auth = Arc::new(Authenticator::new(store.clone()));

    // The catalog refuses to operate until its bootstrap manager exists.
    match store.has_no_users() {
        Ok(true) => {
            let Some(bootstrap) = &config.bootstrap else {
                tracing::error!(
                    "Catalog has no users. Set VOXSERVE_BOOTSTRAP_ID, VOXSERVE_BOOTSTRAP_NAME \
                     and VOXSERVE_BOOTSTRAP_PASSWORD to create the first manager."
                );
                std::process::exit(1);
            };
            let hash = match auth.hash_credential(&bootstrap.password).await {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::error!("Failed to hash bootstrap credential: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = store.create_user(&bootstrap.id, &bootstrap.name, &hash, true) {
                tracing::error!("Failed to create bootstrap manager: {}", e);
                std::process::exit(1);
            }
            tracing::info!(manager = %bootstrap.id, "Created bootstrap manager");
        }
        Ok(false) => {}
        Err(e) => {
            tracing::error!("Failed to probe users: {}", e);
            std::process::exit(1);
        }
    }

    let registry = Arc::new(ContextRegistry::new(Arc::new(FsContextFactory)));

    // Reconciliation pass: the durable records are the source of truth
    // for the live routing tree.
    match store.list_all() {
        Ok(datasets) => registry.rebuild(datasets),
        Err(e) => tracing::error!("Failed to rebuild serving contexts: {}", e),
    }

    let service = Arc::new(CatalogService::new(store, registry));
    let sampler = Arc::new(TrafficSampler::new());
    let counter = Arc::new(ByteCounter::default());
    let stats = Arc::new(ServerStats::default());
    sampler::spawn(sampler.clone(), counter.clone());

    let state = AppState {
        service,
        auth,
        sampler,
        counter,
        stats,
    };
    let app = voxserve_api::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("voxserve listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
