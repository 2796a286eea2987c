//! Voxserve Catalog API Library
//!
//! Server components for the voxserve dataset catalog: the catalog
//! service, the serving-context registry, the traffic sampler, and the
//! HTTP surface over them.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod health;
pub mod registry;
pub mod sampler;
pub mod service;
pub mod serving;

use auth::Authenticator;
use sampler::{ByteCounter, ServerStats, TrafficSampler};
use service::CatalogService;
use std::sync::Arc;

/// Application state shared across handlers.
///
/// Constructed once at startup; every handler receives it by reference.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CatalogService>,
    pub auth: Arc<Authenticator>,
    pub sampler: Arc<TrafficSampler>,
    pub counter: Arc<ByteCounter>,
    pub stats: Arc<ServerStats>,
}

pub use handlers::router;
