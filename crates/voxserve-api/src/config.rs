//! Server configuration from environment variables.
//!
//! Reads:
//! - `VOXSERVE_CATALOG_PATH`: path to the SQLite catalog (default:
//!   `voxserve_catalog.db`)
//! - `VOXSERVE_PORT` / `PORT`: listening port (default: 8080)
//! - `VOXSERVE_BOOTSTRAP_ID` / `VOXSERVE_BOOTSTRAP_NAME` /
//!   `VOXSERVE_BOOTSTRAP_PASSWORD`: first manager, created when the
//!   catalog has no users yet

const DEFAULT_CATALOG_PATH: &str = "voxserve_catalog.db";
const DEFAULT_PORT: u16 = 8080;

/// The first manager, created on an empty catalog.
#[derive(Debug, Clone)]
pub struct BootstrapManager {
    pub id: String,
    pub name: String,
    pub password: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_path: String,
    pub port: u16,
    pub bootstrap: Option<BootstrapManager>,
}

impl Config {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Self {
        let catalog_path = std::env::var("VOXSERVE_CATALOG_PATH")
            .unwrap_or_else(|_| DEFAULT_CATALOG_PATH.to_string());

        let port = std::env::var("VOXSERVE_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let bootstrap = match (
            std::env::var("VOXSERVE_BOOTSTRAP_ID"),
            std::env::var("VOXSERVE_BOOTSTRAP_NAME"),
            std::env::var("VOXSERVE_BOOTSTRAP_PASSWORD"),
        ) {
            (Ok(id), Ok(name), Ok(password)) => Some(BootstrapManager { id, name, password }),
            _ => None,
        };

        Self {
            catalog_path,
            port,
            bootstrap,
        }
    }
}
