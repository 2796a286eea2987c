//! Voxserve Catalog Core
//!
//! Core types, access policy, and SQLite schema for the voxserve dataset
//! catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub mod migrations;
pub mod policy;
pub mod validation;

pub use policy::Identity;

/// Context-path constants for the serving tree.
///
/// Public and private datasets live under disjoint routing subtrees; a
/// dataset's context path is derived from its visibility and id, never
/// stored.
pub mod context {
    /// Admin console context.
    pub const MANAGER_CONTEXT: &str = "manager";

    /// Root of the public dataset subtree.
    pub const PUBLIC_DATASET_CONTEXT: &str = "public/dataset";

    /// Public tag-filtered listing context.
    pub const PUBLIC_TAG_CONTEXT: &str = "public/tag";

    /// Everything under this prefix requires authentication.
    pub const PRIVATE_DOMAIN: &str = "private";

    /// Root of the private dataset subtree.
    pub const PRIVATE_DATASET_CONTEXT: &str = "private/dataset";
}

/// A catalog user.
///
/// The id is immutable once created. The credential hash is deliberately
/// not part of this type; it is only read by the authentication
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique, immutable user id
    pub id: String,
    /// Display name
    pub name: String,
    /// Whether this user holds the manager role
    pub is_manager: bool,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
}

/// A dataset record in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Store-assigned id, never reused
    pub id: i64,
    /// Dataset name, unique per owner
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Location of the underlying content
    pub path: String,
    /// Owning user id
    pub owner_id: String,
    /// Whether the dataset is publicly reachable
    pub is_public: bool,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Tag titles associated with this dataset
    pub tags: BTreeSet<String>,
    /// Users holding a share grant on this dataset
    pub shared_users: BTreeSet<String>,
}

impl Dataset {
    /// Context path this dataset's serving context is registered under.
    ///
    /// Visibility selects the subtree, so a public/private toggle changes
    /// the path and forces a context restart.
    pub fn context_path(&self) -> String {
        let root = if self.is_public {
            context::PUBLIC_DATASET_CONTEXT
        } else {
            context::PRIVATE_DATASET_CONTEXT
        };
        format!("/{}/id/{}/", root, self.id)
    }

    /// Serving URL relative to the server base, without the trailing slash.
    pub fn serving_url(&self) -> String {
        let mut url = self.context_path();
        url.pop();
        url
    }
}

/// A share grant on a dataset.
///
/// At most one grant exists per (user, dataset) pair. The read/write
/// flags are recorded, but the read paths currently open the dataset to
/// any grant holder regardless of the read flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub user_id: String,
    pub dataset_id: i64,
    pub can_read: bool,
    pub can_write: bool,
    pub updated_at: DateTime<Utc>,
}

/// Errors that can occur in catalog operations
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Initialize the SQLite schema for the catalog.
///
/// Creates the base tables if they don't exist:
/// - `users`: identities and roles
/// - `datasets`: the dataset registry
/// - `tags` / `tag_dataset`: globally unique tag titles and their
///   many-to-many association with datasets
/// - `shares`: per-user share grants on datasets
///
/// Schema revisions beyond the baseline live in [`migrations`]; call
/// [`init_catalog`] to get both.
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    let ddl = r#"
    CREATE TABLE IF NOT EXISTS users (
      id TEXT PRIMARY KEY NOT NULL,
      name TEXT NOT NULL,
      credential TEXT NOT NULL,
      manager INTEGER NOT NULL DEFAULT 0,
      updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS datasets (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      name TEXT NOT NULL,
      path TEXT NOT NULL,
      description TEXT NOT NULL DEFAULT '',
      owner_id TEXT NOT NULL,
      public INTEGER NOT NULL DEFAULT 0,
      updated_at TEXT NOT NULL,
      FOREIGN KEY (owner_id) REFERENCES users(id)
    );

    CREATE INDEX IF NOT EXISTS idx_datasets_owner ON datasets(owner_id);
    CREATE INDEX IF NOT EXISTS idx_datasets_public ON datasets(public);

    CREATE TABLE IF NOT EXISTS tags (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      title TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_title ON tags(title);

    CREATE TABLE IF NOT EXISTS tag_dataset (
      tag_id INTEGER NOT NULL,
      dataset_id INTEGER NOT NULL,
      PRIMARY KEY (tag_id, dataset_id),
      FOREIGN KEY (tag_id) REFERENCES tags(id),
      FOREIGN KEY (dataset_id) REFERENCES datasets(id)
    );

    CREATE INDEX IF NOT EXISTS idx_tag_dataset_dataset ON tag_dataset(dataset_id);

    CREATE TABLE IF NOT EXISTS shares (
      user_id TEXT NOT NULL,
      dataset_id INTEGER NOT NULL,
      can_read INTEGER NOT NULL DEFAULT 0,
      updated_at TEXT NOT NULL,
      PRIMARY KEY (user_id, dataset_id),
      FOREIGN KEY (user_id) REFERENCES users(id),
      FOREIGN KEY (dataset_id) REFERENCES datasets(id)
    );

    CREATE INDEX IF NOT EXISTS idx_shares_dataset ON shares(dataset_id);
    "#;

    conn.execute_batch(ddl)?;
    Ok(())
}

/// Initialize the catalog: base schema + migrations.
///
/// This is the recommended entry point for catalog initialization. It
/// creates the base tables and then applies any pending schema revisions.
/// Idempotent - safe to call multiple times.
///
/// Returns the number of migrations applied (0 if already up to date).
pub fn init_catalog(conn: &rusqlite::Connection, run_migrations_flag: bool) -> Result<usize> {
    init_sqlite_schema(conn)?;

    if run_migrations_flag {
        migrations::run_migrations(conn)
    } else {
        Ok(0)
    }
}
