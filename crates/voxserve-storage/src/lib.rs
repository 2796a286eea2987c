//! Voxserve Catalog Storage
//!
//! The durable store for users, datasets, tags, and share grants. Each
//! public operation is a single transactional unit against a local SQLite
//! file; multi-statement sequences run inside one transaction and every
//! statement is individually idempotent, so retries are safe.
//!
//! Callers must treat an error return as "the operation did not happen",
//! never as "it happened with default values".

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use voxserve_core::{init_catalog, CatalogError, Dataset, Result, ShareGrant, User};

/// Handle to the catalog database.
///
/// Constructed once at startup and passed by reference to every caller;
/// each operation opens its own short-lived connection, so there is no
/// implicit serialization across different dataset ids.
#[derive(Clone, Debug)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    /// Open (and if necessary create) the catalog at `path`.
    ///
    /// Runs the base schema and all pending migrations before returning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.connect()?;
        let applied = init_catalog(&conn, true)?;
        if applied > 0 {
            tracing::info!(applied, path = %store.path.display(), "Applied schema migrations");
        }
        Ok(store)
    }

    /// Path to the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Verify the database is responsive.
    pub fn ping(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Whether the catalog holds no users yet.
    ///
    /// The server refuses mutating calls until the bootstrap manager
    /// exists.
    pub fn has_no_users(&self) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    /// Create a user, or refresh an existing one.
    ///
    /// Deliberate merge semantics: re-creating an id overwrites the
    /// mutable fields instead of conflicting, and never produces a second
    /// record.
    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        credential_hash: &str,
        is_manager: bool,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO users (id, name, credential, manager, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               credential = excluded.credential,
               manager = excluded.manager,
               updated_at = excluded.updated_at",
            params![id, name, credential_hash, is_manager, now()],
        )?;
        Ok(())
    }

    /// Fetch a user by id.
    pub fn get_user(&self, id: &str) -> Result<User> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, name, manager, updated_at FROM users WHERE id = ?1",
            [id],
            user_from_row,
        )
        .optional()?
        .ok_or_else(|| CatalogError::NotFound(format!("user {}", id)))
    }

    /// Fetch the stored credential hash for a user.
    ///
    /// Only the authentication collaborator reads this.
    pub fn credential_hash(&self, id: &str) -> Result<String> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT credential FROM users WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CatalogError::NotFound(format!("user {}", id)))
    }

    /// All users, ordered by id.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT id, name, manager, updated_at FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Change a user's manager flag.
    pub fn set_user_manager(&self, id: &str, is_manager: bool) -> Result<()> {
        let conn = self.connect()?;
        let n = conn.execute(
            "UPDATE users SET manager = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, is_manager, now()],
        )?;
        ensure_one_row(n, || format!("user {}", id))
    }

    /// Change a user's display name.
    pub fn update_user_name(&self, id: &str, name: &str) -> Result<()> {
        let conn = self.connect()?;
        let n = conn.execute(
            "UPDATE users SET name = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, name, now()],
        )?;
        ensure_one_row(n, || format!("user {}", id))
    }

    /// Replace a user's credential hash.
    pub fn update_user_password(&self, id: &str, credential_hash: &str) -> Result<()> {
        let conn = self.connect()?;
        let n = conn.execute(
            "UPDATE users SET credential = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, credential_hash, now()],
        )?;
        ensure_one_row(n, || format!("user {}", id))
    }

    /// Remove a user.
    ///
    /// Managers cannot be removed by this path. A user who still owns
    /// datasets cannot be removed either; the caller must remove or
    /// reassign the datasets first.
    pub fn remove_user(&self, id: &str) -> Result<()> {
        let mut conn = self.connect()?;

        let is_manager: Option<bool> = conn
            .query_row("SELECT manager FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        let is_manager =
            is_manager.ok_or_else(|| CatalogError::NotFound(format!("user {}", id)))?;
        if is_manager {
            return Err(CatalogError::Forbidden(format!(
                "manager {} cannot be removed",
                id
            )));
        }

        let owned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM datasets WHERE owner_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if owned > 0 {
            return Err(CatalogError::Conflict(format!(
                "user {} still owns {} datasets",
                id, owned
            )));
        }

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM shares WHERE user_id = ?1", [id])?;
        let n = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
        tx.commit()?;

        ensure_one_row(n, || format!("user {}", id))
    }

    // ========================================================================
    // Datasets
    // ========================================================================

    /// Register a new dataset and return its store-assigned id.
    pub fn create_dataset(
        &self,
        owner_id: &str,
        name: &str,
        description: &str,
        path: &str,
        is_public: bool,
    ) -> Result<i64> {
        if owner_id.is_empty() {
            return Err(CatalogError::InvalidInput("owner id is empty".to_string()));
        }

        let conn = self.connect()?;
        let owner_known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            [owner_id],
            |row| row.get(0),
        )?;
        if owner_known == 0 {
            return Err(CatalogError::InvalidInput(format!(
                "unknown owner {}",
                owner_id
            )));
        }

        conn.execute(
            "INSERT INTO datasets (name, path, description, owner_id, public, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, path, description, owner_id, is_public, now()],
        )
        .map_err(|e| {
            constraint_to_conflict(e, format!("dataset {} already exists for {}", name, owner_id))
        })?;

        Ok(conn.last_insert_rowid())
    }

    /// Fetch a dataset by id, with its tag set and shared-user set
    /// populated.
    pub fn get_dataset(&self, id: i64) -> Result<Dataset> {
        let conn = self.connect()?;
        let mut dataset = conn
            .query_row(
                "SELECT id, name, path, description, owner_id, public, updated_at
                 FROM datasets WHERE id = ?1",
                [id],
                dataset_from_row,
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(format!("dataset {}", id)))?;

        dataset.tags = load_tags(&conn, id)?;
        dataset.shared_users = load_shared_users(&conn, id)?;
        Ok(dataset)
    }

    /// Fetch a dataset by id, restricted to its owner.
    pub fn get_dataset_owned(&self, id: i64, owner_id: &str) -> Result<Dataset> {
        let dataset = self.get_dataset(id)?;
        if dataset.owner_id != owner_id {
            return Err(CatalogError::NotFound(format!(
                "dataset {} for owner {}",
                id, owner_id
            )));
        }
        Ok(dataset)
    }

    /// Replace the mutable fields of a dataset (name, path, description,
    /// public flag), keyed by id.
    pub fn update_dataset(&self, dataset: &Dataset) -> Result<()> {
        let conn = self.connect()?;
        let n = conn
            .execute(
                "UPDATE datasets SET name = ?2, path = ?3, description = ?4, public = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    dataset.id,
                    dataset.name,
                    dataset.path,
                    dataset.description,
                    dataset.is_public,
                    now()
                ],
            )
            .map_err(|e| {
                constraint_to_conflict(
                    e,
                    format!(
                        "dataset name {} already taken for owner {}",
                        dataset.name, dataset.owner_id
                    ),
                )
            })?;
        ensure_one_row(n, || format!("dataset {}", dataset.id))
    }

    /// Remove a dataset and everything hanging off it.
    ///
    /// Referential order: tag associations, then share grants, then the
    /// row itself - all inside one transaction.
    pub fn remove_dataset(&self, id: i64) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM tag_dataset WHERE dataset_id = ?1", [id])?;
        tx.execute("DELETE FROM shares WHERE dataset_id = ?1", [id])?;
        let n = tx.execute("DELETE FROM datasets WHERE id = ?1", [id])?;
        tx.commit()?;
        ensure_one_row(n, || format!("dataset {}", id))
    }

    /// Datasets owned by a user, with tag and shared-user sets populated.
    pub fn list_owned(&self, owner_id: &str) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut datasets = query_datasets(
            &conn,
            "SELECT id, name, path, description, owner_id, public, updated_at
             FROM datasets WHERE owner_id = ?1 ORDER BY id",
            [owner_id],
        )?;
        for ds in &mut datasets {
            ds.tags = load_tags(&conn, ds.id)?;
            ds.shared_users = load_shared_users(&conn, ds.id)?;
        }
        Ok(datasets)
    }

    /// Datasets shared with a user, with tag sets populated.
    ///
    /// Any grant row qualifies; the per-grant read flag is recorded but
    /// not consulted here.
    pub fn list_shared(&self, user_id: &str) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut datasets = query_datasets(
            &conn,
            "SELECT d.id, d.name, d.path, d.description, d.owner_id, d.public, d.updated_at
             FROM datasets d JOIN shares s ON d.id = s.dataset_id
             WHERE s.user_id = ?1 ORDER BY d.id",
            [user_id],
        )?;
        for ds in &mut datasets {
            ds.tags = load_tags(&conn, ds.id)?;
        }
        Ok(datasets)
    }

    /// All public datasets, with tag sets populated.
    pub fn list_public(&self) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut datasets = query_datasets(
            &conn,
            "SELECT id, name, path, description, owner_id, public, updated_at
             FROM datasets WHERE public = 1 ORDER BY id",
            [],
        )?;
        for ds in &mut datasets {
            ds.tags = load_tags(&conn, ds.id)?;
        }
        Ok(datasets)
    }

    /// Public datasets carrying the given tag, with tag sets populated.
    pub fn list_public_by_tag(&self, tag: &str) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut datasets = query_datasets(
            &conn,
            "SELECT d.id, d.name, d.path, d.description, d.owner_id, d.public, d.updated_at
             FROM datasets d
             JOIN tag_dataset td ON d.id = td.dataset_id
             JOIN tags t ON t.id = td.tag_id
             WHERE d.public = 1 AND t.title = ?1 ORDER BY d.id",
            [tag],
        )?;
        for ds in &mut datasets {
            ds.tags = load_tags(&conn, ds.id)?;
        }
        Ok(datasets)
    }

    /// All private datasets, with tag sets populated.
    pub fn list_private(&self) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut datasets = query_datasets(
            &conn,
            "SELECT id, name, path, description, owner_id, public, updated_at
             FROM datasets WHERE public = 0 ORDER BY id",
            [],
        )?;
        for ds in &mut datasets {
            ds.tags = load_tags(&conn, ds.id)?;
        }
        Ok(datasets)
    }

    /// Every dataset in the catalog. Used by the startup reconciliation
    /// pass that rebuilds the serving contexts.
    pub fn list_all(&self) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut datasets = query_datasets(
            &conn,
            "SELECT id, name, path, description, owner_id, public, updated_at
             FROM datasets ORDER BY id",
            [],
        )?;
        for ds in &mut datasets {
            ds.tags = load_tags(&conn, ds.id)?;
            ds.shared_users = load_shared_users(&conn, ds.id)?;
        }
        Ok(datasets)
    }

    /// Number of datasets in the catalog.
    pub fn count_datasets(&self) -> Result<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM datasets", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Associate a tag with a dataset.
    ///
    /// Idempotent: the tag title is looked up or created, and re-adding an
    /// existing association is a no-op.
    pub fn add_tag(&self, dataset_id: i64, title: &str) -> Result<()> {
        let conn = self.connect()?;
        self.ensure_dataset_exists(&conn, dataset_id)?;

        conn.execute("INSERT OR IGNORE INTO tags (title) VALUES (?1)", [title])?;
        let tag_id: i64 =
            conn.query_row("SELECT id FROM tags WHERE title = ?1", [title], |row| {
                row.get(0)
            })?;
        conn.execute(
            "INSERT OR IGNORE INTO tag_dataset (tag_id, dataset_id) VALUES (?1, ?2)",
            params![tag_id, dataset_id],
        )?;
        Ok(())
    }

    /// Remove a tag from a dataset. No-op if the tag or the association
    /// does not exist.
    pub fn remove_tag(&self, dataset_id: i64, title: &str) -> Result<()> {
        let conn = self.connect()?;
        let tag_id: Option<i64> = conn
            .query_row("SELECT id FROM tags WHERE title = ?1", [title], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(tag_id) = tag_id {
            conn.execute(
                "DELETE FROM tag_dataset WHERE tag_id = ?1 AND dataset_id = ?2",
                params![tag_id, dataset_id],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Share grants
    // ========================================================================

    /// Grant (or refresh) a share on a dataset for a user.
    pub fn grant_share(
        &self,
        dataset_id: i64,
        user_id: &str,
        can_read: bool,
        can_write: bool,
    ) -> Result<()> {
        let conn = self.connect()?;
        self.ensure_dataset_exists(&conn, dataset_id)?;

        let user_known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        if user_known == 0 {
            return Err(CatalogError::NotFound(format!("user {}", user_id)));
        }

        conn.execute(
            "INSERT INTO shares (user_id, dataset_id, can_read, can_write, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, dataset_id) DO UPDATE SET
               can_read = excluded.can_read,
               can_write = excluded.can_write,
               updated_at = excluded.updated_at",
            params![user_id, dataset_id, can_read, can_write, now()],
        )?;
        Ok(())
    }

    /// Revoke a share. No-op if no grant exists.
    pub fn revoke_share(&self, dataset_id: i64, user_id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM shares WHERE dataset_id = ?1 AND user_id = ?2",
            params![dataset_id, user_id],
        )?;
        Ok(())
    }

    /// All grants on a dataset.
    pub fn shares_for_dataset(&self, dataset_id: i64) -> Result<Vec<ShareGrant>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, dataset_id, can_read, can_write, updated_at
             FROM shares WHERE dataset_id = ?1 ORDER BY user_id",
        )?;
        let grants = stmt
            .query_map([dataset_id], |row| {
                Ok(ShareGrant {
                    user_id: row.get(0)?,
                    dataset_id: row.get(1)?,
                    can_read: row.get(2)?,
                    can_write: row.get(3)?,
                    updated_at: parse_ts(row.get(4)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(grants)
    }

    fn ensure_dataset_exists(&self, conn: &Connection, id: i64) -> Result<()> {
        let known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM datasets WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if known == 0 {
            return Err(CatalogError::NotFound(format!("dataset {}", id)));
        }
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        is_manager: row.get(2)?,
        updated_at: parse_ts(row.get(3)?)?,
    })
}

fn dataset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dataset> {
    Ok(Dataset {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        description: row.get(3)?,
        owner_id: row.get(4)?,
        is_public: row.get(5)?,
        updated_at: parse_ts(row.get(6)?)?,
        tags: BTreeSet::new(),
        shared_users: BTreeSet::new(),
    })
}

fn query_datasets<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Dataset>> {
    let mut stmt = conn.prepare(sql)?;
    let datasets = stmt
        .query_map(params, dataset_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(datasets)
}

fn load_tags(conn: &Connection, dataset_id: i64) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.title FROM tags t JOIN tag_dataset td ON t.id = td.tag_id
         WHERE td.dataset_id = ?1",
    )?;
    let tags = stmt
        .query_map([dataset_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(tags)
}

fn load_shared_users(conn: &Connection, dataset_id: i64) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM shares WHERE dataset_id = ?1")?;
    let users = stmt
        .query_map([dataset_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(users)
}

fn ensure_one_row(n: usize, what: impl FnOnce() -> String) -> Result<()> {
    if n == 1 {
        Ok(())
    } else {
        Err(CatalogError::NotFound(what()))
    }
}

fn constraint_to_conflict(err: rusqlite::Error, message: String) -> CatalogError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CatalogError::Conflict(message)
        }
        _ => CatalogError::Storage(err),
    }
}
