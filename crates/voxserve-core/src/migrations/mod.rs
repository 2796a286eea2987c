//! Schema migration framework for the voxserve catalog.
//!
//! A versioned, idempotent migration system for evolving the SQLite
//! schema. Migrations are forward-only and tracked in a dedicated
//! `schema_migrations` table.
//!
//! # Design Principles
//!
//! 1. **Idempotent**: All migrations use `IF NOT EXISTS` / `IF EXISTS` clauses
//! 2. **Versioned**: Each migration has a unique version number
//! 3. **Forward-only**: No rollback support
//! 4. **Atomic**: Each migration runs in a transaction
//! 5. **Exclusive**: Advisory lock prevents concurrent migrations

use crate::{CatalogError, Result};
use rusqlite::Connection;

mod v0_1_0;
mod v0_2_0;

/// Migration version number.
pub type MigrationVersion = i64;

/// A schema migration.
pub struct Migration {
    /// Version number (must be unique and monotonically increasing)
    pub version: MigrationVersion,
    /// Human-readable description
    pub description: &'static str,
    /// SQL to execute (should be idempotent)
    pub sql: &'static str,
    /// Columns to add after SQL execution (table, column, type).
    /// SQLite doesn't support IF NOT EXISTS for ADD COLUMN, so these are
    /// handled separately.
    pub add_columns: &'static [(&'static str, &'static str, &'static str)],
}

/// All available migrations in order.
/// Add new migrations to the end of this array.
pub fn all_migrations() -> Vec<Migration> {
    vec![v0_1_0::migration(), v0_2_0::migration()]
}

/// Initialize the migrations tracking table with advisory lock support.
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Advisory lock table to prevent concurrent migrations
        CREATE TABLE IF NOT EXISTS migration_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            locked_at TEXT,
            locked_by TEXT
        );

        INSERT OR IGNORE INTO migration_lock (id, locked_at, locked_by) VALUES (1, NULL, NULL);
        "#,
    )?;
    Ok(())
}

/// Check if a column exists in a table.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

/// Safely add a column to a table (idempotent - skips if already exists).
fn add_column_if_not_exists(
    conn: &Connection,
    table: &str,
    column: &str,
    column_type: &str,
) -> Result<bool> {
    if column_exists(conn, table, column)? {
        tracing::debug!(table, column, "Column already exists, skipping");
        return Ok(false);
    }

    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type);
    conn.execute(&sql, [])?;
    tracing::info!(table, column, column_type, "Added column");
    Ok(true)
}

/// Acquire the migration advisory lock.
/// Returns true if lock was acquired, false if another process holds it.
/// Stale locks (older than 5 minutes) are treated as released.
fn acquire_migration_lock(conn: &Connection) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE migration_lock SET locked_at = datetime('now'), locked_by = 'migration'
         WHERE id = 1 AND (locked_at IS NULL OR locked_at < datetime('now', '-5 minutes'))",
        [],
    )?;
    Ok(rows > 0)
}

/// Release the migration advisory lock.
fn release_migration_lock(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE migration_lock SET locked_at = NULL, locked_by = NULL WHERE id = 1",
        [],
    )?;
    Ok(())
}

/// Get the current schema version (highest applied migration).
pub fn get_schema_version(conn: &Connection) -> Result<MigrationVersion> {
    init_migrations_table(conn)?;

    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .ok()
        .flatten();

    Ok(version.unwrap_or(0))
}

/// Check if a specific migration has been applied.
pub fn is_migration_applied(conn: &Connection, version: MigrationVersion) -> Result<bool> {
    init_migrations_table(conn)?;

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    Ok(count > 0)
}

/// Run all pending migrations.
///
/// Idempotent - only applies migrations that haven't been applied yet.
/// Each migration runs in its own transaction. An advisory lock prevents
/// concurrent runs; a held, non-stale lock is an error.
///
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    init_migrations_table(conn)?;

    if !acquire_migration_lock(conn)? {
        return Err(CatalogError::Other(
            "Another migration is in progress. Wait and retry.".to_string(),
        ));
    }

    let result = run_migrations_inner(conn);

    // Always release the lock
    if let Err(e) = release_migration_lock(conn) {
        tracing::warn!("Failed to release migration lock: {}", e);
    }

    result
}

/// Internal migration runner (called while holding lock).
fn run_migrations_inner(conn: &Connection) -> Result<usize> {
    let migrations = all_migrations();
    let mut applied_count = 0;

    for migration in migrations {
        if is_migration_applied(conn, migration.version)? {
            tracing::debug!(
                version = migration.version,
                description = migration.description,
                "Migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );

        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.sql).map_err(|e| {
            CatalogError::Other(format!("Migration {} failed: {}", migration.version, e))
        })?;

        tx.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, datetime('now'))",
            rusqlite::params![migration.version, migration.description],
        )?;

        tx.commit()?;

        // Column additions run outside the transaction (ALTER TABLE commits implicitly)
        for (table, column, col_type) in migration.add_columns {
            add_column_if_not_exists(conn, table, column, col_type)?;
        }

        applied_count += 1;
    }

    Ok(applied_count)
}

/// Get list of applied migrations with their timestamps.
pub fn get_migration_history(conn: &Connection) -> Result<Vec<(MigrationVersion, String, String)>> {
    init_migrations_table(conn)?;

    let mut stmt = conn.prepare(
        "SELECT version, description, applied_at FROM schema_migrations ORDER BY version",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Check if the schema needs migration.
pub fn needs_migration(conn: &Connection) -> Result<bool> {
    let current = get_schema_version(conn)?;
    let migrations = all_migrations();
    let latest = migrations.last().map(|m| m.version).unwrap_or(0);
    Ok(current < latest)
}
