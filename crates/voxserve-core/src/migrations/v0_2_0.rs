//! Migration v0.2.0: owner-scoped dataset names, per-grant write flag.
//!
//! Two different owners may use the same dataset name; within one owner
//! the name stays unique. The share table gains a `can_write` flag next
//! to the existing `can_read`.

use super::Migration;

/// Version number: 2_000 represents v0.2.0
/// Format: MAJOR * 1_000_000 + MINOR * 1_000 + PATCH
pub const VERSION: i64 = 2_000;

/// SQLite doesn't support IF NOT EXISTS for ADD COLUMN, so the column
/// goes through the framework helper.
const ADD_COLUMNS: &[(&str, &str, &str)] =
    &[("shares", "can_write", "INTEGER NOT NULL DEFAULT 0")];

pub fn migration() -> Migration {
    Migration {
        version: VERSION,
        description: "v0.2.0: owner-scoped dataset names, per-grant write flag",
        sql: SQL,
        add_columns: ADD_COLUMNS,
    }
}

const SQL: &str = r#"
DROP INDEX IF EXISTS idx_datasets_name;
CREATE UNIQUE INDEX IF NOT EXISTS idx_datasets_name_owner ON datasets(name, owner_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use rusqlite::Connection;

    #[test]
    fn test_migration_version() {
        assert_eq!(VERSION, 2_000);
    }

    #[test]
    fn test_name_uniqueness_is_owner_scoped() {
        let conn = Connection::open_in_memory().unwrap();
        crate::init_sqlite_schema(&conn).unwrap();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO users (id, name, credential, manager, updated_at)
            VALUES ('u1', 'One', 'x', 0, datetime('now')),
                   ('u2', 'Two', 'x', 0, datetime('now'));
            "#,
        )
        .unwrap();

        let insert = "INSERT INTO datasets (name, path, description, owner_id, public, updated_at)
                      VALUES (?1, ?2, '', ?3, 0, datetime('now'))";

        // Same name under two different owners is fine
        conn.execute(insert, ["stack", "/a.xml", "u1"]).unwrap();
        conn.execute(insert, ["stack", "/b.xml", "u2"]).unwrap();

        // Same name under the same owner violates the unique index
        assert!(conn.execute(insert, ["stack", "/c.xml", "u1"]).is_err());
    }
}
