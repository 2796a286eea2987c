//! Migration v0.1.0: baseline uniqueness constraints.
//!
//! The first deployed schema revision enforced globally unique dataset
//! names. Superseded by v0.2.0, which scopes uniqueness to the owner.

use super::Migration;

/// Version number: 1_000 represents v0.1.0
/// Format: MAJOR * 1_000_000 + MINOR * 1_000 + PATCH
pub const VERSION: i64 = 1_000;

pub fn migration() -> Migration {
    Migration {
        version: VERSION,
        description: "v0.1.0: globally unique dataset names",
        sql: SQL,
        add_columns: &[],
    }
}

const SQL: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_datasets_name ON datasets(name);
"#;
