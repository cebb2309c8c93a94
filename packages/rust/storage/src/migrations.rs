//! SQL migration definitions for the cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: records, attempted_identifiers",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Enriched registry records, one per identifier
CREATE TABLE IF NOT EXISTS records (
    identifier   TEXT PRIMARY KEY,
    contact      TEXT NOT NULL,
    finances     TEXT NOT NULL,
    secondary_id TEXT,
    ceo          TEXT,
    fetched_at   TEXT NOT NULL
);

-- Identifiers already looked up, with or without a resulting record
CREATE TABLE IF NOT EXISTS attempted_identifiers (
    identifier   TEXT PRIMARY KEY,
    attempted_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
