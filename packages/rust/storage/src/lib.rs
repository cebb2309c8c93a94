//! libSQL-backed cache of registry lookups.
//!
//! The [`CacheStore`] struct wraps one embedded database connection for the
//! lifetime of the process. It persists two things:
//! - enriched [`Record`]s keyed by identifier
//! - the set of identifiers already looked up, including those that yielded nothing

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use regenrich_shared::{EnrichError, Identifier, Record, Result};

/// Primary cache handle wrapping a libSQL database.
pub struct CacheStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// Row counts reported by [`CacheStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Identifiers with a cached record.
    pub records: u64,
    /// Identifiers attempted, with or without a record.
    pub attempted: u64,
}

fn cache_err(e: impl std::fmt::Display) -> EnrichError {
    EnrichError::Cache(e.to_string())
}

impl CacheStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EnrichError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(cache_err)?;

        let conn = db.connect().map_err(cache_err)?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        tracing::debug!(path = %path.display(), "cache opened");
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    EnrichError::Cache(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Every cached record, ordered by identifier.
    pub async fn get_all_records(&self) -> Result<Vec<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT identifier, contact, finances, secondary_id, ceo
                 FROM records ORDER BY identifier",
                params![],
            )
            .await
            .map_err(cache_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(cache_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Insert or replace the record for its identifier. Last write wins.
    pub async fn put_record(&self, record: &Record) -> Result<()> {
        put_record_on(&self.conn, record).await
    }

    // -----------------------------------------------------------------------
    // Attempted identifiers
    // -----------------------------------------------------------------------

    /// Identifiers with a cached record plus those marked attempted.
    pub async fn get_attempted_ids(&self) -> Result<HashSet<Identifier>> {
        let mut rows = self
            .conn
            .query(
                "SELECT identifier FROM records
                 UNION
                 SELECT identifier FROM attempted_identifiers",
                params![],
            )
            .await
            .map_err(cache_err)?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await.map_err(cache_err)? {
            let raw: String = row.get(0).map_err(cache_err)?;
            match Identifier::parse(&raw) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => tracing::warn!(identifier = %raw, "ignoring malformed cached identifier"),
            }
        }
        Ok(ids)
    }

    /// Record that `id` was looked up. Idempotent.
    pub async fn mark_attempted(&self, id: &Identifier) -> Result<()> {
        mark_attempted_on(&self.conn, id).await
    }

    /// Persist one wave: upsert every record and mark every identifier attempted,
    /// committed as a single transaction.
    pub async fn persist_wave(&self, records: &[Record], attempted: &[Identifier]) -> Result<()> {
        let tx = self.conn.transaction().await.map_err(cache_err)?;
        for record in records {
            put_record_on(&tx, record).await?;
        }
        for id in attempted {
            mark_attempted_on(&tx, id).await?;
        }
        tx.commit().await.map_err(cache_err)?;

        tracing::debug!(
            records = records.len(),
            attempted = attempted.len(),
            "wave persisted"
        );
        Ok(())
    }

    /// Row counts for both tables.
    pub async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            records: self.count("SELECT COUNT(*) FROM records").await?,
            attempted: self
                .count(
                    "SELECT COUNT(*) FROM (
                       SELECT identifier FROM records
                       UNION
                       SELECT identifier FROM attempted_identifiers
                     )",
                )
                .await?,
        })
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(cache_err)?;
        match rows.next().await.map_err(cache_err)? {
            Some(row) => {
                let n = row.get::<i64>(0).map_err(cache_err)?;
                Ok(u64::try_from(n).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}

async fn put_record_on(conn: &Connection, record: &Record) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO records (identifier, contact, finances, secondary_id, ceo, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(identifier) DO UPDATE SET
           contact = excluded.contact,
           finances = excluded.finances,
           secondary_id = excluded.secondary_id,
           ceo = excluded.ceo,
           fetched_at = excluded.fetched_at",
        params![
            record.identifier.as_str(),
            record.contact.as_str(),
            record.finances.as_str(),
            record.secondary_id.as_deref(),
            record.ceo.as_deref(),
            now.as_str(),
        ],
    )
    .await
    .map_err(cache_err)?;
    Ok(())
}

async fn mark_attempted_on(conn: &Connection, id: &Identifier) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO attempted_identifiers (identifier, attempted_at) VALUES (?1, ?2)
         ON CONFLICT(identifier) DO UPDATE SET attempted_at = excluded.attempted_at",
        params![id.as_str(), now.as_str()],
    )
    .await
    .map_err(cache_err)?;
    Ok(())
}

/// Convert a database row to a [`Record`].
fn row_to_record(row: &libsql::Row) -> Result<Record> {
    let raw: String = row.get(0).map_err(cache_err)?;
    Ok(Record {
        identifier: Identifier::parse(&raw)
            .map_err(|e| EnrichError::Cache(format!("corrupt cached identifier: {e}")))?,
        contact: row.get::<String>(1).map_err(cache_err)?,
        finances: row.get::<String>(2).map_err(cache_err)?,
        secondary_id: row.get::<String>(3).ok(),
        ceo: row.get::<String>(4).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> CacheStore {
        let tmp = std::env::temp_dir().join(format!("regenrich_test_{}.db", Uuid::now_v7()));
        CacheStore::open(&tmp).await.expect("open test db")
    }

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn sample_record(raw: &str) -> Record {
        Record {
            identifier: id(raw),
            contact: "+7 495 000-00-00".into(),
            finances: "Revenue: 500 thousand currency units, Year: 2023".into(),
            secondary_id: Some("7700000000".into()),
            ceo: Some("Иванов Иван Иванович".into()),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("regenrich_test_{}.db", Uuid::now_v7()));
        let first = CacheStore::open(&tmp).await.expect("first open");
        drop(first);
        let second = CacheStore::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn record_roundtrip() {
        let store = test_store().await;
        let record = sample_record("1027700132195");
        store.put_record(&record).await.expect("put record");

        let all = store.get_all_records().await.expect("get all");
        assert_eq!(all, vec![record]);
    }

    #[tokio::test]
    async fn record_without_optionals_roundtrip() {
        let store = test_store().await;
        let record = Record {
            identifier: id("304500116000157"),
            contact: String::new(),
            finances: String::new(),
            secondary_id: None,
            ceo: None,
        };
        store.put_record(&record).await.unwrap();
        assert_eq!(store.get_all_records().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn put_record_replaces_on_conflict() {
        let store = test_store().await;
        store.put_record(&sample_record("1027700132195")).await.unwrap();

        let replacement = Record {
            contact: "info@example.com".into(),
            ceo: None,
            ..sample_record("1027700132195")
        };
        store.put_record(&replacement).await.unwrap();

        let all = store.get_all_records().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].contact, "info@example.com");
        assert_eq!(all[0].ceo, None);
    }

    #[tokio::test]
    async fn attempted_set_includes_records_and_marks() {
        let store = test_store().await;
        store.put_record(&sample_record("1027700132195")).await.unwrap();
        store.mark_attempted(&id("1037739010891")).await.unwrap();
        store.mark_attempted(&id("1037739010891")).await.unwrap();

        let attempted = store.get_attempted_ids().await.unwrap();
        assert_eq!(attempted.len(), 2);
        assert!(attempted.contains(&id("1027700132195")));
        assert!(attempted.contains(&id("1037739010891")));
    }

    #[tokio::test]
    async fn persist_wave_writes_both_tables() {
        let store = test_store().await;
        let records = vec![sample_record("1027700132195")];
        let attempted = vec![id("1027700132195"), id("1037739010891")];
        store.persist_wave(&records, &attempted).await.expect("persist");

        assert_eq!(
            store.stats().await.unwrap(),
            CacheStats {
                records: 1,
                attempted: 2
            }
        );
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let tmp = std::env::temp_dir().join(format!("regenrich_test_{}.db", Uuid::now_v7()));
        let store = CacheStore::open(&tmp).await.unwrap();
        store
            .persist_wave(&[sample_record("1027700132195")], &[id("1027700132195")])
            .await
            .unwrap();
        drop(store);

        let reopened = CacheStore::open(&tmp).await.unwrap();
        assert_eq!(reopened.get_all_records().await.unwrap().len(), 1);
        assert!(
            reopened
                .get_attempted_ids()
                .await
                .unwrap()
                .contains(&id("1027700132195"))
        );
    }
}
