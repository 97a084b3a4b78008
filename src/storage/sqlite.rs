//! SQLite storage backend

use super::traits::{OpenStore, RecordFilter, RecordStore, StorageError, StorageResult};
use crate::graph::{Identity, RecordKind, RecordSnapshot};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = "SELECT identity, type_name, kind, subtype, identity_json, \
    attributes_json, links_json, depth, discovered_at FROM records";

/// Raw column values of one `records` row
type Row = (String, String, String, String, String, String, String, i64, String);

/// SQLite-backed record store
///
/// One table keyed by identity; attributes and links are stored as JSON.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                identity TEXT PRIMARY KEY,
                type_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                subtype TEXT NOT NULL,
                identity_json TEXT NOT NULL,
                attributes_json TEXT NOT NULL,
                links_json TEXT NOT NULL,
                depth INTEGER NOT NULL,
                discovered_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_category
                ON records(kind, subtype);

            -- Readers are not blocked while a plugin's results are committed
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    }

    fn row_to_snapshot(row: Row) -> StorageResult<RecordSnapshot> {
        let (
            identity,
            type_name,
            kind,
            subtype,
            identity_json,
            attributes_json,
            links_json,
            depth,
            discovered_at,
        ) = row;
        let kind: RecordKind = kind.parse().map_err(StorageError::Corrupt)?;
        let depth = u32::try_from(depth)
            .map_err(|_| StorageError::Corrupt(format!("depth {} out of range", depth)))?;

        Ok(RecordSnapshot {
            identity: Identity::from_string(identity),
            type_name,
            kind,
            subtype,
            identity_attributes: serde_json::from_str(&identity_json)?,
            attributes: serde_json::from_str(&attributes_json)?,
            links: serde_json::from_str(&links_json)?,
            depth,
            discovered_at: DateTime::parse_from_rfc3339(&discovered_at)
                .map_err(|e| StorageError::DateParse(e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    /// WHERE clause and parameters for a filter
    fn filter_clause(filter: &RecordFilter) -> StorageResult<(String, Vec<String>)> {
        filter.validate()?;
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(kind) = filter.kind {
            clauses.push("kind = ?");
            values.push(kind.as_str().to_string());
        }
        if let Some(ref subtype) = filter.subtype {
            clauses.push("subtype = ?");
            values.push(subtype.clone());
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, values))
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, identity: &Identity) -> StorageResult<Option<RecordSnapshot>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{} WHERE identity = ?1", SELECT_COLUMNS),
                params![identity.as_str()],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::row_to_snapshot).transpose()
    }

    fn get_many(&self, identities: &[Identity]) -> StorageResult<Vec<RecordSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} WHERE identity = ?1", SELECT_COLUMNS))?;

        let mut snapshots = Vec::new();
        for identity in identities {
            if let Some(row) = stmt
                .query_row(params![identity.as_str()], Self::read_row)
                .optional()?
            {
                snapshots.push(Self::row_to_snapshot(row)?);
            }
        }
        Ok(snapshots)
    }

    fn add_many(&self, records: &[RecordSnapshot]) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO records (identity, type_name, kind, subtype, identity_json, attributes_json, links_json, depth, discovered_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(identity) DO UPDATE SET
                    type_name = excluded.type_name,
                    kind = excluded.kind,
                    subtype = excluded.subtype,
                    identity_json = excluded.identity_json,
                    attributes_json = excluded.attributes_json,
                    links_json = excluded.links_json,
                    depth = excluded.depth,
                    discovered_at = excluded.discovered_at
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.identity.as_str(),
                    record.type_name,
                    record.kind.as_str(),
                    record.subtype,
                    serde_json::to_string(&record.identity_attributes)?,
                    serde_json::to_string(&record.attributes)?,
                    serde_json::to_string(&record.links)?,
                    i64::from(record.depth),
                    record.discovered_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn has(&self, identity: &Identity) -> StorageResult<bool> {
        let conn = self.lock()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE identity = ?1)",
            params![identity.as_str()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn remove(&self, identity: &Identity) -> StorageResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM records WHERE identity = ?1",
            params![identity.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn keys(&self, filter: &RecordFilter) -> StorageResult<Vec<Identity>> {
        let (clause, values) = Self::filter_clause(filter)?;
        let mut sql = format!("SELECT identity FROM records{} ORDER BY identity", clause);
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let keys = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .map(|id| id.map(Identity::from_string))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn count(&self, filter: &RecordFilter) -> StorageResult<usize> {
        let (clause, values) = Self::filter_clause(filter)?;
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM records{}", clause),
            rusqlite::params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AttrValue, LinkIndex, LinkTarget};
    use std::collections::BTreeMap;

    fn snapshot(id: &str, kind: RecordKind, subtype: &str) -> RecordSnapshot {
        let mut identity_attributes = BTreeMap::new();
        identity_attributes.insert("name".to_string(), AttrValue::from(id));
        let mut attributes = BTreeMap::new();
        attributes.insert("ports".to_string(), AttrValue::List(vec![AttrValue::Int(22)]));
        RecordSnapshot {
            identity: Identity::from(id),
            type_name: "Host".to_string(),
            kind,
            subtype: subtype.to_string(),
            identity_attributes,
            attributes,
            links: LinkIndex::new(),
            depth: 1,
            discovered_at: Utc::now(),
        }
    }

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let store = create_test_store();
        let mut record = snapshot("a", RecordKind::Resource, "host");
        record.links.insert(LinkTarget {
            identity: Identity::from("b"),
            kind: RecordKind::Information,
            subtype: "note".to_string(),
        });
        store.add_many(&[record.clone()]).unwrap();

        let loaded = store.get(&record.identity).unwrap().unwrap();
        assert_eq!(loaded.identity, record.identity);
        assert_eq!(loaded.attributes, record.attributes);
        assert_eq!(loaded.links, record.links);
        assert_eq!(loaded.depth, 1);
        assert!(store.get(&Identity::from("missing")).unwrap().is_none());
    }

    #[test]
    fn test_add_many_upserts() {
        let store = create_test_store();
        let mut record = snapshot("a", RecordKind::Resource, "host");
        store.add_many(&[record.clone()]).unwrap();
        record.depth = 0;
        store.add_many(&[record.clone()]).unwrap();

        assert_eq!(store.count(&RecordFilter::new()).unwrap(), 1);
        assert_eq!(store.get(&record.identity).unwrap().unwrap().depth, 0);
    }

    #[test]
    fn test_get_many_skips_missing() {
        let store = create_test_store();
        store
            .add_many(&[
                snapshot("a", RecordKind::Resource, "host"),
                snapshot("b", RecordKind::Resource, "host"),
            ])
            .unwrap();
        let found = store
            .get_many(&[Identity::from("a"), Identity::from("x"), Identity::from("b")])
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_keys_and_count_by_filter() {
        let store = create_test_store();
        store
            .add_many(&[
                snapshot("c", RecordKind::Resource, "host"),
                snapshot("a", RecordKind::Resource, "ip"),
                snapshot("b", RecordKind::Vulnerability, "xss"),
            ])
            .unwrap();

        let all = store.keys(&RecordFilter::new()).unwrap();
        assert_eq!(all, vec![Identity::from("a"), Identity::from("b"), Identity::from("c")]);

        let resources = RecordFilter::new().with_kind(RecordKind::Resource);
        assert_eq!(store.count(&resources).unwrap(), 2);

        let hosts = resources.clone().with_subtype("host");
        assert_eq!(store.keys(&hosts).unwrap(), vec![Identity::from("c")]);

        assert_eq!(store.keys(&RecordFilter::new().with_limit(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_subtype_without_kind_is_rejected() {
        let store = create_test_store();
        let err = store
            .count(&RecordFilter::new().with_subtype("host"))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidFilter(_)));
    }

    #[test]
    fn test_has_and_remove() {
        let store = create_test_store();
        let record = snapshot("a", RecordKind::Resource, "host");
        store.add_many(&[record.clone()]).unwrap();
        assert!(store.has(&record.identity).unwrap());
        assert!(store.remove(&record.identity).unwrap());
        assert!(!store.has(&record.identity).unwrap());
        assert!(!store.remove(&record.identity).unwrap());
    }

    #[test]
    fn test_wal_mode_enabled_at_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test-wal.db");
        let store = SqliteStore::open(&db_path).unwrap();

        let journal_mode: String = store
            .conn
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();

        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn test_reopen_sees_committed_records() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("audit.db");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.add_many(&[snapshot("a", RecordKind::Resource, "host")]).unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        assert!(store.has(&Identity::from("a")).unwrap());
    }
}
