//! SQLite-backed identity store and recognition log.
//!
//! Timestamps are stored as UTC milliseconds since the epoch.

use chrono::{DateTime, TimeZone, Utc};
use custos_core::{Identity, IdentityStore, NewIdentity, RecognitionEvent, StoreError};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS identities (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        national_id TEXT NOT NULL UNIQUE,
        email       TEXT NOT NULL,
        enrolled_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS identity_samples (
        identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
        position    INTEGER NOT NULL,
        path        TEXT NOT NULL,
        PRIMARY KEY (identity_id, position)
    );

    CREATE TABLE IF NOT EXISTS recognitions (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        identity_id INTEGER NOT NULL REFERENCES identities(id),
        name        TEXT NOT NULL,
        national_id TEXT NOT NULL,
        email       TEXT NOT NULL,
        confidence  REAL NOT NULL,
        sample_path TEXT NOT NULL,
        occurred_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS recognitions_occurred_at ON recognitions(occurred_at);
";

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "opened identity database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self { conn })
    }

    fn sample_paths(&self, identity_id: i64) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path FROM identity_samples WHERE identity_id = ?1 ORDER BY position")?;
        let paths = stmt.query_map([identity_id], |row| row.get(0))?;
        paths.collect()
    }

    fn identity_from_row(&self, row: &Row<'_>) -> rusqlite::Result<Identity> {
        let id: i64 = row.get(0)?;
        Ok(Identity {
            id,
            name: row.get(1)?,
            national_id: row.get(2)?,
            email: row.get(3)?,
            sample_paths: self.sample_paths(id)?,
            enrolled_at: from_millis(row.get(4)?)?,
        })
    }
}

impl IdentityStore for SqliteStore {
    fn exists_by_national_id(&self, national_id: &str) -> Result<bool, StoreError> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM identities WHERE national_id = ?1)",
                [national_id],
                |row| row.get(0),
            )
            .map_err(backend)
    }

    fn enroll(&mut self, identity: NewIdentity) -> Result<Identity, StoreError> {
        let enrolled_at = Utc::now();
        // Write lock is held from the uniqueness check through the insert.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM identities WHERE national_id = ?1)",
                [&identity.national_id],
                |row| row.get(0),
            )
            .map_err(backend)?;
        if exists {
            return Err(StoreError::DuplicateIdentity(identity.national_id));
        }

        let inserted = tx.execute(
            "INSERT INTO identities (name, national_id, email, enrolled_at) VALUES (?1, ?2, ?3, ?4)",
            params![identity.name, identity.national_id, identity.email, to_millis(enrolled_at)],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::DuplicateIdentity(identity.national_id));
            }
            Err(e) => return Err(backend(e)),
        }
        let id = tx.last_insert_rowid();

        for (position, path) in identity.sample_paths.iter().enumerate() {
            tx.execute(
                "INSERT INTO identity_samples (identity_id, position, path) VALUES (?1, ?2, ?3)",
                params![id, position as i64, path],
            )
            .map_err(backend)?;
        }
        tx.commit().map_err(backend)?;

        tracing::info!(id, national_id = %identity.national_id, "identity enrolled");
        Ok(Identity {
            id,
            name: identity.name,
            national_id: identity.national_id,
            email: identity.email,
            sample_paths: identity.sample_paths,
            // Round-trip through the stored precision.
            enrolled_at: from_millis(to_millis(enrolled_at)).map_err(backend)?,
        })
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Identity>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, national_id, email, enrolled_at FROM identities WHERE id = ?1",
                [id],
                |row| self.identity_from_row(row),
            )
            .optional()
            .map_err(backend)
    }

    fn record_recognition(
        &mut self,
        identity_id: i64,
        confidence: f32,
        sample_path: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<RecognitionEvent>, StoreError> {
        let Some(identity) = self.find_by_id(identity_id)? else {
            return Ok(None);
        };
        let occurred_at = from_millis(to_millis(occurred_at)).map_err(backend)?;
        let event = RecognitionEvent::for_identity(&identity, confidence, sample_path.to_string(), occurred_at);

        self.conn
            .execute(
                "INSERT INTO recognitions
                     (identity_id, name, national_id, email, confidence, sample_path, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.identity_id,
                    event.name,
                    event.national_id,
                    event.email,
                    event.confidence as f64,
                    event.sample_path,
                    to_millis(event.occurred_at),
                ],
            )
            .map_err(backend)?;
        Ok(Some(event))
    }

    fn recognitions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecognitionEvent>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT identity_id, name, national_id, email, confidence, sample_path, occurred_at
                 FROM recognitions
                 WHERE occurred_at BETWEEN ?1 AND ?2
                 ORDER BY occurred_at, id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![to_millis(start), to_millis(end)], |row| {
                Ok(RecognitionEvent {
                    identity_id: row.get(0)?,
                    name: row.get(1)?,
                    national_id: row.get(2)?,
                    email: row.get(3)?,
                    confidence: row.get::<_, f64>(4)? as f32,
                    sample_path: row.get(5)?,
                    occurred_at: from_millis(row.get(6)?)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, national_id, email, enrolled_at FROM identities ORDER BY id")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| self.identity_from_row(row))
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_identity(national_id: &str) -> NewIdentity {
        NewIdentity {
            name: "Ana Souza".into(),
            national_id: national_id.into(),
            email: "ana@example.com".into(),
            sample_paths: vec![format!("faces/{national_id}.png")],
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_enroll_assigns_sequential_ids() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let first = store.enroll(new_identity("111")).unwrap();
        let second = store.enroll(new_identity("222")).unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert!(store.exists_by_national_id("111").unwrap());
        assert!(!store.exists_by_national_id("333").unwrap());

        let found = store.find_by_id(2).unwrap().unwrap();
        assert_eq!(found, second);
        assert_eq!(found.sample_paths, vec!["faces/222.png".to_string()]);
    }

    #[test]
    fn test_duplicate_national_id_rejected() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.enroll(new_identity("52998224725")).unwrap();
        let err = store.enroll(new_identity("52998224725")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(ref id) if id == "52998224725"));
        assert_eq!(store.identities().unwrap().len(), 1);
        assert!(store
            .recognitions_in_range(at(0), Utc::now() + Duration::days(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_identity_records_nothing() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.find_by_id(42).unwrap(), None);
        assert_eq!(store.record_recognition(42, 90.0, "x.png", at(1_000)).unwrap(), None);
        assert!(store.recognitions_in_range(at(0), at(10_000)).unwrap().is_empty());
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let id = store.enroll(new_identity("111")).unwrap().id;
        for ms in [3_000, 1_000, 2_000, 5_000] {
            store.record_recognition(id, 85.5, "r.png", at(ms)).unwrap().unwrap();
        }

        let events = store.recognitions_in_range(at(1_000), at(3_000)).unwrap();
        let times: Vec<i64> = events.iter().map(|e| e.occurred_at.timestamp_millis()).collect();
        assert_eq!(times, vec![1_000, 2_000, 3_000]);
        assert_eq!(events[0].national_id, "111");
        assert_eq!(events[0].confidence, 85.5);
    }

    #[test]
    fn test_event_keeps_identity_fields() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let identity = store.enroll(new_identity("111")).unwrap();
        let event = store
            .record_recognition(identity.id, 91.0, "recognitions/a.png", at(1_234))
            .unwrap()
            .unwrap();
        assert_eq!(event, RecognitionEvent::for_identity(&identity, 91.0, "recognitions/a.png".into(), at(1_234)));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("custos.sqlite3");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.enroll(new_identity("111")).unwrap();
        }
        let mut store = SqliteStore::open(&path).unwrap();
        assert!(store.exists_by_national_id("111").unwrap());
        assert_eq!(store.enroll(new_identity("222")).unwrap().id, 2);
    }

    #[test]
    fn test_concurrent_enrollment_rechecks_at_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custos.db");
        let mut terminal_a = SqliteStore::open(&path).unwrap();
        let mut terminal_b = SqliteStore::open(&path).unwrap();

        assert!(!terminal_a.exists_by_national_id("52998224725").unwrap());
        terminal_b.enroll(new_identity("52998224725")).unwrap();

        let err = terminal_a.enroll(new_identity("52998224725")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(ref id) if id == "52998224725"));
        assert_eq!(terminal_a.identities().unwrap().len(), 1);
        assert_eq!(terminal_b.identities().unwrap().len(), 1);
    }

    #[test]
    fn test_only_unique_constraint_counts_as_duplicate() {
        let store = SqliteStore::open_in_memory().unwrap();
        let insert = "INSERT INTO identities (name, national_id, email, enrolled_at) VALUES (?1, ?2, ?3, 0)";
        store.conn.execute(insert, params!["a", "111", "a@example.com"]).unwrap();

        let duplicate = store
            .conn
            .execute(insert, params!["b", "111", "b@example.com"])
            .unwrap_err();
        assert!(is_unique_violation(&duplicate));

        let missing_name = store
            .conn
            .execute(insert, params![Option::<String>::None, "222", "c@example.com"])
            .unwrap_err();
        assert!(!is_unique_violation(&missing_name));

        let orphan = store
            .conn
            .execute(
                "INSERT INTO identity_samples (identity_id, position, path) VALUES (99, 0, 'x.png')",
                [],
            )
            .unwrap_err();
        assert!(!is_unique_violation(&orphan));
    }
}
