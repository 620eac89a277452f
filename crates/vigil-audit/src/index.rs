use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, Row};
use vigil_core::{
    EntityKind, EntryId, FastIndex, IndexRecord, PartitionKey, SessionId, SubjectId, Timestamp,
    VigilError, VigilResult,
};

fn entity_str(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Decision => "decision",
        EntityKind::Override => "override",
        EntityKind::Escalation => "escalation",
        EntityKind::System => "system",
    }
}

fn entity_from_str(s: &str) -> VigilResult<EntityKind> {
    match s {
        "decision" => Ok(EntityKind::Decision),
        "override" => Ok(EntityKind::Override),
        "escalation" => Ok(EntityKind::Escalation),
        "system" => Ok(EntityKind::System),
        other => Err(VigilError::Storage(format!("unknown entity kind '{}'", other))),
    }
}

/// SQLite-backed fast index.
///
/// Holds denormalized lookup rows derived from the immutable log. Rows are
/// keyed by (entity, id) and upserts are idempotent, so reconciliation and
/// concurrent writers converge on the same state. The index carries no
/// authority: any row can be rebuilt from the log.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    pub fn open(path: &str) -> VigilResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| VigilError::Storage(format!("failed to open index database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS index_records (
                entity TEXT NOT NULL,
                id TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                environment TEXT NOT NULL,
                partition_date TEXT NOT NULL,
                event_id TEXT,
                subject_id TEXT,
                session_id TEXT,
                recorded_at INTEGER NOT NULL,
                expires_at INTEGER,
                entry_json TEXT NOT NULL,
                PRIMARY KEY (entity, id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_event
                ON index_records (entity, event_id);
            CREATE INDEX IF NOT EXISTS idx_records_subject
                ON index_records (subject_id, recorded_at);
            CREATE INDEX IF NOT EXISTS idx_records_session
                ON index_records (session_id, recorded_at);",
        )
        .map_err(|e| VigilError::Storage(format!("failed to create index tables: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for tests).
    pub fn in_memory() -> VigilResult<Self> {
        Self::open(":memory:")
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(String, IndexRecord)> {
        let entity_text: String = row.get(0)?;
        let expires: Option<i64> = row.get(9)?;
        let record = IndexRecord {
            // Placeholder; replaced after entity_from_str below.
            entity: EntityKind::System,
            id: row.get(1)?,
            entry_id: EntryId::new(row.get::<_, String>(2)?),
            partition: PartitionKey::new(row.get::<_, String>(3)?, row.get::<_, String>(4)?),
            event_id: row.get(5)?,
            subject_id: row.get::<_, Option<String>>(6)?.map(SubjectId::new),
            session_id: row.get::<_, Option<String>>(7)?.map(SessionId::new),
            recorded_at: Timestamp::from_seconds(row.get::<_, i64>(8)? as u64),
            expires_at: expires.map(|s| Timestamp::from_seconds(s as u64)),
            entry_json: row.get(10)?,
        };
        Ok((entity_text, record))
    }

    fn query_records(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> VigilResult<Vec<IndexRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| VigilError::Storage(format!("index query prepare failed: {}", e)))?;
        let rows = stmt
            .query_map(args, Self::row_to_record)
            .map_err(|e| VigilError::Storage(format!("index query failed: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let (entity_text, mut record) =
                row.map_err(|e| VigilError::Storage(format!("index row failed: {}", e)))?;
            record.entity = entity_from_str(&entity_text)?;
            records.push(record);
        }
        Ok(records)
    }
}

const SELECT_COLUMNS: &str = "SELECT entity, id, entry_id, environment, partition_date, \
     event_id, subject_id, session_id, recorded_at, expires_at, entry_json \
     FROM index_records";

impl FastIndex for SqliteIndex {
    fn upsert(&self, record: &IndexRecord) -> VigilResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;

        conn.execute(
            "INSERT OR REPLACE INTO index_records
             (entity, id, entry_id, environment, partition_date, event_id,
              subject_id, session_id, recorded_at, expires_at, entry_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entity_str(record.entity),
                record.id,
                record.entry_id.as_str(),
                record.partition.environment,
                record.partition.date,
                record.event_id,
                record.subject_id.as_ref().map(|s| s.as_str()),
                record.session_id.as_ref().map(|s| s.as_str()),
                record.recorded_at.seconds_since_epoch as i64,
                record.expires_at.map(|t| t.seconds_since_epoch as i64),
                record.entry_json,
            ],
        )
        .map_err(|e| VigilError::Storage(format!("index upsert failed: {}", e)))?;

        Ok(())
    }

    fn get(&self, entity: EntityKind, id: &str) -> VigilResult<Option<IndexRecord>> {
        let sql = format!("{} WHERE entity = ?1 AND id = ?2", SELECT_COLUMNS);
        let mut records = self.query_records(&sql, &[&entity_str(entity), &id])?;
        Ok(records.pop())
    }

    fn get_by_event(&self, entity: EntityKind, event_id: &str) -> VigilResult<Option<IndexRecord>> {
        let sql = format!(
            "{} WHERE entity = ?1 AND event_id = ?2 ORDER BY recorded_at ASC LIMIT 1",
            SELECT_COLUMNS
        );
        let mut records = self.query_records(&sql, &[&entity_str(entity), &event_id])?;
        Ok(records.pop())
    }

    fn query_by_subject(
        &self,
        subject_id: &SubjectId,
        limit: usize,
    ) -> VigilResult<Vec<IndexRecord>> {
        let sql = format!(
            "{} WHERE subject_id = ?1 ORDER BY recorded_at DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        self.query_records(&sql, &[&subject_id.as_str(), &(limit as i64)])
    }

    fn query_by_session(&self, session_id: &SessionId) -> VigilResult<Vec<IndexRecord>> {
        let sql = format!(
            "{} WHERE session_id = ?1 ORDER BY recorded_at ASC",
            SELECT_COLUMNS
        );
        self.query_records(&sql, &[&session_id.as_str()])
    }

    fn purge_expired(&self, now: Timestamp) -> VigilResult<u64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;

        let purged = conn
            .execute(
                "DELETE FROM index_records
                 WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![now.seconds_since_epoch as i64],
            )
            .map_err(|e| VigilError::Storage(format!("index purge failed: {}", e)))?;

        Ok(purged as u64)
    }
}

/// In-memory fast index for tests.
#[derive(Default)]
pub struct MemoryIndex {
    records: Mutex<HashMap<(EntityKind, String), IndexRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FastIndex for MemoryIndex {
    fn upsert(&self, record: &IndexRecord) -> VigilResult<()> {
        self.records
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?
            .insert((record.entity, record.id.clone()), record.clone());
        Ok(())
    }

    fn get(&self, entity: EntityKind, id: &str) -> VigilResult<Option<IndexRecord>> {
        Ok(self
            .records
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?
            .get(&(entity, id.to_string()))
            .cloned())
    }

    fn get_by_event(&self, entity: EntityKind, event_id: &str) -> VigilResult<Option<IndexRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;
        let mut matches: Vec<&IndexRecord> = records
            .values()
            .filter(|r| r.entity == entity && r.event_id.as_deref() == Some(event_id))
            .collect();
        matches.sort_by_key(|r| r.recorded_at);
        Ok(matches.first().map(|r| (*r).clone()))
    }

    fn query_by_subject(
        &self,
        subject_id: &SubjectId,
        limit: usize,
    ) -> VigilResult<Vec<IndexRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;
        let mut matches: Vec<IndexRecord> = records
            .values()
            .filter(|r| r.subject_id.as_ref() == Some(subject_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matches.truncate(limit);
        Ok(matches)
    }

    fn query_by_session(&self, session_id: &SessionId) -> VigilResult<Vec<IndexRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;
        let mut matches: Vec<IndexRecord> = records
            .values()
            .filter(|r| r.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect();
        matches.sort_by_key(|r| r.recorded_at);
        Ok(matches)
    }

    fn purge_expired(&self, now: Timestamp) -> VigilResult<u64> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| VigilError::Storage(format!("index lock poisoned: {}", e)))?;
        let before = records.len();
        records.retain(|_, r| match r.expires_at {
            Some(expiry) => expiry >= now,
            None => true,
        });
        Ok((before - records.len()) as u64)
    }
}
