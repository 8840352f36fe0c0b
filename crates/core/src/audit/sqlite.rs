use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

/// SQLite-backed audit store.
///
/// Shares the database file with the progress journal, so writes wait on the
/// file lock instead of failing with `SQLITE_BUSY`.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Create a new SQLite audit store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                ticket_id TEXT,
                actor TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_ticket_id ON audit_events(ticket_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref ticket_id) = filter.ticket_id {
            conditions.push("ticket_id = ?");
            params.push(Box::new(ticket_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(ref actor) = filter.actor {
            conditions.push("actor = ?");
            params.push(Box::new(actor.clone()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(from.to_rfc3339()));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(to.to_rfc3339()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let data_json = serde_json::to_string(&record.data)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, ticket_id, actor, data) VALUES (?, ?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.ticket_id,
                record.actor,
                data_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        // id breaks ties between events written in the same instant
        let sql = format!(
            "SELECT id, timestamp, event_type, ticket_id, actor, data FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row_result in rows {
            let (id, timestamp_str, event_type, ticket_id, actor, data_json) = row_result?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
                .into();

            let data: AuditEvent = serde_json::from_str(&data_json)?;

            records.push(AuditRecord {
                id,
                timestamp,
                event_type,
                ticket_id,
                actor,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn record(event: AuditEvent, timestamp: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            ticket_id: event.ticket_id().map(String::from),
            actor: event.actor().map(String::from),
            data: event,
        }
    }

    fn updated(ticket_id: &str) -> AuditEvent {
        AuditEvent::TicketUpdated {
            ticket_id: ticket_id.to_string(),
            outcome: "released".to_string(),
            detail: "Message released".to_string(),
        }
    }

    fn retry(ticket_id: &str, actor: &str) -> AuditEvent {
        AuditEvent::TicketRetryRequested {
            ticket_id: ticket_id.to_string(),
            requested_by: actor.to_string(),
            previous_state: "failed".to_string(),
            resume_state: "new".to_string(),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let id = store
            .insert(&record(
                AuditEvent::ServiceStarted {
                    version: "0.1.0".to_string(),
                    config_hash: "abc123".to_string(),
                },
                Utc::now(),
            ))
            .unwrap();
        assert!(id > 0);

        let results = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].event_type, "service_started");
    }

    #[test]
    fn test_query_by_ticket_event_type_and_actor() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let now = Utc::now();
        store.insert(&record(updated("t-1"), now)).unwrap();
        store.insert(&record(updated("t-2"), now)).unwrap();
        store.insert(&record(retry("t-1", "alice"), now)).unwrap();

        let by_ticket = store.query(&AuditFilter::new().with_ticket_id("t-1")).unwrap();
        assert_eq!(by_ticket.len(), 2);

        let by_type = store
            .query(&AuditFilter::new().with_event_type("ticket_updated"))
            .unwrap();
        assert_eq!(by_type.len(), 2);

        let by_actor = store.query(&AuditFilter::new().with_actor("alice")).unwrap();
        assert_eq!(by_actor.len(), 1);
        assert_eq!(by_actor[0].actor.as_deref(), Some("alice"));
    }

    #[test]
    fn test_query_time_range_and_order() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .insert(&record(updated("old"), now - ChronoDuration::hours(2)))
            .unwrap();
        store.insert(&record(updated("new"), now)).unwrap();

        let all = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(all[0].ticket_id.as_deref(), Some("new"));

        let recent = store
            .query(&AuditFilter::new().with_time_range(Some(now - ChronoDuration::hours(1)), None))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ticket_id.as_deref(), Some("new"));
    }

    #[test]
    fn test_pagination_and_count() {
        let store = SqliteAuditStore::in_memory().unwrap();
        for i in 0..5 {
            store
                .insert(&record(updated(&format!("t-{}", i)), Utc::now()))
                .unwrap();
        }

        let page = store
            .query(&AuditFilter::new().with_limit(2).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 5);
        assert_eq!(
            store
                .count(&AuditFilter::new().with_ticket_id("t-3"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_event_data_round_trips() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let event = AuditEvent::ReleaseFailed {
            ticket_id: "t-1".to_string(),
            guid: "g-1".to_string(),
            attempt: 3,
            error_kind: "gateway_unavailable".to_string(),
            detail: "503".to_string(),
            will_retry: false,
        };
        store.insert(&record(event.clone(), Utc::now())).unwrap();

        let results = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(results[0].data, event);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.db");
        {
            let store = SqliteAuditStore::new(&path).unwrap();
            store.insert(&record(updated("t-1"), Utc::now())).unwrap();
        }
        let store = SqliteAuditStore::new(&path).unwrap();
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 1);
    }
}
