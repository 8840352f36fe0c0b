//! SQLite-backed progress journal implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use crate::ticket::{Ticket, TicketKind};

use super::{ProgressFilter, ProgressRecord, ProgressStore, StoreError, WorkflowState};

const SELECT_COLUMNS: &str =
    "SELECT ticket_id, ticket_number, kind, state, release_attempts, created_at, updated_at FROM progress";

/// SQLite-backed progress journal.
pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    /// Create a new journal, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory journal (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS progress (
                ticket_id TEXT PRIMARY KEY,
                ticket_number TEXT NOT NULL,
                kind TEXT NOT NULL,
                state TEXT NOT NULL,
                release_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_progress_updated_at ON progress(updated_at);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &ProgressFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref state) = filter.state {
            // State is stored as tagged JSON; filter on its "type" field.
            conditions.push("json_extract(state, '$.type') = ?");
            params.push(Box::new(state.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ProgressRecord> {
        let ticket_id: String = row.get(0)?;
        let ticket_number: String = row.get(1)?;
        let kind_str: String = row.get(2)?;
        let state_json: String = row.get(3)?;
        let release_attempts: u32 = row.get(4)?;
        let created_at_str: String = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        let kind = TicketKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown ticket kind: {}", kind_str).into(),
            )
        })?;

        // The state is the release marker; a record we cannot read must not be
        // mistaken for a fresh one.
        let state: WorkflowState = serde_json::from_str(&state_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

        let created_at = parse_timestamp(&created_at_str);
        let updated_at = parse_timestamp(&updated_at_str);

        Ok(ProgressRecord {
            ticket_id,
            ticket_number,
            kind,
            state,
            release_attempts,
            created_at,
            updated_at,
        })
    }

    fn fetch(conn: &Connection, ticket_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let result = conn.query_row(
            &format!("{} WHERE ticket_id = ?", SELECT_COLUMNS),
            params![ticket_id],
            Self::row_to_record,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e.to_string())),
        }
    }

    fn write_state(
        conn: &Connection,
        current: ProgressRecord,
        next: WorkflowState,
    ) -> Result<ProgressRecord, StoreError> {
        let now = Utc::now();
        let release_attempts = if matches!(next, WorkflowState::Releasing { attempt, .. } if attempt > 0)
        {
            current.release_attempts + 1
        } else {
            current.release_attempts
        };
        let state_json =
            serde_json::to_string(&next).map_err(|e| StoreError::Database(e.to_string()))?;

        conn.execute(
            "UPDATE progress SET state = ?, release_attempts = ?, updated_at = ? WHERE ticket_id = ?",
            params![state_json, release_attempts, now.to_rfc3339(), current.ticket_id],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(ProgressRecord {
            state: next,
            release_attempts,
            updated_at: now,
            ..current
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl ProgressStore for SqliteProgressStore {
    fn begin(&self, ticket: &Ticket) -> Result<ProgressRecord, StoreError> {
        let conn = self.lock()?;

        if let Some(existing) = Self::fetch(&conn, &ticket.id)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let state = WorkflowState::New;
        let state_json =
            serde_json::to_string(&state).map_err(|e| StoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO progress (ticket_id, ticket_number, kind, state, release_attempts, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                ticket.id,
                ticket.number,
                ticket.kind.as_str(),
                state_json,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(ProgressRecord {
            ticket_id: ticket.id.clone(),
            ticket_number: ticket.number.clone(),
            kind: ticket.kind,
            state,
            release_attempts: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, ticket_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
        let conn = self.lock()?;
        Self::fetch(&conn, ticket_id)
    }

    fn transition(
        &self,
        ticket_id: &str,
        next: WorkflowState,
    ) -> Result<ProgressRecord, StoreError> {
        let conn = self.lock()?;

        let current = Self::fetch(&conn, ticket_id)?
            .ok_or_else(|| StoreError::NotFound(ticket_id.to_string()))?;

        if !current.state.can_transition_to(&next) {
            return Err(StoreError::InvalidTransition {
                ticket_id: ticket_id.to_string(),
                from: current.state.state_type().to_string(),
                to: next.state_type().to_string(),
            });
        }

        Self::write_state(&conn, current, next)
    }

    fn list(&self, filter: &ProgressFilter) -> Result<Vec<ProgressRecord>, StoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "{} {} ORDER BY updated_at DESC, ticket_id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        // Build parameter slice with limit and offset
        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let record = row_result.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(record);
        }

        Ok(records)
    }

    fn count(&self, filter: &ProgressFilter) -> Result<i64, StoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM progress {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count)
    }

    fn counts_by_state(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT json_extract(state, '$.type') AS state_type, COUNT(*) FROM progress GROUP BY state_type",
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut counts = BTreeMap::new();
        for row_result in rows {
            let (state_type, count) = row_result.map_err(|e| StoreError::Database(e.to_string()))?;
            counts.insert(state_type, count.max(0) as u64);
        }

        Ok(counts)
    }

    fn reset_for_retry(&self, ticket_id: &str) -> Result<ProgressRecord, StoreError> {
        let conn = self.lock()?;

        let current = Self::fetch(&conn, ticket_id)?
            .ok_or_else(|| StoreError::NotFound(ticket_id.to_string()))?;

        let Some(next) = current.state.retry_state() else {
            return Err(StoreError::InvalidTransition {
                ticket_id: ticket_id.to_string(),
                from: current.state.state_type().to_string(),
                to: "retry".to_string(),
            });
        };

        Self::write_state(&conn, current, next)
    }
}
