use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    ActivityError, ActivityEvent, ActivityFilter, ActivityOutcome, ActivityRecord, ActivityStore,
};
use crate::rules::ActionKind;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS activity (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        instance TEXT NOT NULL,
        rule_id INTEGER,
        torrent_hash TEXT NOT NULL,
        action TEXT NOT NULL,
        outcome TEXT NOT NULL,
        detail TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity(timestamp);
    CREATE INDEX IF NOT EXISTS idx_activity_instance ON activity(instance);
    CREATE INDEX IF NOT EXISTS idx_activity_torrent_hash ON activity(torrent_hash);
    CREATE INDEX IF NOT EXISTS idx_activity_rule_id ON activity(rule_id);
"#;

/// SQLite-backed activity store
pub struct SqliteActivityStore {
    conn: Mutex<Connection>,
}

impl SqliteActivityStore {
    /// Open or create the database at `path`
    pub fn new(path: &Path) -> Result<Self, ActivityError> {
        let conn = Connection::open(path).map_err(|e| ActivityError::Database(e.to_string()))?;
        Self::init(conn)
    }

    /// In-memory store, for tests
    pub fn in_memory() -> Result<Self, ActivityError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ActivityError::Database(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ActivityError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| ActivityError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ActivityError> {
        self.conn
            .lock()
            .map_err(|_| ActivityError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &ActivityFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref instance) = filter.instance {
            conditions.push("instance = ?");
            params.push(Box::new(instance.clone()));
        }

        if let Some(rule_id) = filter.rule_id {
            conditions.push("rule_id = ?");
            params.push(Box::new(rule_id));
        }

        if let Some(ref hash) = filter.torrent_hash {
            conditions.push("torrent_hash = ?");
            params.push(Box::new(hash.to_lowercase()));
        }

        if let Some(action) = filter.action {
            conditions.push("action = ?");
            params.push(Box::new(action.as_str()));
        }

        if let Some(outcome) = filter.outcome {
            conditions.push("outcome = ?");
            params.push(Box::new(outcome.as_str()));
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

type Row = (
    i64,
    String,
    String,
    Option<i64>,
    String,
    String,
    String,
    Option<String>,
);

fn into_record(row: Row) -> Result<ActivityRecord, ActivityError> {
    let (id, timestamp, instance, rule_id, torrent_hash, action, outcome, detail) = row;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| ActivityError::InvalidValue(format!("timestamp: {}", e)))?
        .into();
    let action = ActionKind::parse(&action)
        .ok_or_else(|| ActivityError::InvalidValue(format!("action: {}", action)))?;
    let outcome = ActivityOutcome::parse(&outcome)
        .ok_or_else(|| ActivityError::InvalidValue(format!("outcome: {}", outcome)))?;

    Ok(ActivityRecord {
        id,
        timestamp,
        event: ActivityEvent {
            instance,
            rule_id,
            torrent_hash,
            action,
            outcome,
            detail,
        },
    })
}

impl ActivityStore for SqliteActivityStore {
    fn insert(&self, record: &ActivityRecord) -> Result<i64, ActivityError> {
        let conn = self.lock()?;
        let event = &record.event;

        conn.execute(
            "INSERT INTO activity (timestamp, instance, rule_id, torrent_hash, action, outcome, detail) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                event.instance,
                event.rule_id,
                event.torrent_hash.to_lowercase(),
                event.action.as_str(),
                event.outcome.as_str(),
                event.detail,
            ],
        )
        .map_err(|e| ActivityError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>, ActivityError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT id, timestamp, instance, rule_id, torrent_hash, action, outcome, detail FROM activity {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ActivityError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map_err(|e| ActivityError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let row: Row = row.map_err(|e| ActivityError::Database(e.to_string()))?;
            records.push(into_record(row)?);
        }

        Ok(records)
    }

    fn count(&self, filter: &ActivityFilter) -> Result<i64, ActivityError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM activity {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| ActivityError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> SqliteActivityStore {
        SqliteActivityStore::in_memory().unwrap()
    }

    fn record(instance: &str, rule_id: i64, hash: &str, action: ActionKind) -> ActivityRecord {
        ActivityRecord {
            id: 0,
            timestamp: Utc::now(),
            event: ActivityEvent::new(instance, Some(rule_id), hash, action, ActivityOutcome::Success),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = create_test_store();
        let mut failed = record("main", 1, "ABC", ActionKind::Delete);
        failed.event.outcome = ActivityOutcome::Failed;
        failed.event.detail = Some("connection refused".to_string());

        let id = store.insert(&failed).unwrap();
        assert!(id > 0);

        let results = store.query(&ActivityFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].event.torrent_hash, "abc");
        assert_eq!(results[0].event.action, ActionKind::Delete);
        assert_eq!(results[0].event.outcome, ActivityOutcome::Failed);
        assert_eq!(results[0].event.detail.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_filters() {
        let store = create_test_store();
        store.insert(&record("main", 1, "a", ActionKind::Delete)).unwrap();
        store.insert(&record("main", 2, "b", ActionKind::TagsAdded)).unwrap();
        store.insert(&record("backup", 2, "a", ActionKind::TagsAdded)).unwrap();

        let by_instance = ActivityFilter::new().with_instance("main");
        assert_eq!(store.query(&by_instance).unwrap().len(), 2);

        let by_rule = ActivityFilter::new().with_rule_id(2);
        assert_eq!(store.count(&by_rule).unwrap(), 2);

        let by_hash = ActivityFilter::new().with_torrent_hash("A");
        assert_eq!(store.count(&by_hash).unwrap(), 2);

        let by_action = ActivityFilter::new()
            .with_action(ActionKind::TagsAdded)
            .with_instance("backup");
        assert_eq!(store.count(&by_action).unwrap(), 1);

        let by_outcome = ActivityFilter::new().with_outcome(ActivityOutcome::Rejected);
        assert_eq!(store.count(&by_outcome).unwrap(), 0);
    }

    #[test]
    fn test_query_with_time_range() {
        let store = create_test_store();
        let now = Utc::now();

        let mut old = record("main", 1, "a", ActionKind::Pause);
        old.timestamp = now - Duration::hours(2);
        store.insert(&old).unwrap();
        let mut new = record("main", 1, "a", ActionKind::Resume);
        new.timestamp = now;
        store.insert(&new).unwrap();

        let filter = ActivityFilter::new().with_time_range(Some(now - Duration::hours(1)), None);
        let results = store.query(&filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event.action, ActionKind::Resume);
    }

    #[test]
    fn test_pagination() {
        let store = create_test_store();
        for i in 0..5 {
            store
                .insert(&record("main", 1, &format!("h{}", i), ActionKind::Move))
                .unwrap();
        }

        let filter = ActivityFilter::new().with_limit(2).with_offset(0);
        assert_eq!(store.query(&filter).unwrap().len(), 2);

        let filter = ActivityFilter::new().with_limit(2).with_offset(4);
        assert_eq!(store.query(&filter).unwrap().len(), 1);

        assert_eq!(store.count(&ActivityFilter::new()).unwrap(), 5);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("activity.db");

        let store = SqliteActivityStore::new(&db_path).unwrap();
        store.insert(&record("main", 1, "a", ActionKind::Delete)).unwrap();
        assert!(db_path.exists());
        drop(store);

        let reopened = SqliteActivityStore::new(&db_path).unwrap();
        assert_eq!(reopened.count(&ActivityFilter::new()).unwrap(), 1);
    }
}
