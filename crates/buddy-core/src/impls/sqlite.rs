//! SqliteStore - 単一ファイルの永続ストア
//!
//! TaskStore と InvocationStore の両方を 1 つの SQLite ファイルで実装します。
//! プロセスを再起動しても invocation（deadline, phase, check 結果）が残るので、
//! 起動時の `recover` で途中から再開できます。
//!
//! # 実装詳細
//! - rusqlite は同期 API なので `spawn_blocking` で包む
//! - 接続は 1 本を std Mutex で共有
//! - 時刻は RFC3339 文字列、invocation 本体は JSON（`body` 列）
//! - `key` が PRIMARY KEY なので create-if-absent は `ON CONFLICT DO NOTHING`
//! - `update` は `WHERE revision = ?` による楽観ロック

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::{IdempotencyKey, InvocationRecord, StoreError, Task, TaskId};
use crate::ports::{InsertOutcome, InvocationStore, TaskStore};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        done INTEGER NOT NULL DEFAULT 0,
        check_in_hours REAL NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS check_in_invocations (
        key TEXT PRIMARY KEY,           -- 'check-in/{task_id}'
        task_id TEXT NOT NULL,
        phase TEXT NOT NULL,            -- 'waiting', 'checked', ... 'complete'
        deadline TEXT NOT NULL,
        halted INTEGER NOT NULL DEFAULT 0,
        revision INTEGER NOT NULL,
        body TEXT NOT NULL,             -- JSON InvocationRecord
        started_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_check_in_phase ON check_in_invocations(phase);
";

/// SQLite-backed task and invocation store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            StoreError::Unavailable(format!("open {}: {e}", path.as_ref().display()))
        })?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            tracing::warn!(path = %path.as_ref().display(), error = %e, "WAL not enabled; using default journal");
        }
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Unavailable(format!("migration: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("lock: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task: {e}")))?
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}

struct TaskRow {
    id: String,
    title: String,
    done: bool,
    check_in_hours: f64,
    created_at: String,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            done: row.get::<_, i64>(2)? != 0,
            check_in_hours: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        let id: TaskId = self
            .id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        Ok(Task {
            id,
            title: self.title,
            done: self.done,
            check_in_hours: self.check_in_hours,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

const TASK_COLUMNS: &str = "id, title, done, check_in_hours, created_at";

fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id],
        TaskRow::read,
    )
    .optional()
    .map_err(sql_err)?
    .map(TaskRow::into_task)
    .transpose()
}

fn decode_record(body: &str) -> Result<InvocationRecord, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt(format!("invocation body: {e}")))
}

fn load_record(conn: &Connection, key: &str) -> Result<Option<InvocationRecord>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM check_in_invocations WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;
    body.as_deref().map(decode_record).transpose()
}

fn query_records(conn: &Connection, sql: &str) -> Result<Vec<InvocationRecord>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(sql_err)?;
    let bodies = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)?;
    bodies.iter().map(|b| decode_record(b)).collect()
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO tasks (id, title, done, check_in_hours, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        task.id.to_string(),
                        task.title,
                        task.done as i64,
                        task.check_in_hours,
                        task.created_at.to_rfc3339(),
                    ],
                )
                .map_err(sql_err)?;
            if inserted == 0 {
                return Err(StoreError::Conflict {
                    key: task.id.to_string(),
                    expected: 0,
                    found: 1,
                });
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| load_task(conn, &id.to_string()))
            .await
    }

    async fn mark_done(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| {
            let id = id.to_string();
            conn.execute("UPDATE tasks SET done = 1 WHERE id = ?1", params![id])
                .map_err(sql_err)?;
            load_task(conn, &id)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC, id DESC"
                ))
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], TaskRow::read)
                .map_err(sql_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err)?;
            rows.into_iter().map(TaskRow::into_task).collect()
        })
        .await
    }
}

#[async_trait]
impl InvocationStore for SqliteStore {
    async fn insert_if_absent(
        &self,
        record: InvocationRecord,
    ) -> Result<InsertOutcome, StoreError> {
        self.with_conn(move |conn| {
            let body = serde_json::to_string(&record)
                .map_err(|e| StoreError::Corrupt(format!("encode: {e}")))?;
            let inserted = conn
                .execute(
                    "INSERT INTO check_in_invocations
                     (key, task_id, phase, deadline, halted, revision, body, started_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(key) DO NOTHING",
                    params![
                        record.key.as_str(),
                        record.task_id.to_string(),
                        record.phase.as_str(),
                        record.deadline.to_rfc3339(),
                        record.is_halted() as i64,
                        record.revision as i64,
                        body,
                        record.started_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(sql_err)?;

            if inserted == 1 {
                return Ok(InsertOutcome::Inserted(record));
            }
            load_record(conn, record.key.as_str())?
                .map(InsertOutcome::AlreadyExists)
                .ok_or_else(|| StoreError::NotFound(record.key.to_string()))
        })
        .await
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<InvocationRecord>, StoreError> {
        let key = IdempotencyKey::for_task(task_id);
        self.with_conn(move |conn| load_record(conn, key.as_str()))
            .await
    }

    async fn update(&self, record: &mut InvocationRecord) -> Result<(), StoreError> {
        let mut next = record.clone();
        next.revision += 1;

        let saved = self
            .with_conn(move |conn| {
                let body = serde_json::to_string(&next)
                    .map_err(|e| StoreError::Corrupt(format!("encode: {e}")))?;
                let changed = conn
                    .execute(
                        "UPDATE check_in_invocations
                         SET phase = ?1, deadline = ?2, halted = ?3, revision = ?4,
                             body = ?5, updated_at = ?6
                         WHERE key = ?7 AND revision = ?8",
                        params![
                            next.phase.as_str(),
                            next.deadline.to_rfc3339(),
                            next.is_halted() as i64,
                            next.revision as i64,
                            body,
                            next.updated_at.to_rfc3339(),
                            next.key.as_str(),
                            (next.revision - 1) as i64,
                        ],
                    )
                    .map_err(sql_err)?;

                if changed == 1 {
                    return Ok(next);
                }

                let found: Option<i64> = conn
                    .query_row(
                        "SELECT revision FROM check_in_invocations WHERE key = ?1",
                        params![next.key.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(sql_err)?;
                match found {
                    Some(found) => Err(StoreError::Conflict {
                        key: next.key.to_string(),
                        expected: next.revision - 1,
                        found: found as u64,
                    }),
                    None => Err(StoreError::NotFound(next.key.to_string())),
                }
            })
            .await?;

        *record = saved;
        Ok(())
    }

    async fn list_incomplete(&self) -> Result<Vec<InvocationRecord>, StoreError> {
        self.with_conn(|conn| {
            query_records(
                conn,
                "SELECT body FROM check_in_invocations
                 WHERE phase != 'complete' ORDER BY deadline",
            )
        })
        .await
    }

    async fn list(&self) -> Result<Vec<InvocationRecord>, StoreError> {
        self.with_conn(|conn| {
            query_records(
                conn,
                "SELECT body FROM check_in_invocations ORDER BY started_at",
            )
        })
        .await
    }
}
