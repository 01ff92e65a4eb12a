//! SQLite database for scenario and execution persistence

use crate::store::{ExecutionStore, ScenarioStore};
use crate::types::{Execution, ExecutionStatus, LogEntry, Scenario, Step};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Scenarios table
            CREATE TABLE IF NOT EXISTS scenarios (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                project_id TEXT,
                steps TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                generation INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_scenarios_project ON scenarios(project_id);

            -- Executions table (append-only)
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                scenario_id TEXT NOT NULL,
                environment_id TEXT,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                logs TEXT NOT NULL DEFAULT '[]',
                screenshot TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_scenario ON executions(scenario_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    /// Insert a scenario
    pub fn insert_scenario(&self, scenario: &Scenario) -> Result<()> {
        let conn = self.conn.lock();
        let now = Utc::now().timestamp();

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scenarios WHERE id = ?1",
            params![scenario.id],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(Error::AlreadyExists {
                kind: "scenario".to_string(),
                id: scenario.id.clone(),
            });
        }

        conn.execute(
            "INSERT INTO scenarios (id, name, project_id, steps, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scenario.id,
                scenario.name,
                scenario.project_id,
                serde_json::to_string(&scenario.steps)?,
                now,
                now,
            ],
        )?;

        debug!("Inserted scenario with id {}", scenario.id);
        Ok(())
    }

    /// Get a scenario by ID
    pub fn load_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT id, name, project_id, steps FROM scenarios WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ScenarioRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        project_id: row.get(2)?,
                        steps: row.get(3)?,
                    })
                },
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// List all scenarios, optionally restricted to one project
    pub fn list_scenarios(&self, project_id: Option<&str>) -> Result<Vec<Scenario>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT id, name, project_id, steps FROM scenarios
             WHERE ?1 IS NULL OR project_id = ?1
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ScenarioRow {
                id: row.get(0)?,
                name: row.get(1)?,
                project_id: row.get(2)?,
                steps: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }

        Ok(results)
    }

    /// Replace the step list of a scenario, bumping its generation
    pub fn replace_steps(&self, id: &str, steps: &[Step]) -> Result<()> {
        let conn = self.conn.lock();
        let now = Utc::now().timestamp();

        let rows = conn.execute(
            "UPDATE scenarios SET steps = ?1, updated_at = ?2, generation = generation + 1 WHERE id = ?3",
            params![serde_json::to_string(steps)?, now, id],
        )?;

        if rows == 0 {
            return Err(Error::not_found("scenario", id));
        }

        debug!("Updated steps of scenario {}", id);
        Ok(())
    }

    /// Current generation of a scenario row
    pub fn scenario_generation(&self, id: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let generation = conn
            .query_row(
                "SELECT generation FROM scenarios WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(generation)
    }

    /// Delete a scenario
    pub fn delete_scenario(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM scenarios WHERE id = ?1", params![id])?;

        if rows > 0 {
            debug!("Deleted scenario with id {}", id);
        }

        Ok(rows > 0)
    }

    // ========================================================================
    // Executions
    // ========================================================================

    /// Insert an execution record
    pub fn insert_execution(&self, execution: &Execution) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO executions
                (id, scenario_id, environment_id, status, duration_ms, logs, screenshot, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                execution.id,
                execution.scenario_id,
                execution.environment_id,
                execution.status.to_string(),
                execution.duration_ms as i64,
                serde_json::to_string(&execution.logs)?,
                execution.screenshot,
                execution.started_at.to_rfc3339(),
                execution.finished_at.to_rfc3339(),
            ],
        )?;

        debug!("Inserted execution with id {}", execution.id);
        Ok(())
    }

    /// Get an execution by ID
    pub fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                params![id],
                ExecutionRow::from_row,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// List executions of a scenario, newest first
    pub fn list_executions(&self, scenario_id: &str) -> Result<Vec<Execution>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM executions WHERE scenario_id = ?1 ORDER BY started_at DESC",
            EXECUTION_COLUMNS
        ))?;

        let rows = stmt.query_map(params![scenario_id], ExecutionRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }

        Ok(results)
    }
}

impl Database {
    /// Run a call on the blocking pool so SQLite I/O stays off the reactor
    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || call(&db))
            .await
            .map_err(|e| Error::Internal(format!("database task failed: {}", e)))?
    }
}

#[async_trait]
impl ScenarioStore for Database {
    async fn get_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        let id = id.to_string();
        self.blocking(move |db| db.load_scenario(&id)).await
    }

    async fn update_steps(&self, id: &str, steps: &[Step]) -> Result<()> {
        let id = id.to_string();
        let steps = steps.to_vec();
        self.blocking(move |db| db.replace_steps(&id, &steps)).await
    }
}

#[async_trait]
impl ExecutionStore for Database {
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        let execution = execution.clone();
        self.blocking(move |db| db.insert_execution(&execution)).await
    }
}

const EXECUTION_COLUMNS: &str =
    "id, scenario_id, environment_id, status, duration_ms, logs, screenshot, started_at, finished_at";

/// Raw scenario row before parsing
struct ScenarioRow {
    id: String,
    name: String,
    project_id: Option<String>,
    steps: String,
}

impl ScenarioRow {
    fn parse(self) -> Result<Scenario> {
        Ok(Scenario {
            id: self.id,
            name: self.name,
            project_id: self.project_id,
            steps: serde_json::from_str(&self.steps)?,
        })
    }
}

/// Raw execution row before parsing
struct ExecutionRow {
    id: String,
    scenario_id: String,
    environment_id: Option<String>,
    status: String,
    duration_ms: i64,
    logs: String,
    screenshot: Option<String>,
    started_at: String,
    finished_at: String,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scenario_id: row.get(1)?,
            environment_id: row.get(2)?,
            status: row.get(3)?,
            duration_ms: row.get(4)?,
            logs: row.get(5)?,
            screenshot: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn parse(self) -> Result<Execution> {
        let status = match self.status.as_str() {
            "SUCCESS" => ExecutionStatus::Success,
            "FAILED" => ExecutionStatus::Failed,
            "STOPPED" => ExecutionStatus::Stopped,
            other => {
                return Err(Error::Internal(format!(
                    "unknown execution status '{}' for {}",
                    other, self.id
                )))
            }
        };
        let logs: Vec<LogEntry> = serde_json::from_str(&self.logs)?;

        Ok(Execution {
            id: self.id,
            scenario_id: self.scenario_id,
            environment_id: self.environment_id,
            status,
            duration_ms: self.duration_ms.max(0) as u64,
            logs,
            screenshot: self.screenshot,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: parse_timestamp(&self.finished_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp '{}': {}", raw, e)))
}
