//! Results store: a single table, keyed `(arch, bug_no)`, upsert on
//! conflict, latest-write-wins. Backed by SQLite (`rusqlite`, bundled).
//!
//! The store is accessed only from the Manager's single event loop; the
//! [`ResultsStore`] wraps its connection in a `parking_lot::Mutex` anyway so
//! the invariant holds even if a future revision spreads writes across
//! tokio worker threads.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tattoo_core::Worker;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// `(bug_no, arch)` pairs grouped by pass/fail, mirroring
/// `tattoo_proto::CompletedJobsResponse`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinceResult {
    pub passes: Vec<(u32, String)>,
    pub failed: Vec<(u32, String)>,
}

pub struct ResultsStore {
    conn: Mutex<Connection>,
}

impl ResultsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(ResultsStore {
                conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(ResultsStore {
                conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tests (
            arch TEXT NOT NULL,
            bug_no INTEGER NOT NULL,
            state INTEGER NOT NULL,
            machine_name TEXT NOT NULL,
            time_date DATETIME NOT NULL,
            PRIMARY KEY (arch, bug_no)
        );",
        )?;
        Ok(())
    }

    /// Upsert a job outcome.
    pub fn record(&self, worker: &Worker, bug_no: u32, success: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "REPLACE INTO tests (arch, bug_no, state, machine_name, time_date)
            VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                worker.canonical_arch(),
                bug_no,
                success as i64,
                worker.name,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// `(passes, failed)` for every row written after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> Result<SinceResult, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT arch, bug_no, state FROM tests WHERE time_date > ?1")?;
        let mut result = SinceResult::default();
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            let arch: String = row.get(0)?;
            let bug_no: u32 = row.get(1)?;
            let state: i64 = row.get(2)?;
            Ok((arch, bug_no, state != 0))
        })?;
        for row in rows {
            let (arch, bug_no, success) = row?;
            if success {
                result.passes.push((bug_no, arch));
            } else {
                result.failed.push((bug_no, arch));
            }
        }
        Ok(result)
    }

    /// `bugs \ {b : exists row (arch, b)}`.
    pub fn filter_not_tested(
        &self,
        arch: &str,
        bugs: &[u32],
    ) -> Result<Vec<u32>, StoreError> {
        if bugs.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT 1 FROM tests WHERE arch = ?1 AND bug_no = ?2")?;
        let mut out = Vec::new();
        for &bug in bugs {
            let tested: Option<i64> = stmt
                .query_row(params![arch, bug], |row| row.get(0))
                .optional()?;
            if tested.is_none() {
                out.push(bug);
            }
        }
        Ok(out)
    }
}
