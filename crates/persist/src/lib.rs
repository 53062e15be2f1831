//! Plinth persistence: tracked project state in SQLite, stored as JSON.
//! A few previous snapshots are kept per project for `show --history`.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use plinth_core::ProjectState;
use serde::{Deserialize, Serialize};
use tracing::debug;

const KEEP_SNAPSHOTS: i64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub project_id: String,
    pub saved_at: DateTime<Utc>,
    pub state: ProjectState,
}

pub trait StateStore {
    fn put(&self, state: &ProjectState) -> Result<()>;
    /// Latest snapshot for `project_id`.
    fn get(&self, project_id: &str) -> Result<Option<Snapshot>>;
    fn history(&self, project_id: &str, limit: usize) -> Result<Vec<Snapshot>>;
    fn remove(&self, project_id: &str) -> Result<bool>;
    /// Latest snapshot of every stored project, ordered by project id.
    fn list(&self) -> Result<Vec<Snapshot>>;
}

pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("PLINTH_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS project_state (
                project_id TEXT NOT NULL,
                ts_ms      INTEGER NOT NULL,
                state      TEXT NOT NULL
            )",
            [],
        )
        .context("creating project_state table")?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_project_state_id_ts ON project_state(project_id, ts_ms DESC)",
            [],
        )
        .ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "persist: opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn query_snapshots(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Snapshot>> {
        let db = self.conn();
        let mut stmt = db.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let project_id: String = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let json: String = row.get(2)?;
            let state: ProjectState = serde_json::from_str(&json)
                .with_context(|| format!("decoding stored state of {}", project_id))?;
            let saved_at = Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_default();
            out.push(Snapshot { project_id, saved_at, state });
        }
        Ok(out)
    }
}

impl StateStore for SqliteStore {
    fn put(&self, state: &ProjectState) -> Result<()> {
        let started = std::time::Instant::now();
        let json = serde_json::to_string(state).context("encoding project state")?;
        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO project_state(project_id, ts_ms, state) VALUES (?1, ?2, ?3)",
            (&state.project_id, now_ms(), &json),
        )?;
        tx.execute(
            "DELETE FROM project_state
             WHERE project_id = ?1
               AND rowid NOT IN (
                   SELECT rowid FROM project_state WHERE project_id = ?1 ORDER BY ts_ms DESC, rowid DESC LIMIT ?2
               )",
            (&state.project_id, KEEP_SNAPSHOTS),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, project_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.history(project_id, 1)?.into_iter().next())
    }

    fn history(&self, project_id: &str, limit: usize) -> Result<Vec<Snapshot>> {
        let started = std::time::Instant::now();
        let out = self.query_snapshots(
            "SELECT project_id, ts_ms, state FROM project_state WHERE project_id = ?1
             ORDER BY ts_ms DESC, rowid DESC LIMIT ?2",
            (project_id, limit as i64),
        )?;
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn remove(&self, project_id: &str) -> Result<bool> {
        let n = self.conn().execute("DELETE FROM project_state WHERE project_id = ?1", [project_id])?;
        Ok(n > 0)
    }

    fn list(&self) -> Result<Vec<Snapshot>> {
        self.query_snapshots(
            "SELECT p.project_id, p.ts_ms, p.state FROM project_state p
             WHERE p.rowid = (
                 SELECT q.rowid FROM project_state q WHERE q.project_id = p.project_id
                 ORDER BY q.ts_ms DESC, q.rowid DESC LIMIT 1
             )
             ORDER BY p.project_id",
            [],
        )
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".plinth");
        let _ = std::fs::create_dir_all(&p);
        p.push("plinth.db");
        return p.to_string_lossy().to_string();
    }
    "plinth.db".to_string()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_core::Parent;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("plinth-test-{}.db", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        dir.join(f).to_string_lossy().to_string()
    }

    fn state(id: &str, name: &str) -> ProjectState {
        ProjectState {
            id: Some(id.into()),
            project_id: id.into(),
            display_name: name.into(),
            parent: Parent::Folder("42".into()),
            ..Default::default()
        }
    }

    #[test]
    fn put_get_keeps_latest_three() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        for i in 0..5 {
            s.put(&state("demo-project", &format!("v{}", i))).unwrap();
        }
        let latest = s.get("demo-project").unwrap().unwrap();
        assert_eq!(latest.state.display_name, "v4");
        assert_eq!(latest.state.parent, Parent::Folder("42".into()));
        let names: Vec<_> = s
            .history("demo-project", 10)
            .unwrap()
            .into_iter()
            .map(|h| h.state.display_name)
            .collect();
        assert_eq!(names, vec!["v4", "v3", "v2"]);
    }

    #[test]
    fn list_and_remove() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        s.put(&state("beta-project", "b")).unwrap();
        s.put(&state("alpha-project", "a1")).unwrap();
        s.put(&state("alpha-project", "a2")).unwrap();
        let all = s.list().unwrap();
        let ids: Vec<_> = all.iter().map(|x| x.project_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha-project", "beta-project"]);
        assert_eq!(all[0].state.display_name, "a2");

        assert!(s.remove("alpha-project").unwrap());
        assert!(!s.remove("alpha-project").unwrap());
        assert!(s.get("alpha-project").unwrap().is_none());
    }

    #[test]
    fn cleared_identity_round_trips() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        let mut st = state("gone-project", "g");
        st.clear_identity();
        s.put(&st).unwrap();
        let back = s.get("gone-project").unwrap().unwrap();
        assert!(!back.state.is_tracked());
    }
}
