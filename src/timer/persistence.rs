// Persistence collaborator for completed session records
//
// The engine treats storage as an external collaborator behind the
// SessionRepository trait: a record is created when a session starts and
// finalized when it reaches a terminal state. A failed write never reverses
// an in-memory transition; callers log and carry on.
//
// The bundled implementation keeps records in $STATE_DIR/sessions.json with
// exclusive file locking.

use crate::timer::config::Config;
use crate::timer::session::{RecordId, SessionSummary, SessionType, TimerSession};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::sync::Mutex;

/// One persisted session row. `completed` is None while the session is still
/// in progress; a crashed daemon leaves such rows behind for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    pub id: RecordId,
    pub client_id: String,
    pub session_type: SessionType,
    pub planned_duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Row content for a create call; the repository allocates the id
#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub client_id: String,
    pub session_type: SessionType,
    pub planned_duration_secs: u64,
    pub actual_duration_secs: Option<u64>,
    pub completed: Option<bool>,
    pub quality_rating: Option<u8>,
    pub notes: Option<String>,
    pub task_id: Option<String>,
    pub category_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl NewSessionRecord {
    /// In-progress row for a freshly started session
    pub fn from_session(session: &TimerSession) -> Self {
        Self {
            client_id: session.client_id.clone(),
            session_type: session.session_type,
            planned_duration_secs: session.planned_duration_secs,
            actual_duration_secs: None,
            completed: None,
            quality_rating: None,
            notes: None,
            task_id: session.task_id.clone(),
            category_id: session.category_id.clone(),
            started_at: session.started_at,
            ended_at: None,
        }
    }

    /// Fully terminal row, used when a session ends before its create call
    /// ever resolved
    pub fn from_summary(summary: &SessionSummary) -> Self {
        Self {
            client_id: summary.client_id.clone(),
            session_type: summary.session_type,
            planned_duration_secs: summary.planned_duration_secs,
            actual_duration_secs: Some(summary.actual_duration_secs),
            completed: Some(summary.completed),
            quality_rating: summary.quality_rating,
            notes: summary.notes.clone(),
            task_id: summary.task_id.clone(),
            category_id: summary.category_id.clone(),
            started_at: summary.started_at,
            ended_at: Some(summary.ended_at),
        }
    }
}

/// Terminal fields applied to an existing row
#[derive(Debug, Clone)]
pub struct SessionPatch {
    pub actual_duration_secs: u64,
    pub completed: bool,
    pub quality_rating: Option<u8>,
    pub notes: Option<String>,
    pub ended_at: DateTime<Utc>,
}

impl SessionPatch {
    pub fn from_summary(summary: &SessionSummary) -> Self {
        Self {
            actual_duration_secs: summary.actual_duration_secs,
            completed: summary.completed,
            quality_rating: summary.quality_rating,
            notes: summary.notes.clone(),
            ended_at: summary.ended_at,
        }
    }
}

/// Storage boundary consumed by the daemon's event pump. Analytics code
/// reads completed rows through `find_completed_between`.
pub trait SessionRepository: Send + Sync {
    fn create(&self, record: &NewSessionRecord) -> Result<RecordId>;
    fn update(&self, id: RecordId, patch: &SessionPatch) -> Result<()>;
    fn find_completed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>>;
}

/// On-disk document for sessions.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSessions {
    /// Next record ID to assign
    next_id: RecordId,
    /// Map of record ID to session record
    records: HashMap<RecordId, SessionRecord>,
}

/// File-backed SessionRepository implementation
pub struct JsonSessionStore {
    config: Config,
    /// Serializes load-modify-save cycles within this process; the fs2 lock
    /// below guards against other processes.
    write_guard: Mutex<()>,
}

impl JsonSessionStore {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            write_guard: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<StoredSessions> {
        let path = self.config.sessions_file();

        if !path.exists() {
            return Ok(StoredSessions::default());
        }

        let mut file = File::open(&path)
            .with_context(|| format!("Failed to open sessions file: {}", path.display()))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .with_context(|| format!("Failed to read sessions file: {}", path.display()))?;

        if contents.trim().is_empty() {
            return Ok(StoredSessions::default());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse sessions file: {}", path.display()))
    }

    fn save(&self, store: &StoredSessions) -> Result<()> {
        let path = self.config.sessions_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create sessions directory: {}", parent.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "Failed to open sessions file for writing: {}",
                    path.display()
                )
            })?;

        // Acquire exclusive lock (blocking); released when the file drops
        file.lock_exclusive()
            .with_context(|| "Failed to acquire exclusive lock on sessions file")?;

        let contents =
            serde_json::to_string_pretty(store).with_context(|| "Failed to serialize sessions")?;

        file.write_all(contents.as_bytes())
            .with_context(|| "Failed to write sessions file")?;

        Ok(())
    }

    /// Finalize rows a crashed daemon left in progress: mark them not
    /// completed and stamp the end time. Returns how many rows changed.
    pub fn reconcile_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_guard.lock().unwrap();
        let mut store = self.load()?;

        let mut changed = 0;
        for record in store.records.values_mut() {
            if record.completed.is_none() {
                record.completed = Some(false);
                record.ended_at = Some(now);
                changed += 1;
            }
        }

        if changed > 0 {
            self.save(&store)?;
        }
        Ok(changed)
    }

    /// Fetch a single record, mainly for tests and debugging
    pub fn get(&self, id: RecordId) -> Result<Option<SessionRecord>> {
        Ok(self.load()?.records.get(&id).cloned())
    }
}

impl SessionRepository for JsonSessionStore {
    fn create(&self, record: &NewSessionRecord) -> Result<RecordId> {
        let _guard = self.write_guard.lock().unwrap();
        let mut store = self.load()?;

        let id = store.next_id;
        store.next_id += 1;
        store.records.insert(
            id,
            SessionRecord {
                id,
                client_id: record.client_id.clone(),
                session_type: record.session_type,
                planned_duration_secs: record.planned_duration_secs,
                actual_duration_secs: record.actual_duration_secs,
                completed: record.completed,
                quality_rating: record.quality_rating,
                notes: record.notes.clone(),
                task_id: record.task_id.clone(),
                category_id: record.category_id.clone(),
                started_at: record.started_at,
                ended_at: record.ended_at,
            },
        );

        self.save(&store)?;
        Ok(id)
    }

    fn update(&self, id: RecordId, patch: &SessionPatch) -> Result<()> {
        let _guard = self.write_guard.lock().unwrap();
        let mut store = self.load()?;

        let record = store
            .records
            .get_mut(&id)
            .with_context(|| format!("No session record with id {}", id))?;

        record.actual_duration_secs = Some(patch.actual_duration_secs);
        record.completed = Some(patch.completed);
        record.quality_rating = patch.quality_rating;
        record.notes = patch.notes.clone();
        record.ended_at = Some(patch.ended_at);

        self.save(&store)
    }

    fn find_completed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        let store = self.load()?;
        let mut records: Vec<SessionRecord> = store
            .records
            .values()
            .filter(|r| r.completed == Some(true))
            .filter(|r| {
                r.ended_at
                    .map(|ended| ended >= from && ended <= to)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.ended_at);
        Ok(records)
    }
}
