//! Session records: one per execution request, logs append-only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use errand_agent::{LogEntry, LogEvent, LogSink};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::write_json;
use crate::config::plan::{Mode, Plan, Step};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub mode: Mode,
    pub plan: Plan,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Session {
    fn new(id: String, plan: Plan, mode: Mode) -> Self {
        Self {
            id,
            start_time: Utc::now(),
            mode,
            plan,
            logs: Vec::new(),
        }
    }
}

/// Sessions kept in memory and, when opened on a directory, mirrored to
/// `<dir>/<id>.json` after every change.
#[derive(Debug, Default)]
pub struct SessionStore {
    dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            sessions: Mutex::default(),
        })
    }

    /// Start a session under a fresh UUID v4.
    pub fn create(&self, plan: &[Step], mode: Mode) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), plan.to_vec(), mode);
        self.save(&session)?;
        self.lock()?.insert(id.clone(), session);
        debug!(session = %id, %mode, "session created");
        Ok(id)
    }

    /// Reuse the session stored under `id`, or start it. Used for the
    /// long-lived dock session.
    pub fn ensure(&self, id: &str, mode: Mode) -> Result<()> {
        check_id(id)?;
        match self.get(id) {
            Ok(_) => Ok(()),
            Err(Error::SessionNotFound(_)) => {
                let session = Session::new(id.to_string(), Plan::new(), mode);
                self.save(&session)?;
                self.lock()?.insert(id.to_string(), session);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, id: &str) -> Result<Session> {
        if let Some(session) = self.lock()?.get(id) {
            return Ok(session.clone());
        }
        let path = self
            .path_for(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if !path.exists() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        let session: Session = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        self.lock()?.insert(id.to_string(), session.clone());
        Ok(session)
    }

    pub fn append(&self, id: &str, event: LogEvent) -> Result<()> {
        // Pull a persisted session into memory first
        self.get(id)?;
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.logs.push(LogEntry::now(event));
        self.save(session)
    }

    /// A [`LogSink`] that appends to session `id`.
    pub fn sink(self: &Arc<Self>, id: impl Into<String>) -> SessionLog {
        SessionLog {
            store: Arc::clone(self),
            id: id.into(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Config("session store lock poisoned".into()))
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        check_id(id).ok()?;
        Some(self.dir.as_ref()?.join(format!("{}.json", id)))
    }

    fn save(&self, session: &Session) -> Result<()> {
        match self.path_for(&session.id) {
            Some(path) => write_json(&path, session),
            None => Ok(()),
        }
    }
}

/// Ids become file names, so only `[A-Za-z0-9_-]` is allowed.
fn check_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid session id: {:?}", id)))
    }
}

/// Log sink bound to one session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    store: Arc<SessionStore>,
    id: String,
}

impl SessionLog {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl LogSink for SessionLog {
    fn append(&self, event: LogEvent) {
        if let Err(e) = self.store.append(&self.id, event) {
            warn!(session = %self.id, "failed to record log entry: {}", e);
        }
    }
}
