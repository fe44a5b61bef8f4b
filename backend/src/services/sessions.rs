use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::models::error::AppError;
use crate::models::history::HistoryStore;
use crate::services::access_gate::AccessGate;

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub history: RwLock<HistoryStore>,
    busy: Mutex<()>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            history: RwLock::new(HistoryStore::new()),
            busy: Mutex::new(()),
        }
    }

    /// Held for the duration of one processing request.
    pub fn try_begin(&self) -> Result<MutexGuard<'_, ()>, AppError> {
        self.busy.try_lock().map_err(|_| AppError::SessionBusy)
    }
}

pub struct SessionManager {
    gate: AccessGate,
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new(gate: AccessGate) -> Self {
        Self {
            gate,
            sessions: DashMap::new(),
        }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn open(&self, token: &str) -> Result<Arc<Session>, AppError> {
        self.gate.verify(token)?;
        let session = Arc::new(Session::new());
        self.sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, "Session opened");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn close(&self, id: &str) -> Result<(), AppError> {
        let (_, session) = self.sessions.remove(id).ok_or(AppError::SessionNotFound)?;
        info!(
            session_id = %session.id,
            entries = session.history.read().len(),
            "Session closed"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
