//! Short-term conversation memory, keyed by session ID.
//!
//! Each session holds an ordered log of turns behind its own lock, so
//! concurrent turns in different sessions never contend. Memory is bounded
//! three ways: turns per session, idle time, and number of live sessions
//! (least recently active evicted first).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use jobmatch_core::config::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AgentError;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionLog {
    turns: Vec<Turn>,
    last_active: DateTime<Utc>,
}

/// In-process session memory with trimming and eviction.
#[derive(Debug)]
pub struct SessionMemory {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionLog>>>>,
    max_turns: usize,
    idle_timeout: Option<Duration>,
    max_sessions: usize,
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> AgentError {
    AgentError::Session(format!("Lock poisoned: {}", e))
}

impl SessionMemory {
    pub fn new(config: &SessionConfig) -> Self {
        let idle_timeout = if config.idle_timeout_minutes == 0 {
            None
        } else {
            Some(Duration::minutes(i64::from(config.idle_timeout_minutes)))
        };
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns: config.max_turns,
            idle_timeout,
            max_sessions: config.max_sessions,
        }
    }

    /// Append a turn and return the session's history length afterwards.
    ///
    /// An empty session ID is ignored and reports 0.
    pub fn add_turn(&self, session_id: &str, role: Role, content: &str) -> Result<usize, AgentError> {
        self.add_turn_at(session_id, role, content, Utc::now())
    }

    /// The session's turns, oldest first. Unknown or expired sessions are empty.
    pub fn history(&self, session_id: &str) -> Result<Vec<Turn>, AgentError> {
        self.history_at(session_id, Utc::now())
    }

    /// Number of turns held for the session.
    pub fn len(&self, session_id: &str) -> Result<usize, AgentError> {
        Ok(self.history(session_id)?.len())
    }

    /// Forget a session. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> Result<bool, AgentError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(session_id).is_some())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every session idle for longer than the timeout.
    pub fn purge_expired(&self) -> Result<usize, AgentError> {
        self.purge_expired_at(Utc::now())
    }

    fn is_expired(&self, log: &SessionLog, now: DateTime<Utc>) -> bool {
        match self.idle_timeout {
            Some(timeout) => now - log.last_active > timeout,
            None => false,
        }
    }

    pub(crate) fn add_turn_at(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, AgentError> {
        if session_id.is_empty() {
            return Ok(0);
        }

        let existing = {
            let sessions = self.sessions.read().map_err(poisoned)?;
            sessions.get(session_id).cloned()
        };
        let log = match existing {
            Some(log) => log,
            None => self.create_session(session_id, now)?,
        };

        let mut log = log.lock().map_err(poisoned)?;
        if self.is_expired(&log, now) {
            log.turns.clear();
        }
        log.turns.push(Turn {
            role,
            content: content.to_string(),
            at: now,
        });
        if self.max_turns > 0 && log.turns.len() > self.max_turns {
            let excess = log.turns.len() - self.max_turns;
            log.turns.drain(..excess);
        }
        log.last_active = now;
        Ok(log.turns.len())
    }

    fn create_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<Mutex<SessionLog>>, AgentError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if let Some(log) = sessions.get(session_id) {
            return Ok(Arc::clone(log));
        }

        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            self.evict_locked(&mut sessions, now);
        }

        let log = Arc::new(Mutex::new(SessionLog {
            turns: Vec::new(),
            last_active: now,
        }));
        sessions.insert(session_id.to_string(), Arc::clone(&log));
        debug!(session_id, sessions = sessions.len(), "Created session");
        Ok(log)
    }

    /// Free room for one session: expired sessions first, then the least
    /// recently active ones.
    fn evict_locked(&self, sessions: &mut HashMap<String, Arc<Mutex<SessionLog>>>, now: DateTime<Utc>) {
        let mut by_activity: Vec<(String, DateTime<Utc>, bool)> = sessions
            .iter()
            .map(|(id, log)| match log.lock() {
                Ok(log) => (id.clone(), log.last_active, self.is_expired(&log, now)),
                // A poisoned log is unusable; evict it first.
                Err(_) => (id.clone(), DateTime::<Utc>::MIN_UTC, true),
            })
            .collect();

        for (id, _, expired) in &by_activity {
            if *expired {
                sessions.remove(id);
            }
        }

        by_activity.retain(|(_, _, expired)| !expired);
        by_activity.sort_by_key(|(_, last_active, _)| *last_active);
        let mut idx = 0;
        while self.max_sessions > 0 && sessions.len() >= self.max_sessions && idx < by_activity.len() {
            sessions.remove(&by_activity[idx].0);
            debug!(session_id = %by_activity[idx].0, "Evicted least recently used session");
            idx += 1;
        }
    }

    fn history_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<Vec<Turn>, AgentError> {
        let log = {
            let sessions = self.sessions.read().map_err(poisoned)?;
            match sessions.get(session_id) {
                Some(log) => Arc::clone(log),
                None => return Ok(Vec::new()),
            }
        };
        let log = log.lock().map_err(poisoned)?;
        if self.is_expired(&log, now) {
            return Ok(Vec::new());
        }
        Ok(log.turns.clone())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize, AgentError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, log| match log.lock() {
            Ok(log) => !self.is_expired(&log, now),
            Err(_) => false,
        });
        Ok(before - sessions.len())
    }
}
