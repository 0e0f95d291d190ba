//! In-memory server event log
//!
//! Keeps the most recent notable events (joins, leaves, kicks, bans,
//! session lifecycle) for the `log` admin path.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of retained events
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Routine event
    Info,
    /// Something an administrator may want to look at
    Warn,
}

/// A logged server event
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: EventLevel,
    /// Session the event belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// User context id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<u8>,
    /// Description
    pub message: String,
}

impl ServerEvent {
    /// Create an informational event
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: EventLevel::Info,
            session: None,
            user: None,
            message: message.into(),
        }
    }

    /// Create a warning event
    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Warn,
            ..Self::info(message)
        }
    }

    /// Attach the session id
    #[must_use]
    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Attach the user context id
    #[must_use]
    pub fn user(mut self, ctx: u8) -> Self {
        self.user = Some(ctx);
        self
    }
}

/// Bounded event log shared by the server and its sessions
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<ServerEvent>>,
}

impl EventLog {
    /// Create a log keeping at most `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an event, dropping the oldest one when full
    pub fn push(&self, event: ServerEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, newest first
    ///
    /// `session` filters by session id; `limit` caps the result.
    #[must_use]
    pub fn recent(&self, session: Option<&str>, limit: usize) -> Vec<ServerEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .rev()
            .filter(|e| session.is_none() || e.session.as_deref() == session)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of retained events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
