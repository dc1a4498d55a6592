//! Once-per-calendar-day gate for the recap.
//!
//! The state is a plain value: loaded once before a pass, handed through the
//! pass, and saved once afterwards if it changed.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    last_sent: Option<NaiveDate>,
}

impl ThrottleState {
    pub fn new(last_sent: Option<NaiveDate>) -> Self {
        Self { last_sent }
    }

    pub fn last_sent(&self) -> Option<NaiveDate> {
        self.last_sent
    }

    /// Due when nothing was sent yet or the last send was on an earlier day.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.last_sent.is_none_or(|last| today > last)
    }

    pub fn mark_sent(&mut self, today: NaiveDate) {
        self.last_sent = Some(today);
    }
}

/// Persistence for [`ThrottleState`]. A single record is enough.
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// Missing or unreadable records load as "never sent".
    async fn load(&self) -> ThrottleState;

    async fn save(&self, state: ThrottleState) -> io::Result<()>;
}

/// An ISO date in a text file.
#[derive(Debug, Clone)]
pub struct FileThrottleStore {
    path: PathBuf,
}

impl FileThrottleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ThrottleStore for FileThrottleStore {
    async fn load(&self) -> ThrottleState {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No recap record yet");
                return ThrottleState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable recap record");
                return ThrottleState::default();
            }
        };
        match raw.trim().parse::<NaiveDate>() {
            Ok(date) => ThrottleState::new(Some(date)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed recap record");
                ThrottleState::default()
            }
        }
    }

    async fn save(&self, state: ThrottleState) -> io::Result<()> {
        let Some(date) = state.last_sent() else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, date.to_string()).await
    }
}

/// Keeps the record in memory.
#[derive(Debug, Default)]
pub struct MemoryThrottleStore {
    state: Mutex<ThrottleState>,
}

impl MemoryThrottleStore {
    pub fn new(state: ThrottleState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl ThrottleStore for MemoryThrottleStore {
    async fn load(&self) -> ThrottleState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    async fn save(&self, state: ThrottleState) -> io::Result<()> {
        let mut current = self
            .state
            .lock()
            .map_err(|_| io::Error::other("throttle state lock poisoned"))?;
        *current = state;
        Ok(())
    }
}
