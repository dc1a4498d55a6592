//! Failure taxonomy of a single target check.

use crate::browser::BrowserError;
use crate::notify::NotifyError;

/// Errors surfaced at the per-target boundary.
///
/// `LocatorNotFound` and `NavigationTimeout` are recorded on otherwise
/// successful checks (the target reports "no availability"); the others end
/// a check early and report it as errored.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("{role} not found on the page")]
    LocatorNotFound { role: &'static str },

    #[error("stale element reference persisted after retries: {0}")]
    StaleReference(String),

    #[error("target month not reached after {clicks} clicks (last view: {last_view})")]
    NavigationTimeout { clicks: u32, last_view: String },

    #[error("browser session failed: {0}")]
    SessionFailure(String),

    #[error("notification could not be delivered: {0}")]
    NotificationTransportFailure(#[from] NotifyError),

    #[error(transparent)]
    Browser(BrowserError),
}

impl From<BrowserError> for CheckError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Stale(msg) => CheckError::StaleReference(msg),
            BrowserError::Session(msg) => CheckError::SessionFailure(msg),
            other => CheckError::Browser(other),
        }
    }
}

impl CheckError {
    /// Whether this error ends the check with an "error" status.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CheckError::LocatorNotFound { .. } | CheckError::NavigationTimeout { .. }
        )
    }
}
