//! Browser session collaborator.
//!
//! The calendar engine never talks to a concrete driver. Everything it needs
//! from a live page goes through [`CalendarBrowser`]: CSS lookups, clicks,
//! text/attribute/style reads, and the script fast path. Two backends exist:
//! [`webdriver::WebDriverBrowser`] drives real Chrome, and
//! [`snapshot::SnapshotBrowser`] replays static HTML frames.

pub mod snapshot;
pub mod webdriver;

use crate::calendar::BookingTarget;
use async_trait::async_trait;
use serde::Serialize;

/// Failures reported by a browser backend.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The node behind a handle was replaced by a re-render.
    #[error("stale element reference: {0}")]
    Stale(String),
    #[error("browser command failed: {0}")]
    Command(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    /// The session itself is gone (driver crashed, connection refused, ...).
    #[error("browser session failed: {0}")]
    Session(String),
}

impl BrowserError {
    pub fn is_stale(&self) -> bool {
        matches!(self, BrowserError::Stale(_))
    }
}

/// Resolved colors of an element, as the browser computes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CellStyle {
    pub background: String,
    pub foreground: String,
}

/// One open browser session bound to a single booking target.
///
/// Handles returned by lookups are only valid until the page re-renders;
/// using an outdated handle yields [`BrowserError::Stale`].
#[async_trait]
pub trait CalendarBrowser: Send + Sync {
    type Handle: Clone + Send + Sync;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    async fn page_source(&self) -> Result<String, BrowserError>;

    /// All elements matching `css`, searched under `scope` or the whole page.
    /// An empty result is not an error.
    async fn find_all(
        &self,
        css: &str,
        scope: Option<&Self::Handle>,
    ) -> Result<Vec<Self::Handle>, BrowserError>;

    async fn click(&self, handle: &Self::Handle) -> Result<(), BrowserError>;

    /// Rendered text of the element, trimmed.
    async fn text(&self, handle: &Self::Handle) -> Result<String, BrowserError>;

    async fn attribute(
        &self,
        handle: &Self::Handle,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;

    /// Lower-case tag name.
    async fn tag_name(&self, handle: &Self::Handle) -> Result<String, BrowserError>;

    /// Nearest strict ancestor with the given tag name.
    async fn ancestor(
        &self,
        handle: &Self::Handle,
        tag: &str,
    ) -> Result<Option<Self::Handle>, BrowserError>;

    async fn computed_style(&self, handle: &Self::Handle) -> Result<CellStyle, BrowserError>;

    /// Displayed and enabled.
    async fn is_interactable(&self, handle: &Self::Handle) -> Result<bool, BrowserError>;

    /// Pick the `<option>` whose visible label equals `label`.
    async fn select_by_label(
        &self,
        handle: &Self::Handle,
        label: &str,
    ) -> Result<(), BrowserError>;

    /// Evaluate a script in the page. Scripts signal success by returning `true`.
    async fn execute(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Opens fresh sessions; the orchestrator asks for one per booking target.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Browser: CalendarBrowser;

    async fn open(&self, target: &BookingTarget) -> Result<Self::Browser, BrowserError>;
}
