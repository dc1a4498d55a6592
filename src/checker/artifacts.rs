//! Screenshot/HTML checkpoints and error-time debug captures.
//!
//! Writing an artifact never fails a check: storage errors are logged and
//! swallowed here, and a backend without screenshot support just skips them.

use crate::browser::{BrowserError, CalendarBrowser};
use crate::utils::slugify;
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Where artifacts end up. Paths are relative to the sink's root.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn write(&self, path: &str, contents: &[u8]);
}

/// Writes artifacts below a results directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSink for ArtifactStore {
    async fn write(&self, path: &str, contents: &[u8]) {
        let full = self.root.join(path);
        if let Some(parent) = full.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(path = %parent.display(), error = %e, "Failed to create artifact directory");
            return;
        }
        match tokio::fs::write(&full, contents).await {
            Ok(()) => debug!(path = %full.display(), bytes = contents.len(), "Saved artifact"),
            Err(e) => warn!(path = %full.display(), error = %e, "Failed to write artifact"),
        }
    }
}

/// Drops everything. Used for offline replays.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardArtifacts;

#[async_trait]
impl ArtifactSink for DiscardArtifacts {
    async fn write(&self, _path: &str, _contents: &[u8]) {}
}

/// Keeps artifact paths in memory so callers can inspect what was captured.
#[derive(Debug, Default)]
pub struct MemoryArtifacts {
    written: Mutex<Vec<String>>,
}

impl MemoryArtifacts {
    pub fn paths(&self) -> Vec<String> {
        self.written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifacts {
    async fn write(&self, path: &str, _contents: &[u8]) {
        if let Ok(mut written) = self.written.lock() {
            written.push(path.to_string());
        }
    }
}

/// What to grab at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Screenshot,
    Page,
}

impl Capture {
    pub const BOTH: &'static [Capture] = &[Capture::Screenshot, Capture::Page];
    pub const SCREENSHOT: &'static [Capture] = &[Capture::Screenshot];
}

#[derive(Debug, Serialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
enum InventoryEntry {
    Input {
        r#type: Option<String>,
        id: Option<String>,
        name: Option<String>,
        class: Option<String>,
        value: Option<String>,
    },
    Div {
        id: Option<String>,
        class: Option<String>,
        visible: bool,
    },
}

const CONTAINER_SELECTOR: &str = "div.datepicker, div.ui-datepicker, #ui-datepicker-div";

/// Checkpoint writer for one booking target; file names start with the
/// target's slug.
pub struct Checkpoints<'a> {
    sink: &'a dyn ArtifactSink,
    prefix: String,
}

impl<'a> Checkpoints<'a> {
    pub fn new(sink: &'a dyn ArtifactSink, target_name: &str) -> Self {
        Self {
            sink,
            prefix: slugify(target_name),
        }
    }

    /// Save the requested captures as `{target}_{label}.png` / `.html`.
    pub async fn capture<B: CalendarBrowser>(&self, browser: &B, label: &str, what: &[Capture]) {
        let base = format!("{}_{label}", self.prefix);
        for capture in what {
            match capture {
                Capture::Screenshot => self.screenshot(browser, &format!("{base}.png")).await,
                Capture::Page => self.page(browser, &format!("{base}.html")).await,
            }
        }
    }

    /// Timestamped screenshot, page source and element inventory under `debug/`.
    pub async fn debug_capture<B: CalendarBrowser>(&self, browser: &B, context: &str) {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("debug/{}_{}_{stamp}", self.prefix, slugify(context));

        self.screenshot(browser, &format!("{base}.png")).await;
        self.page(browser, &format!("{base}.html")).await;

        match element_inventory(browser).await {
            Ok(entries) => match serde_json::to_vec_pretty(&entries) {
                Ok(json) => {
                    self.sink
                        .write(&format!("{base}_elements.json"), &json)
                        .await
                }
                Err(e) => warn!(error = %e, "Failed to serialize element inventory"),
            },
            Err(e) => warn!(error = %e, "Failed to gather element inventory"),
        }
    }

    async fn screenshot<B: CalendarBrowser>(&self, browser: &B, path: &str) {
        match browser.screenshot().await {
            Ok(png) => self.sink.write(path, &png).await,
            Err(BrowserError::Unsupported(_)) => debug!(path, "Screenshots unsupported, skipping"),
            Err(e) => warn!(path, error = %e, "Failed to capture screenshot"),
        }
    }

    async fn page<B: CalendarBrowser>(&self, browser: &B, path: &str) {
        match browser.page_source().await {
            Ok(html) => self.sink.write(path, html.as_bytes()).await,
            Err(e) => warn!(path, error = %e, "Failed to read page source"),
        }
    }
}

/// Visible inputs and every datepicker container, for post-mortems.
async fn element_inventory<B: CalendarBrowser>(
    browser: &B,
) -> Result<Vec<InventoryEntry>, BrowserError> {
    let mut entries = Vec::new();

    for input in browser.find_all("input", None).await? {
        // Elements can vanish mid-inventory; skip rather than abort.
        let Ok(true) = browser.is_interactable(&input).await else {
            continue;
        };
        entries.push(InventoryEntry::Input {
            r#type: browser.attribute(&input, "type").await.ok().flatten(),
            id: browser.attribute(&input, "id").await.ok().flatten(),
            name: browser.attribute(&input, "name").await.ok().flatten(),
            class: browser.attribute(&input, "class").await.ok().flatten(),
            value: browser.attribute(&input, "value").await.ok().flatten(),
        });
    }

    for div in browser.find_all(CONTAINER_SELECTOR, None).await? {
        entries.push(InventoryEntry::Div {
            id: browser.attribute(&div, "id").await.ok().flatten(),
            class: browser.attribute(&div, "class").await.ok().flatten(),
            visible: browser.is_interactable(&div).await.unwrap_or(false),
        });
    }

    Ok(entries)
}
