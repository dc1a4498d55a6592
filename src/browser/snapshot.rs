//! Static-HTML browser backend.
//!
//! A [`SnapshotBrowser`] holds an ordered list of HTML frames (for example the
//! `*.html` captures the artifact store writes). Reads run against the current
//! frame; registered triggers move to another frame when a matching control is
//! clicked or a matching option is selected. Every frame change bumps a
//! generation counter and handles from an older generation are reported as
//! stale, which is how a re-render looks to the engine.

use super::{BrowserError, CalendarBrowser, CellStyle, SessionFactory};
use crate::calendar::BookingTarget;
use async_trait::async_trait;
use html_scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

const DEFAULT_BACKGROUND: &str = "rgba(0, 0, 0, 0)";
const DEFAULT_FOREGROUND: &str = "rgb(0, 0, 0)";

/// Controls that advance a replay to the next saved capture.
pub const REPLAY_NEXT_CONTROLS: &str = ".ui-datepicker-next, .next, [title='Next'], \
    .ui-icon-circle-triangle-e, a[class*='next'], button[class*='next']";

/// Where a trigger sends the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next,
    Goto(usize),
}

#[derive(Debug, Clone)]
enum Trigger {
    Click { css: String },
    Select { css: String, label: String },
}

/// Opaque reference to an element of one frame generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    generation: u64,
    ordinal: usize,
}

#[derive(Debug, Default)]
struct SnapshotState {
    frame: usize,
    generation: u64,
    url: Option<String>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    frames: Vec<String>,
    triggers: Vec<(Trigger, Transition)>,
    script_transition: Option<Transition>,
    state: Mutex<SnapshotState>,
}

/// Browser over static HTML frames. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct SnapshotBrowser {
    inner: Arc<Inner>,
}

impl SnapshotBrowser {
    pub fn new(frames: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                frames,
                triggers: Vec::new(),
                script_transition: None,
                state: Mutex::new(SnapshotState::default()),
            }),
        }
    }

    /// Frames from saved page captures, in navigation order. Clicking any
    /// next-month control moves to the following capture.
    pub fn replay(frames: Vec<String>) -> Self {
        Self::new(frames).on_click(REPLAY_NEXT_CONTROLS, Transition::Next)
    }

    /// Clicking an element matching `css` applies `transition`.
    pub fn on_click(self, css: &str, transition: Transition) -> Self {
        self.with_trigger(
            Trigger::Click {
                css: css.to_string(),
            },
            transition,
        )
    }

    /// Selecting `label` on a `<select>` matching `css` applies `transition`.
    pub fn on_select(self, css: &str, label: &str, transition: Transition) -> Self {
        self.with_trigger(
            Trigger::Select {
                css: css.to_string(),
                label: label.to_string(),
            },
            transition,
        )
    }

    /// Any script evaluation reports success and applies `transition`.
    pub fn on_script(self, transition: Transition) -> Self {
        let mut inner = self.into_inner();
        inner.script_transition = Some(transition);
        Self {
            inner: Arc::new(inner),
        }
    }

    fn with_trigger(self, trigger: Trigger, transition: Transition) -> Self {
        let mut inner = self.into_inner();
        inner.triggers.push((trigger, transition));
        Self {
            inner: Arc::new(inner),
        }
    }

    fn into_inner(self) -> Inner {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            // Builder methods run before the browser is shared; copy otherwise.
            Err(shared) => {
                let state = lock(&shared.state);
                Inner {
                    frames: shared.frames.clone(),
                    triggers: shared.triggers.clone(),
                    script_transition: shared.script_transition,
                    state: Mutex::new(SnapshotState {
                        frame: state.frame,
                        generation: state.generation,
                        url: state.url.clone(),
                        closed: state.closed,
                    }),
                }
            }
        }
    }

    pub fn current_frame(&self) -> usize {
        lock(&self.inner.state).frame
    }

    pub fn visited_url(&self) -> Option<String> {
        lock(&self.inner.state).url.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Current frame HTML and generation, or an error once the session closed.
    fn current(&self) -> Result<(String, u64), BrowserError> {
        let state = lock(&self.inner.state);
        if state.closed {
            return Err(BrowserError::Session("session already closed".to_string()));
        }
        let html = self
            .inner
            .frames
            .get(state.frame)
            .cloned()
            .ok_or_else(|| BrowserError::Session("no frame loaded".to_string()))?;
        Ok((html, state.generation))
    }

    fn apply(&self, transition: Transition) {
        let mut state = lock(&self.inner.state);
        let last = self.inner.frames.len().saturating_sub(1);
        let target = match transition {
            Transition::Next => (state.frame + 1).min(last),
            Transition::Goto(frame) => frame.min(last),
        };
        if target != state.frame {
            state.frame = target;
            state.generation += 1;
        }
    }

    /// Run `f` against the live element behind `handle`.
    fn with_element<T>(
        &self,
        handle: &SnapshotHandle,
        f: impl FnOnce(ElementRef<'_>) -> T,
    ) -> Result<T, BrowserError> {
        let (html, generation) = self.current()?;
        if handle.generation != generation {
            return Err(BrowserError::Stale(format!(
                "handle from generation {} used at generation {generation}",
                handle.generation
            )));
        }
        let doc = Html::parse_document(&html);
        let element = nth_element(&doc, handle.ordinal).ok_or_else(|| {
            BrowserError::Stale(format!("element #{} no longer exists", handle.ordinal))
        })?;
        Ok(f(element))
    }
}

fn lock(state: &Mutex<SnapshotState>) -> MutexGuard<'_, SnapshotState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_selector(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|_| BrowserError::Command(format!("invalid selector `{css}`")))
}

static ALL_ELEMENTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("*").expect("`*` is a valid selector"));

fn nth_element(doc: &Html, ordinal: usize) -> Option<ElementRef<'_>> {
    doc.select(&ALL_ELEMENTS).nth(ordinal)
}

fn ordinal_of(doc: &Html, element: &ElementRef<'_>) -> Option<usize> {
    doc.select(&ALL_ELEMENTS).position(|e| e.id() == element.id())
}

fn normalized_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `property: value` pairs from the inline `style` attribute, lower-cased keys.
fn inline_style(element: &ElementRef<'_>) -> HashMap<String, String> {
    element
        .value()
        .attr("style")
        .unwrap_or_default()
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            Some((prop.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn is_hidden(element: &ElementRef<'_>) -> bool {
    if element.value().attr("hidden").is_some() {
        return true;
    }
    let style = inline_style(element);
    style.get("display").is_some_and(|v| v == "none")
        || style.get("visibility").is_some_and(|v| v == "hidden")
}

fn parent_element<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element.parent().and_then(ElementRef::wrap)
}

#[async_trait]
impl CalendarBrowser for SnapshotBrowser {
    type Handle = SnapshotHandle;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        if self.inner.frames.is_empty() {
            return Err(BrowserError::Session(format!("nothing to load for {url}")));
        }
        lock(&self.inner.state).url = Some(url.to_string());
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unsupported("screenshot"))
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        Ok(self.current()?.0)
    }

    async fn find_all(
        &self,
        css: &str,
        scope: Option<&SnapshotHandle>,
    ) -> Result<Vec<SnapshotHandle>, BrowserError> {
        let selector = parse_selector(css)?;
        let (html, generation) = self.current()?;
        if let Some(scope) = scope
            && scope.generation != generation
        {
            return Err(BrowserError::Stale("search scope is stale".to_string()));
        }

        let doc = Html::parse_document(&html);
        let matches: Vec<ElementRef<'_>> = match scope {
            Some(scope) => {
                let root = nth_element(&doc, scope.ordinal)
                    .ok_or_else(|| BrowserError::Stale("search scope vanished".to_string()))?;
                root.select(&selector).filter(|e| e.id() != root.id()).collect()
            }
            None => doc.select(&selector).collect(),
        };

        Ok(matches
            .iter()
            .filter_map(|e| ordinal_of(&doc, e))
            .map(|ordinal| SnapshotHandle {
                generation,
                ordinal,
            })
            .collect())
    }

    async fn click(&self, handle: &SnapshotHandle) -> Result<(), BrowserError> {
        let mut fired = None;
        for (trigger, transition) in &self.inner.triggers {
            let Trigger::Click { css } = trigger else {
                continue;
            };
            let selector = parse_selector(css)?;
            if self.with_element(handle, |e| selector.matches(&e))? {
                fired = Some(*transition);
                break;
            }
        }
        // Make sure the handle itself is still live even when nothing fires.
        self.with_element(handle, |_| ())?;
        if let Some(transition) = fired {
            self.apply(transition);
        }
        Ok(())
    }

    async fn text(&self, handle: &SnapshotHandle) -> Result<String, BrowserError> {
        self.with_element(handle, |e| normalized_text(&e))
    }

    async fn attribute(
        &self,
        handle: &SnapshotHandle,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        self.with_element(handle, |e| e.value().attr(name).map(str::to_string))
    }

    async fn tag_name(&self, handle: &SnapshotHandle) -> Result<String, BrowserError> {
        self.with_element(handle, |e| e.value().name().to_ascii_lowercase())
    }

    async fn ancestor(
        &self,
        handle: &SnapshotHandle,
        tag: &str,
    ) -> Result<Option<SnapshotHandle>, BrowserError> {
        let (html, generation) = self.current()?;
        if handle.generation != generation {
            return Err(BrowserError::Stale("ancestor lookup on stale handle".to_string()));
        }
        let doc = Html::parse_document(&html);
        let Some(start) = nth_element(&doc, handle.ordinal) else {
            return Err(BrowserError::Stale("element vanished".to_string()));
        };
        let mut cursor = parent_element(&start);
        while let Some(element) = cursor {
            if element.value().name().eq_ignore_ascii_case(tag) {
                return Ok(ordinal_of(&doc, &element).map(|ordinal| SnapshotHandle {
                    generation,
                    ordinal,
                }));
            }
            cursor = parent_element(&element);
        }
        Ok(None)
    }

    async fn computed_style(&self, handle: &SnapshotHandle) -> Result<CellStyle, BrowserError> {
        self.with_element(handle, |e| {
            let style = inline_style(&e);
            let background = style
                .get("background-color")
                .or_else(|| style.get("background"))
                .cloned()
                .unwrap_or_else(|| DEFAULT_BACKGROUND.to_string());
            let foreground = style
                .get("color")
                .cloned()
                .unwrap_or_else(|| DEFAULT_FOREGROUND.to_string());
            CellStyle {
                background,
                foreground,
            }
        })
    }

    async fn is_interactable(&self, handle: &SnapshotHandle) -> Result<bool, BrowserError> {
        self.with_element(handle, |e| {
            if e.value().attr("disabled").is_some() {
                return false;
            }
            let mut cursor = Some(e);
            while let Some(element) = cursor {
                if is_hidden(&element) {
                    return false;
                }
                cursor = parent_element(&element);
            }
            true
        })
    }

    async fn select_by_label(
        &self,
        handle: &SnapshotHandle,
        label: &str,
    ) -> Result<(), BrowserError> {
        let option = parse_selector("option")?;
        let has_option = self.with_element(handle, |e| {
            e.select(&option).any(|o| normalized_text(&o) == label)
        })?;
        if !has_option {
            return Err(BrowserError::Command(format!("no option labelled `{label}`")));
        }

        let mut fired = None;
        for (trigger, transition) in &self.inner.triggers {
            let Trigger::Select {
                css,
                label: wanted,
            } = trigger
            else {
                continue;
            };
            let selector = parse_selector(css)?;
            if wanted == label && self.with_element(handle, |e| selector.matches(&e))? {
                fired = Some(*transition);
                break;
            }
        }
        if let Some(transition) = fired {
            self.apply(transition);
        }
        Ok(())
    }

    async fn execute(
        &self,
        _script: &str,
        _args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BrowserError> {
        self.current()?;
        match self.inner.script_transition {
            Some(transition) => {
                self.apply(transition);
                Ok(serde_json::Value::Bool(true))
            }
            None => Ok(serde_json::Value::Bool(false)),
        }
    }

    async fn close(&self) -> Result<(), BrowserError> {
        lock(&self.inner.state).closed = true;
        Ok(())
    }
}

/// Hands out pre-built snapshot sessions by target name.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFactory {
    sessions: HashMap<String, SnapshotBrowser>,
}

impl SnapshotFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, target_name: &str, browser: SnapshotBrowser) -> Self {
        self.sessions.insert(target_name.to_string(), browser);
        self
    }
}

#[async_trait]
impl SessionFactory for SnapshotFactory {
    type Browser = SnapshotBrowser;

    async fn open(&self, target: &BookingTarget) -> Result<SnapshotBrowser, BrowserError> {
        self.sessions
            .get(&target.name)
            .cloned()
            .ok_or_else(|| BrowserError::Session(format!("no snapshot for {}", target.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_A: &str = r##"<html><body>
        <div class="cal"><span class="title">April 2025</span>
        <a class="next" href="#">Next</a>
        <table><tr><td class="off" style="background-color: lightgrey">1</td>
        <td><a>2</a></td></tr></table></div>
        <input id="when" disabled>
        <div style="display: none"><button id="ghost">x</button></div>
        </body></html>"##;
    const PAGE_B: &str = r#"<html><body><div class="cal">
        <span class="title">May 2025</span></div></body></html>"#;

    fn browser() -> SnapshotBrowser {
        SnapshotBrowser::new(vec![PAGE_A.to_string(), PAGE_B.to_string()])
            .on_click("a.next", Transition::Next)
    }

    #[tokio::test]
    async fn click_on_trigger_advances_and_stales_old_handles() {
        let b = browser();
        b.navigate("https://example.test").await.unwrap();
        let next = b.find_all("a.next", None).await.unwrap();
        let title = b.find_all(".title", None).await.unwrap();
        assert_eq!(b.text(&title[0]).await.unwrap(), "April 2025");

        b.click(&next[0]).await.unwrap();
        assert_eq!(b.current_frame(), 1);
        assert!(b.text(&title[0]).await.unwrap_err().is_stale());

        let title = b.find_all(".title", None).await.unwrap();
        assert_eq!(b.text(&title[0]).await.unwrap(), "May 2025");
    }

    #[tokio::test]
    async fn scoped_search_and_ancestor() {
        let b = browser();
        let cal = b.find_all(".cal", None).await.unwrap();
        let links = b.find_all("td a", Some(&cal[0])).await.unwrap();
        assert_eq!(links.len(), 1);
        let td = b.ancestor(&links[0], "td").await.unwrap().unwrap();
        assert_eq!(b.tag_name(&td).await.unwrap(), "td");
        assert_eq!(b.text(&td).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn inline_style_and_interactability() {
        let b = browser();
        let off = b.find_all("td.off", None).await.unwrap();
        let style = b.computed_style(&off[0]).await.unwrap();
        assert_eq!(style.background, "lightgrey");
        assert_eq!(style.foreground, DEFAULT_FOREGROUND);

        let input = b.find_all("#when", None).await.unwrap();
        assert!(!b.is_interactable(&input[0]).await.unwrap());
        let ghost = b.find_all("#ghost", None).await.unwrap();
        assert!(!b.is_interactable(&ghost[0]).await.unwrap());
        let next = b.find_all("a.next", None).await.unwrap();
        assert!(b.is_interactable(&next[0]).await.unwrap());
    }

    #[tokio::test]
    async fn empty_snapshot_fails_to_load() {
        let b = SnapshotBrowser::new(Vec::new());
        assert!(matches!(
            b.navigate("https://example.test").await,
            Err(BrowserError::Session(_))
        ));
    }

    #[tokio::test]
    async fn closed_session_rejects_reads() {
        let b = browser();
        b.close().await.unwrap();
        assert!(b.is_closed());
        assert!(b.page_source().await.is_err());
    }
}
