//! Ordered descriptor tables and the resolver that walks them.
//!
//! Vendor markup is unknown ahead of time, so every semantic role maps to a
//! list of structural matchers tried in priority order. The first matcher
//! that yields an element (interactable, when the role needs it) wins.
//! "Not found" is an ordinary outcome, returned as `Ok(None)`.

use crate::browser::{BrowserError, CalendarBrowser};
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// One structural pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Css(String),
    Id(String),
    Class(String),
    /// `<a>` whose text equals the value.
    LinkText(String),
    /// Elements matching `css` whose text equals `text`.
    TextIn { css: String, text: String },
    /// Innermost elements matching `css` whose text contains `text`, so a
    /// wrapper around the text never stands in for its owner.
    TextContains { css: String, text: String },
    /// The control a `<label>` with this exact text points at.
    LabelledInput(String),
}

impl Matcher {
    pub fn css(selector: &str) -> Self {
        Matcher::Css(selector.to_string())
    }

    pub fn id(id: &str) -> Self {
        Matcher::Id(id.to_string())
    }

    pub fn class(class: &str) -> Self {
        Matcher::Class(class.to_string())
    }

    pub fn text_in(css: &str, text: impl Into<String>) -> Self {
        Matcher::TextIn {
            css: css.to_string(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Css(css) => write!(f, "css:{css}"),
            Matcher::Id(id) => write!(f, "id:{id}"),
            Matcher::Class(class) => write!(f, "class:{class}"),
            Matcher::LinkText(text) => write!(f, "link:'{text}'"),
            Matcher::TextIn { css, text } => write!(f, "css:{css} text='{text}'"),
            Matcher::TextContains { css, text } => write!(f, "css:{css} text~'{text}'"),
            Matcher::LabelledInput(label) => write!(f, "label:'{label}'"),
        }
    }
}

/// Semantic roles the engine looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    DateInput,
    CalendarIcon,
    LoadingNotice,
    CalendarRoot,
    MonthHeader,
    MonthPart,
    YearPart,
    MonthSelect,
    YearSelect,
    NextButton,
    ConfirmationHeader,
    DayCell(NaiveDate),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::DateInput => "date-input",
            Role::CalendarIcon => "calendar-icon",
            Role::LoadingNotice => "loading-notice",
            Role::CalendarRoot => "calendar-root",
            Role::MonthHeader => "month-header",
            Role::MonthPart => "month-part",
            Role::YearPart => "year-part",
            Role::MonthSelect => "month-select",
            Role::YearSelect => "year-select",
            Role::NextButton => "next-button",
            Role::ConfirmationHeader => "confirmation-header",
            Role::DayCell(_) => "day-cell",
        }
    }

    /// Roles that get clicked must resolve to something a user could click.
    pub fn requires_interactable(&self) -> bool {
        matches!(
            self,
            Role::DateInput | Role::CalendarIcon | Role::NextButton
        )
    }

    /// Matchers for this role in priority order.
    pub fn descriptors(&self) -> Vec<Matcher> {
        match self {
            Role::DateInput => vec![
                Matcher::class("wxa-input-date-picker"),
                Matcher::css("input.wxa-input-date-picker"),
                Matcher::css("input[name='ArrivalDate']"),
                Matcher::css(".hasDatepicker"),
                Matcher::id("box-widget_ArrivalDate"),
                Matcher::css("input[class*='wxa-input-date-picker']"),
                Matcher::css("input[class*='hasDatepicker']"),
                Matcher::LabelledInput("Check-in".to_string()),
            ],
            Role::CalendarIcon => vec![
                Matcher::css(".icon-ARMKicomooncalendar"),
                Matcher::css(".glyphicon-calendar"),
                Matcher::css(".input-group-addon"),
            ],
            Role::LoadingNotice => vec![Matcher::TextContains {
                css: "div".to_string(),
                text: "update the calendar with current availability".to_string(),
            }],
            Role::CalendarRoot => vec![
                Matcher::css(".ui-datepicker"),
                Matcher::css(".datepicker"),
                Matcher::css(".calendar-container"),
                Matcher::id("ui-datepicker-div"),
            ],
            Role::MonthHeader => vec![
                Matcher::class("ui-datepicker-title"),
                Matcher::css(".ui-datepicker-month"),
                Matcher::css(".datepicker-switch"),
                Matcher::css(".calendar-title"),
            ],
            Role::MonthPart => vec![Matcher::class("ui-datepicker-month")],
            Role::YearPart => vec![Matcher::class("ui-datepicker-year")],
            Role::MonthSelect => vec![
                Matcher::css("select.ui-datepicker-month"),
                Matcher::css("select.month"),
            ],
            Role::YearSelect => vec![
                Matcher::css("select.ui-datepicker-year"),
                Matcher::css("select.year"),
            ],
            Role::NextButton => vec![
                Matcher::class("ui-datepicker-next"),
                Matcher::css(".next"),
                Matcher::css("[title='Next']"),
                Matcher::css(".ui-icon-circle-triangle-e"),
                Matcher::css("a[class*='ui-datepicker-next']"),
                Matcher::css("a[class*='next']"),
                Matcher::css("button[class*='next']"),
                Matcher::LinkText("Next".to_string()),
            ],
            Role::ConfirmationHeader => vec![
                Matcher::css(".ui-datepicker-title"),
                Matcher::css(".month"),
                Matcher::css(".datepicker-switch"),
            ],
            Role::DayCell(date) => day_cell_descriptors(*date),
        }
    }
}

/// Exact date attributes first, then the zero-based month/day/year triplet,
/// then link text in cells that are not an adjacent month's overflow, and a
/// broad text-in-cell match last.
fn day_cell_descriptors(date: NaiveDate) -> Vec<Matcher> {
    let (y, m, d) = (date.year(), date.month(), date.day());
    let day = d.to_string();
    vec![
        Matcher::Css(format!("td[data-date='{y}-{m:02}-{d:02}']")),
        Matcher::Css(format!("td[data-date='{m:02}/{d:02}/{y}']")),
        Matcher::Css(format!("td[data-date='{m:02}-{d:02}-{y}']")),
        Matcher::Css(format!(
            "td[data-month='{}'][data-day='{d}'][data-year='{y}']",
            m - 1
        )),
        Matcher::text_in("td.ui-datepicker-current-month a", day.clone()),
        Matcher::text_in("td:not(.ui-datepicker-other-month) a", day.clone()),
        Matcher::text_in("td[class*='day']:not(.old):not(.new) span", day.clone()),
        Matcher::text_in("td.day:not(.old):not(.new)", day.clone()),
        Matcher::text_in("table td", day),
    ]
}

/// A role resolved to a handle, plus the matcher that found it.
#[derive(Debug, Clone)]
pub struct Resolved<H> {
    pub handle: H,
    pub matcher: Matcher,
}

/// Walks descriptor tables against a live page.
pub struct Resolver<'b, B: CalendarBrowser> {
    browser: &'b B,
    wait: Duration,
    poll: Duration,
}

impl<'b, B: CalendarBrowser> Resolver<'b, B> {
    /// `wait` bounds how long each matcher is polled before moving on.
    pub fn new(browser: &'b B, wait: Duration, poll: Duration) -> Self {
        Self {
            browser,
            wait,
            poll,
        }
    }

    /// Same page, different per-matcher wait.
    pub fn with_wait(&self, wait: Duration) -> Self {
        Self {
            browser: self.browser,
            wait,
            poll: self.poll,
        }
    }

    pub fn browser(&self) -> &'b B {
        self.browser
    }

    /// First element for `role` under `scope` (or the page), or `None`.
    ///
    /// Stale elements seen while polling are skipped; any other browser
    /// failure is returned.
    pub async fn resolve(
        &self,
        role: Role,
        scope: Option<&B::Handle>,
    ) -> Result<Option<Resolved<B::Handle>>, BrowserError> {
        for matcher in role.descriptors() {
            if let Some(handle) = self.poll_matcher(&matcher, role, scope).await? {
                debug!(role = role.name(), matcher = %matcher, "Resolved element");
                return Ok(Some(Resolved { handle, matcher }));
            }
            trace!(role = role.name(), matcher = %matcher, "No match");
        }
        debug!(role = role.name(), "Role not found");
        Ok(None)
    }

    async fn poll_matcher(
        &self,
        matcher: &Matcher,
        role: Role,
        scope: Option<&B::Handle>,
    ) -> Result<Option<B::Handle>, BrowserError> {
        let deadline = Instant::now() + self.wait;
        loop {
            match self.try_matcher(matcher, role, scope).await {
                Ok(Some(handle)) => return Ok(Some(handle)),
                Ok(None) => {}
                Err(e) if e.is_stale() => {
                    trace!(role = role.name(), matcher = %matcher, "Stale while polling");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            time::sleep(self.poll).await;
        }
    }

    async fn try_matcher(
        &self,
        matcher: &Matcher,
        role: Role,
        scope: Option<&B::Handle>,
    ) -> Result<Option<B::Handle>, BrowserError> {
        let candidates = match matcher {
            Matcher::Css(css) => self.browser.find_all(css, scope).await?,
            Matcher::Id(id) => self.browser.find_all(&format!("[id='{id}']"), scope).await?,
            Matcher::Class(class) => self.browser.find_all(&format!(".{class}"), scope).await?,
            Matcher::LinkText(text) => self.with_text("a", scope, |t| t == text).await?,
            Matcher::TextIn { css, text } => self.with_text(css, scope, |t| t == text).await?,
            Matcher::TextContains { css, text } => {
                self.innermost_containing(css, text, scope).await?
            }
            Matcher::LabelledInput(label) => self.labelled_controls(label, scope).await?,
        };

        for candidate in candidates {
            if !role.requires_interactable() || self.browser.is_interactable(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn with_text(
        &self,
        css: &str,
        scope: Option<&B::Handle>,
        accept: impl Fn(&str) -> bool + Send,
    ) -> Result<Vec<B::Handle>, BrowserError> {
        let mut kept = Vec::new();
        for handle in self.browser.find_all(css, scope).await? {
            if accept(&self.browser.text(&handle).await?) {
                kept.push(handle);
            }
        }
        Ok(kept)
    }

    async fn innermost_containing(
        &self,
        css: &str,
        text: &str,
        scope: Option<&B::Handle>,
    ) -> Result<Vec<B::Handle>, BrowserError> {
        let mut innermost = Vec::new();
        for handle in self.with_text(css, scope, |t| t.contains(text)).await? {
            let nested = self
                .with_text(css, Some(&handle), |t| t.contains(text))
                .await?;
            if nested.is_empty() {
                innermost.push(handle);
            }
        }
        Ok(innermost)
    }

    async fn labelled_controls(
        &self,
        label: &str,
        scope: Option<&B::Handle>,
    ) -> Result<Vec<B::Handle>, BrowserError> {
        let mut controls = Vec::new();
        for label_el in self.with_text("label", scope, |t| t == label).await? {
            match self.browser.attribute(&label_el, "for").await? {
                Some(target) if !target.is_empty() => {
                    let css = format!("[id='{target}']");
                    controls.extend(self.browser.find_all(&css, None).await?);
                }
                _ => {
                    controls.extend(self.browser.find_all("input", Some(&label_el)).await?);
                }
            }
        }
        Ok(controls)
    }
}
