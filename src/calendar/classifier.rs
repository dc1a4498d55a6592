//! Per-day availability verdicts.
//!
//! A day is [`Verdict::Available`] only when its cell was found and every
//! signal agrees: no "N/A" text, no unavailability marker class, no
//! `aria-disabled`, no disabled-looking colors, and the cell is interactable.
//! Anything that could not be read becomes [`Assessment::Unknown`], which
//! [`Assessment::settle`] turns into Unavailable.

use super::locator::{Resolver, Role};
use super::retry::RetryPolicy;
use crate::browser::{BrowserError, CalendarBrowser, CellStyle};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Class tokens that mark a day as not bookable. Matched as substrings of
/// each token, so `day--disabled` counts as `disabled`.
pub const UNAVAILABLE_MARKERS: &[&str] = &[
    "ui-datepicker-unselectable",
    "ui-state-disabled",
    "unavailable",
    "disabled",
    "booked",
    "sold-out",
    "ui-state-inactive",
    "not-available",
    "strikethrough",
];

const DISABLED_BACKGROUNDS: &[&str] = &["rgb(211, 211, 211)", "lightgrey", "gray"];
const DISABLED_FOREGROUNDS: &[&str] = &["rgba(0, 0, 0, 0.3)"];

const NOT_APPLICABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnavailableReason {
    CellNotFound,
    NotApplicableText,
    MarkerClass(String),
    AriaDisabled,
    DisabledStyle(String),
    NotInteractable,
    StaleRead,
    SignalUnreadable(String),
    MonthNotReached,
    MonthUnconfirmed,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CellNotFound => f.write_str("day cell not found"),
            Self::NotApplicableText => f.write_str("cell text reads N/A"),
            Self::MarkerClass(class) => write!(f, "marker class `{class}`"),
            Self::AriaDisabled => f.write_str("aria-disabled"),
            Self::DisabledStyle(color) => write!(f, "disabled-looking color {color}"),
            Self::NotInteractable => f.write_str("cell is not clickable"),
            Self::StaleRead => f.write_str("cell went stale while reading"),
            Self::SignalUnreadable(what) => write!(f, "could not read {what}"),
            Self::MonthNotReached => f.write_str("target month not reached"),
            Self::MonthUnconfirmed => f.write_str("target month not confirmed"),
        }
    }
}

/// Final, externally visible answer for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Available,
    Unavailable(UnavailableReason),
}

impl Verdict {
    pub fn is_available(&self) -> bool {
        matches!(self, Verdict::Available)
    }
}

/// Internal three-way result before settling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Available,
    Unavailable(UnavailableReason),
    /// Signals were missing or unreadable.
    Unknown(UnavailableReason),
}

impl Assessment {
    /// Unknown never leaves the classifier: it settles as Unavailable.
    pub fn settle(self) -> Verdict {
        match self {
            Assessment::Available => Verdict::Available,
            Assessment::Unavailable(reason) | Assessment::Unknown(reason) => {
                Verdict::Unavailable(reason)
            }
        }
    }
}

/// Everything read off one resolved day cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellObservation {
    pub text: String,
    pub classes: BTreeSet<String>,
    pub aria_disabled: bool,
    pub style: Option<CellStyle>,
    pub interactable: bool,
}

impl CellObservation {
    /// Signals are checked cheapest-first; the first one that fires decides.
    pub fn assess(&self) -> Assessment {
        if self.text.contains(NOT_APPLICABLE) {
            return Assessment::Unavailable(UnavailableReason::NotApplicableText);
        }
        if let Some(class) = self.classes.iter().find(|c| is_marker(c)) {
            return Assessment::Unavailable(UnavailableReason::MarkerClass(class.clone()));
        }
        if self.aria_disabled {
            return Assessment::Unavailable(UnavailableReason::AriaDisabled);
        }
        let Some(style) = &self.style else {
            return Assessment::Unknown(UnavailableReason::SignalUnreadable(
                "computed style".to_string(),
            ));
        };
        if let Some(color) = disabled_color(style) {
            return Assessment::Unavailable(UnavailableReason::DisabledStyle(color));
        }
        if !self.interactable {
            return Assessment::Unavailable(UnavailableReason::NotInteractable);
        }
        Assessment::Available
    }
}

fn is_marker(class: &str) -> bool {
    let class = class.to_ascii_lowercase();
    UNAVAILABLE_MARKERS.iter().any(|m| class.contains(m))
}

fn disabled_color(style: &CellStyle) -> Option<String> {
    let background = style.background.to_ascii_lowercase();
    let foreground = style.foreground.to_ascii_lowercase();
    if DISABLED_BACKGROUNDS.iter().any(|c| background.contains(c)) {
        return Some(style.background.clone());
    }
    if DISABLED_FOREGROUNDS.iter().any(|c| foreground.contains(c)) {
        return Some(style.foreground.clone());
    }
    None
}

/// One target day, as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayClassification {
    pub date: NaiveDate,
    pub day: u32,
    pub cell_text: String,
    pub marker_classes: BTreeSet<String>,
    pub style: Option<CellStyle>,
    pub verdict: Verdict,
}

impl DayClassification {
    /// A day whose cell was never inspected.
    pub fn unresolved(date: NaiveDate, reason: UnavailableReason) -> Self {
        Self {
            date,
            day: date.day(),
            cell_text: String::new(),
            marker_classes: BTreeSet::new(),
            style: None,
            verdict: Verdict::Unavailable(reason),
        }
    }

    fn observed(date: NaiveDate, observation: CellObservation, verdict: Verdict) -> Self {
        Self {
            date,
            day: date.day(),
            cell_text: observation.text,
            marker_classes: observation.classes,
            style: observation.style,
            verdict,
        }
    }

    pub fn is_available(&self) -> bool {
        self.verdict.is_available()
    }

    /// Replace the verdict with Unavailable unless it already is.
    pub fn force_unavailable(&mut self, reason: UnavailableReason) {
        if self.verdict.is_available() {
            self.verdict = Verdict::Unavailable(reason);
        }
    }
}

/// Resolves and judges day cells inside the calendar.
pub struct CellClassifier<'r, 'b, B: CalendarBrowser> {
    resolver: &'r Resolver<'b, B>,
    retry: RetryPolicy<BrowserError>,
}

impl<'r, 'b, B: CalendarBrowser> CellClassifier<'r, 'b, B> {
    pub fn new(resolver: &'r Resolver<'b, B>, retry: RetryPolicy<BrowserError>) -> Self {
        Self { resolver, retry }
    }

    /// Only a lost session is an error; every other failure ends up as an
    /// Unavailable verdict.
    pub async fn classify(&self, date: NaiveDate) -> Result<DayClassification, BrowserError> {
        let label = format!("classify day {}", date.day());
        let result = self.retry.run(&label, |_| self.observe(date)).await;

        let classification = match result {
            Ok(None) => DayClassification::unresolved(date, UnavailableReason::CellNotFound),
            Ok(Some(observation)) => {
                let verdict = observation.assess().settle();
                DayClassification::observed(date, observation, verdict)
            }
            Err(BrowserError::Session(msg)) => return Err(BrowserError::Session(msg)),
            Err(e) => {
                let reason = if e.is_stale() {
                    UnavailableReason::StaleRead
                } else {
                    UnavailableReason::SignalUnreadable(e.to_string())
                };
                let verdict = Assessment::Unknown(reason).settle();
                DayClassification::observed(date, CellObservation::default(), verdict)
            }
        };

        match &classification.verdict {
            Verdict::Available => info!(day = classification.day, "Day appears selectable"),
            Verdict::Unavailable(reason) => {
                debug!(day = classification.day, reason = %reason, "Day not selectable")
            }
        }
        Ok(classification)
    }

    /// Resolve the cell fresh and read every signal off it.
    async fn observe(&self, date: NaiveDate) -> Result<Option<CellObservation>, BrowserError> {
        let browser = self.resolver.browser();
        let root = self.resolver.resolve(Role::CalendarRoot, None).await?;
        let scope = root.as_ref().map(|r| &r.handle);

        let Some(found) = self.resolver.resolve(Role::DayCell(date), scope).await? else {
            return Ok(None);
        };
        let matched = found.handle;

        // Links and spans sit inside the cell that carries the classes.
        let tag = browser.tag_name(&matched).await?;
        let cell = if tag == "a" || tag == "span" {
            browser
                .ancestor(&matched, "td")
                .await?
                .unwrap_or_else(|| matched.clone())
        } else {
            matched.clone()
        };

        let text = browser.text(&matched).await?;
        let classes = browser
            .attribute(&cell, "class")
            .await?
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let aria_disabled = is_true(browser.attribute(&cell, "aria-disabled").await?)
            || is_true(browser.attribute(&matched, "aria-disabled").await?);
        let style = match browser.computed_style(&cell).await {
            Ok(style) => Some(style),
            Err(e) if e.is_stale() => return Err(e),
            Err(BrowserError::Session(msg)) => return Err(BrowserError::Session(msg)),
            Err(e) => {
                debug!(day = date.day(), error = %e, "Could not read cell style");
                None
            }
        };
        let interactable = browser.is_interactable(&matched).await?;

        Ok(Some(CellObservation {
            text,
            classes,
            aria_disabled,
            style,
            interactable,
        }))
    }
}

fn is_true(value: Option<String>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
