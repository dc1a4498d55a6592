//! Drives the widget from whatever month it opens on to the target month.
//!
//! ```text
//! Unknown ──open/read──▶ Navigating ──header matches──▶ Confirmed
//!                             │
//!                             └── click cap hit / no next control ──▶ Failed
//! ```
//!
//! Direct month/year selection is tried once before stepping with the
//! "next" control. Every step leaves a screenshot checkpoint behind.

use super::TargetMonth;
use super::locator::{Resolver, Role};
use super::retry::RetryPolicy;
use crate::browser::{BrowserError, CalendarBrowser};
use crate::checker::artifacts::{Capture, Checkpoints};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

/// Three years of monthly stepping.
pub const MAX_MONTH_CLICKS: u32 = 36;

/// Script setters tried in order when no control opens the widget.
/// Arguments: year, zero-based month, `MM/DD/YYYY` of the first day.
const DATE_SETTER_SCRIPTS: &[&str] = &[
    r#"if (window.jQuery && jQuery('.hasDatepicker').datepicker) {
        jQuery('.hasDatepicker').datepicker('setDate', new Date(arguments[0], arguments[1], 1));
        return true;
    }
    return false;"#,
    r#"if (window.jQuery && jQuery('.wxa-input-date-picker').bootstrapDP) {
        jQuery('.wxa-input-date-picker').bootstrapDP('update', new Date(arguments[0], arguments[1], 1));
        return true;
    }
    return false;"#,
    r#"var input = document.querySelector('input.wxa-input-date-picker')
        || document.querySelector('input.hasDatepicker')
        || document.querySelector('[name="ArrivalDate"]');
    if (!input) { return false; }
    input.value = arguments[2];
    input.dispatchEvent(new Event('change', { bubbles: true }));
    if (window.jQuery) { jQuery(input).trigger('change'); }
    return true;"#,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationPhase {
    Unknown,
    Navigating,
    Confirmed,
    Failed,
}

/// Mutated only by [`MonthNavigator`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NavigationState {
    pub current_label: Option<String>,
    pub attempted_clicks: u32,
    pub reached_target: bool,
}

/// How the widget got opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opener {
    DateInput,
    CalendarIcon,
    Script,
    /// Nothing worked; the page may still show an inline calendar.
    Nothing,
}

/// How the target month was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    AlreadyShown,
    DirectSelect,
    Stepping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    ClickCapReached,
    NextControlMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Confirmed(Route),
    Failed(FailureCause),
}

#[derive(Debug, Clone, Copy)]
pub struct NavigatorSettings {
    /// Clamped to [`MAX_MONTH_CLICKS`].
    pub max_clicks: u32,
    /// Pause after anything that makes the widget re-render.
    pub settle_delay: Duration,
    /// Upper bound for the loading notice to go away.
    pub loading_wait: Duration,
    /// Per-matcher wait for header and dropdown reads.
    pub read_wait: Duration,
    pub stale_retry: RetryPolicy<BrowserError>,
}

pub struct MonthNavigator<'a, B: CalendarBrowser> {
    resolver: &'a Resolver<'a, B>,
    checkpoints: &'a Checkpoints<'a>,
    target: TargetMonth,
    settings: NavigatorSettings,
    phase: NavigationPhase,
    state: NavigationState,
}

impl<'a, B: CalendarBrowser> MonthNavigator<'a, B> {
    pub fn new(
        resolver: &'a Resolver<'a, B>,
        checkpoints: &'a Checkpoints<'a>,
        target: TargetMonth,
        mut settings: NavigatorSettings,
    ) -> Self {
        settings.max_clicks = settings.max_clicks.min(MAX_MONTH_CLICKS);
        Self {
            resolver,
            checkpoints,
            target,
            settings,
            phase: NavigationPhase::Unknown,
            state: NavigationState::default(),
        }
    }

    pub fn phase(&self) -> NavigationPhase {
        self.phase
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    fn browser(&self) -> &'a B {
        self.resolver.browser()
    }

    /// Open the widget: click the date input, else a calendar icon, else set
    /// the date through the widget's script API and re-click the input. Then
    /// wait out the availability loading notice.
    pub async fn open_widget(&mut self) -> Result<Opener, BrowserError> {
        let opener = if self.click_role(Role::DateInput).await? {
            Opener::DateInput
        } else if self.click_role(Role::CalendarIcon).await? {
            Opener::CalendarIcon
        } else if self.run_date_setters().await? {
            self.checkpoints
                .capture(self.browser(), "after_js", Capture::SCREENSHOT)
                .await;
            let quick = self.resolver.with_wait(self.settings.read_wait);
            if let Some(input) = quick.resolve(Role::DateInput, None).await? {
                self.browser().click(&input.handle).await?;
                debug!("Re-clicked date input after script update");
            }
            Opener::Script
        } else {
            warn!("Could not open the calendar widget");
            Opener::Nothing
        };
        info!(opener = ?opener, "Calendar widget opening attempted");

        time::sleep(self.settings.settle_delay).await;
        self.wait_for_loading_notice().await?;
        Ok(opener)
    }

    /// Resolve a control and click it, re-resolving on stale handles.
    async fn click_role(&self, role: Role) -> Result<bool, BrowserError> {
        let resolver = self.resolver;
        self.settings
            .stale_retry
            .run(role.name(), move |_| async move {
                match resolver.resolve(role, None).await? {
                    Some(found) => {
                        resolver.browser().click(&found.handle).await?;
                        debug!(role = role.name(), matcher = %found.matcher, "Clicked");
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .await
    }

    async fn run_date_setters(&self) -> Result<bool, BrowserError> {
        let Some(first) = self.target.first_day() else {
            return Ok(false);
        };
        let args = vec![
            json!(self.target.year),
            json!(self.target.month - 1),
            json!(first.format("%m/%d/%Y").to_string()),
        ];
        for (index, script) in DATE_SETTER_SCRIPTS.iter().enumerate() {
            match self.browser().execute(script, args.clone()).await {
                Ok(value) if value.as_bool() == Some(true) => {
                    info!(script = index, "Set calendar date through script");
                    time::sleep(self.settings.settle_delay).await;
                    return Ok(true);
                }
                Ok(_) => trace!(script = index, "Date setter not applicable"),
                Err(BrowserError::Session(msg)) => return Err(BrowserError::Session(msg)),
                Err(e) => debug!(script = index, error = %e, "Date setter failed"),
            }
        }
        Ok(false)
    }

    /// A displayed notice means availability is still loading.
    async fn wait_for_loading_notice(&self) -> Result<(), BrowserError> {
        let immediate = self.resolver.with_wait(Duration::ZERO);
        let deadline = Instant::now() + self.settings.loading_wait;
        loop {
            let visible = match immediate.resolve(Role::LoadingNotice, None).await? {
                Some(notice) => match self.browser().is_interactable(&notice.handle).await {
                    Ok(shown) => shown,
                    Err(e) if e.is_stale() => false,
                    Err(e) => return Err(e),
                },
                None => false,
            };
            if !visible {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Loading notice did not disappear, calendar may be incomplete");
                self.checkpoints
                    .capture(self.browser(), "loading_state", Capture::SCREENSHOT)
                    .await;
                return Ok(());
            }
            time::sleep(self.settings.settle_delay.min(Duration::from_millis(500))).await;
        }
    }

    /// Run the machine to a terminal phase.
    pub async fn navigate(&mut self) -> Result<NavigationOutcome, BrowserError> {
        self.phase = NavigationPhase::Navigating;

        if self.read_and_check().await? {
            return Ok(self.confirm(Route::AlreadyShown));
        }

        if self.select_directly().await? {
            time::sleep(self.settings.settle_delay).await;
            self.checkpoints
                .capture(self.browser(), "direct_select", Capture::SCREENSHOT)
                .await;
            if self.read_and_check().await? {
                return Ok(self.confirm(Route::DirectSelect));
            }
            debug!(
                current = self.state.current_label.as_deref().unwrap_or(""),
                "Direct selection did not land on the target month"
            );
        }

        while self.state.attempted_clicks < self.settings.max_clicks {
            let step = self.state.attempted_clicks;
            self.checkpoints
                .capture(self.browser(), &format!("month_{step}"), Capture::SCREENSHOT)
                .await;

            if !self.click_role(Role::NextButton).await? {
                warn!(clicks = step, "Next-month control not found");
                self.checkpoints
                    .capture(self.browser(), "next_button_missing", Capture::BOTH)
                    .await;
                return Ok(self.fail(FailureCause::NextControlMissing));
            }
            self.state.attempted_clicks += 1;
            time::sleep(self.settings.settle_delay).await;

            let clicks = self.state.attempted_clicks;
            self.checkpoints
                .capture(
                    self.browser(),
                    &format!("after_click_{clicks}"),
                    Capture::SCREENSHOT,
                )
                .await;

            if self.read_and_check().await? {
                return Ok(self.confirm(Route::Stepping));
            }
        }

        Ok(self.fail(FailureCause::ClickCapReached))
    }

    fn confirm(&mut self, route: Route) -> NavigationOutcome {
        self.phase = NavigationPhase::Confirmed;
        self.state.reached_target = true;
        info!(
            month = %self.target,
            route = ?route,
            clicks = self.state.attempted_clicks,
            "Reached target month"
        );
        NavigationOutcome::Confirmed(route)
    }

    fn fail(&mut self, cause: FailureCause) -> NavigationOutcome {
        self.phase = NavigationPhase::Failed;
        warn!(
            month = %self.target,
            cause = ?cause,
            clicks = self.state.attempted_clicks,
            last_view = self.state.current_label.as_deref().unwrap_or("unknown"),
            "Could not reach target month"
        );
        NavigationOutcome::Failed(cause)
    }

    /// Refresh `current_label` and test it against the target month, also
    /// accepting separate month and year nodes.
    async fn read_and_check(&mut self) -> Result<bool, BrowserError> {
        let reader = &self.resolver.with_wait(self.settings.read_wait);
        let target = self.target;
        let (label, split_match) = self
            .settings
            .stale_retry
            .run("read month header", move |_| read_header(reader, target))
            .await?;

        match &label {
            Some(text) => debug!(current = text.as_str(), "Calendar view"),
            None => debug!("Month header not found"),
        }
        let matched = split_match || label.as_deref().is_some_and(|l| target.header_matches(l));
        self.state.current_label = label;
        Ok(matched)
    }

    /// Set month and year dropdowns by visible label. Failures other than a
    /// lost session fall back to stepping.
    async fn select_directly(&self) -> Result<bool, BrowserError> {
        let reader = &self.resolver.with_wait(self.settings.read_wait);
        let target = self.target;
        let result = self
            .settings
            .stale_retry
            .run("direct month select", move |_| select_month(reader, target))
            .await;
        match result {
            Ok(selected) => Ok(selected),
            Err(BrowserError::Session(msg)) => Err(BrowserError::Session(msg)),
            Err(e) => {
                warn!(error = %e, "Direct month selection failed, stepping instead");
                Ok(false)
            }
        }
    }
}

async fn read_header<B: CalendarBrowser>(
    reader: &Resolver<'_, B>,
    target: TargetMonth,
) -> Result<(Option<String>, bool), BrowserError> {
    let browser = reader.browser();
    let Some(header) = reader.resolve(Role::MonthHeader, None).await? else {
        return Ok((None, false));
    };
    let label = browser.text(&header.handle).await?;

    let month = reader.resolve(Role::MonthPart, None).await?;
    let year = reader.resolve(Role::YearPart, None).await?;
    let split_match = match (month, year) {
        (Some(month), Some(year)) => {
            let month_text = browser.text(&month.handle).await?;
            let year_text = browser.text(&year.handle).await?;
            trace!(month = month_text.as_str(), year = year_text.as_str(), "Split header");
            target.parts_match(&month_text, &year_text)
        }
        _ => false,
    };
    Ok((Some(label), split_match))
}

async fn select_month<B: CalendarBrowser>(
    reader: &Resolver<'_, B>,
    target: TargetMonth,
) -> Result<bool, BrowserError> {
    let browser = reader.browser();
    let (Some(month), Some(_)) = (
        reader.resolve(Role::MonthSelect, None).await?,
        reader.resolve(Role::YearSelect, None).await?,
    ) else {
        trace!("No month/year dropdowns");
        return Ok(false);
    };
    browser.select_by_label(&month.handle, target.name()).await?;

    // Picking the month can re-render the year dropdown.
    let Some(year) = reader.resolve(Role::YearSelect, None).await? else {
        return Ok(false);
    };
    browser
        .select_by_label(&year.handle, &target.year.to_string())
        .await?;
    info!(month = %target, "Set month/year dropdowns directly");
    Ok(true)
}
