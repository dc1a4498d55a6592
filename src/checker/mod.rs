//! Check orchestrator.
//!
//! One pass visits every booking target in order, one browser session at a
//! time, with a pause in between. A failing target is reported as errored
//! and never stops the pass.

pub mod artifacts;
pub mod report;

use crate::browser::{BrowserError, CalendarBrowser, SessionFactory};
use crate::calendar::classifier::{CellClassifier, DayClassification, UnavailableReason};
use crate::calendar::locator::{Resolver, Role};
use crate::calendar::navigator::{FailureCause, MonthNavigator, NavigationOutcome, NavigatorSettings};
use crate::calendar::oracle::ConfirmationOracle;
use crate::calendar::retry::RetryPolicy;
use crate::calendar::{BookingTarget, DateRange, WeekStart};
use crate::error::CheckError;
use crate::notify::throttle::ThrottleState;
use crate::notify::{Notifier, compose_alert, compose_recap};
use crate::utils::{fmt_duration, log_if_slow};
use artifacts::{ArtifactSink, Capture, Checkpoints};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};

const SLOW_PAGE_LOAD: Duration = Duration::from_secs(15);
const SLOW_TARGET_CHECK: Duration = Duration::from_secs(120);

/// Everything a check needs besides the session itself.
#[derive(Debug, Clone, Copy)]
pub struct CheckSettings {
    pub range: DateRange,
    pub week_start: WeekStart,
    /// Per-matcher wait for controls that should be on the page.
    pub locator_wait: Duration,
    /// Per-matcher wait for day cells and header reads.
    pub cell_wait: Duration,
    pub poll_interval: Duration,
    pub target_pause: Duration,
    pub stale_retry: RetryPolicy<BrowserError>,
    pub navigator: NavigatorSettings,
}

/// Per-target result. The constructors enforce that an unconfirmed month
/// never reports an available day.
#[derive(Debug, Clone, Serialize)]
pub struct TargetCheckResult {
    target: BookingTarget,
    calendar_confirmed: bool,
    classifications: BTreeMap<u32, DayClassification>,
    any_available: bool,
    navigation_issue: Option<String>,
}

impl TargetCheckResult {
    pub fn new(
        target: BookingTarget,
        calendar_confirmed: bool,
        days: Vec<DayClassification>,
    ) -> Self {
        let mut classifications = BTreeMap::new();
        for mut day in days {
            if !calendar_confirmed {
                day.force_unavailable(UnavailableReason::MonthUnconfirmed);
            }
            classifications.insert(day.day, day);
        }
        let any_available =
            calendar_confirmed && classifications.values().any(DayClassification::is_available);
        Self {
            target,
            calendar_confirmed,
            classifications,
            any_available,
            navigation_issue: None,
        }
    }

    /// The target month was never shown; every day is Unavailable.
    pub fn unreached(target: BookingTarget, range: &DateRange, issue: CheckError) -> Self {
        let days = range
            .dates()
            .into_iter()
            .map(|date| DayClassification::unresolved(date, UnavailableReason::MonthNotReached))
            .collect();
        let mut result = Self::new(target, false, days);
        result.navigation_issue = Some(issue.to_string());
        result
    }

    pub fn target(&self) -> &BookingTarget {
        &self.target
    }

    pub fn calendar_confirmed(&self) -> bool {
        self.calendar_confirmed
    }

    pub fn classifications(&self) -> &BTreeMap<u32, DayClassification> {
        &self.classifications
    }

    pub fn any_available(&self) -> bool {
        self.any_available
    }

    pub fn navigation_issue(&self) -> Option<&str> {
        self.navigation_issue.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    AvailabilityFound,
    NoAvailability,
    Error,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetStatus::AvailabilityFound => "POTENTIAL AVAILABILITY",
            TargetStatus::NoAvailability => "NO AVAILABILITY",
            TargetStatus::Error => "ERROR CHECKING",
        })
    }
}

#[derive(Debug)]
pub enum TargetOutcome {
    Checked(TargetCheckResult),
    Errored {
        target: BookingTarget,
        error: CheckError,
    },
}

impl TargetOutcome {
    pub fn target(&self) -> &BookingTarget {
        match self {
            TargetOutcome::Checked(result) => result.target(),
            TargetOutcome::Errored { target, .. } => target,
        }
    }

    pub fn status(&self) -> TargetStatus {
        match self {
            TargetOutcome::Checked(result) if result.any_available() => {
                TargetStatus::AvailabilityFound
            }
            TargetOutcome::Checked(_) => TargetStatus::NoAvailability,
            TargetOutcome::Errored { .. } => TargetStatus::Error,
        }
    }

    pub fn result(&self) -> Option<&TargetCheckResult> {
        match self {
            TargetOutcome::Checked(result) => Some(result),
            TargetOutcome::Errored { .. } => None,
        }
    }
}

/// What one pass produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TargetOutcome>,
    pub alerts_sent: usize,
    pub recap_sent: bool,
    pub notification_failures: Vec<CheckError>,
}

impl RunSummary {
    pub fn any_available(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status() == TargetStatus::AvailabilityFound)
    }
}

pub struct Checker<F: SessionFactory> {
    factory: F,
    settings: CheckSettings,
    artifacts: Arc<dyn ArtifactSink>,
}

impl<F: SessionFactory> Checker<F> {
    pub fn new(factory: F, settings: CheckSettings, artifacts: Arc<dyn ArtifactSink>) -> Self {
        Self {
            factory,
            settings,
            artifacts,
        }
    }

    /// Check every target, send alerts as they come in, then the recap if
    /// the throttle allows. Returns the throttle state to persist.
    pub async fn run_pass<N: Notifier + ?Sized>(
        &self,
        targets: &[BookingTarget],
        notifier: &N,
        mut throttle: ThrottleState,
        now: DateTime<Local>,
    ) -> (RunSummary, ThrottleState) {
        let mut summary = RunSummary::default();

        for (index, target) in targets.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.target_pause).await;
            }

            let outcome = self.check_target(target).await;
            if let Some(result) = outcome.result().filter(|r| r.any_available()) {
                let alert = compose_alert(result, &self.settings.range, now);
                match notifier.send(&alert).await {
                    Ok(()) => summary.alerts_sent += 1,
                    Err(e) => {
                        error!(target = %target.name, error = %e, "Failed to send availability alert");
                        summary.notification_failures.push(e.into());
                    }
                }
            }
            summary.outcomes.push(outcome);
        }

        let today = now.date_naive();
        if throttle.is_due(today) {
            let recap = compose_recap(&summary.outcomes, &self.settings.range, now);
            match notifier.send(&recap).await {
                Ok(()) => {
                    throttle.mark_sent(today);
                    summary.recap_sent = true;
                    info!(date = %today, "Daily recap sent");
                }
                Err(e) => {
                    error!(error = %e, "Failed to send daily recap");
                    summary.notification_failures.push(e.into());
                }
            }
        } else {
            debug!(date = %today, "Daily recap already sent today, skipping");
        }

        (summary, throttle)
    }

    /// Run one target end to end. The session is closed on every path.
    pub async fn check_target(&self, target: &BookingTarget) -> TargetOutcome {
        let span = info_span!("check_target", target = %target.name);
        async move {
            let start = Instant::now();
            info!(url = %target.url, "Checking calendar");

            let browser = match self.factory.open(target).await {
                Ok(browser) => browser,
                Err(e) => {
                    error!(error = %e, "Could not open browser session");
                    return TargetOutcome::Errored {
                        target: target.clone(),
                        error: CheckError::SessionFailure(e.to_string()),
                    };
                }
            };

            let checkpoints = Checkpoints::new(self.artifacts.as_ref(), &target.name);
            let result = self.inspect(&browser, target, &checkpoints).await;
            if let Err(e) = &result {
                if e.is_fatal() {
                    error!(error = %e, "Target check failed");
                } else {
                    warn!(error = %e, "Target check stopped early");
                }
                checkpoints.debug_capture(&browser, "general_error").await;
            }
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Failed to close browser session");
            }

            log_if_slow(start, SLOW_TARGET_CHECK, "target check");
            let outcome = match result {
                Ok(result) => TargetOutcome::Checked(result),
                Err(error) => TargetOutcome::Errored {
                    target: target.clone(),
                    error,
                },
            };
            info!(
                status = %outcome.status(),
                duration = fmt_duration(start.elapsed()),
                "Target check finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn inspect<B: CalendarBrowser>(
        &self,
        browser: &B,
        target: &BookingTarget,
        checkpoints: &Checkpoints<'_>,
    ) -> Result<TargetCheckResult, CheckError> {
        let settings = &self.settings;

        let load_start = Instant::now();
        browser
            .navigate(&target.url)
            .await
            .map_err(|e| CheckError::SessionFailure(e.to_string()))?;
        log_if_slow(load_start, SLOW_PAGE_LOAD, "booking page load");
        checkpoints.capture(browser, "initial", Capture::BOTH).await;

        let resolver = Resolver::new(browser, settings.locator_wait, settings.poll_interval);
        let month = settings.range.target_month();
        let mut navigator = MonthNavigator::new(&resolver, checkpoints, month, settings.navigator);
        navigator.open_widget().await?;
        checkpoints.capture(browser, "calendar_open", Capture::BOTH).await;

        if let NavigationOutcome::Failed(cause) = navigator.navigate().await? {
            let state = navigator.state();
            let issue = match cause {
                FailureCause::NextControlMissing => CheckError::LocatorNotFound {
                    role: Role::NextButton.name(),
                },
                FailureCause::ClickCapReached => CheckError::NavigationTimeout {
                    clicks: state.attempted_clicks,
                    last_view: state
                        .current_label
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                },
            };
            info!(issue = %issue, "No availability: target month unreachable");
            return Ok(TargetCheckResult::unreached(
                target.clone(),
                &settings.range,
                issue,
            ));
        }
        checkpoints.capture(browser, "target_month", Capture::BOTH).await;

        let reader = &resolver.with_wait(settings.cell_wait);
        let oracle = &ConfirmationOracle::new(month, settings.week_start);
        let confirmation = settings
            .stale_retry
            .run("confirm month", move |_| oracle.confirm(reader))
            .await?;

        let classifier = CellClassifier::new(reader, settings.stale_retry);
        let mut days = Vec::new();
        for date in settings.range.dates() {
            let day = classifier.classify(date).await?;
            checkpoints
                .capture(browser, &format!("day_{}", day.day), Capture::SCREENSHOT)
                .await;
            days.push(day);
        }

        let result = TargetCheckResult::new(target.clone(), confirmation.confirmed(), days);
        if !result.calendar_confirmed() {
            warn!("Month could not be confirmed, all days reported unavailable");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::classifier::Verdict;
    use chrono::NaiveDate;

    fn target() -> BookingTarget {
        BookingTarget {
            name: "Lodge".into(),
            url: "https://book.example".into(),
        }
    }

    fn available(day: u32) -> DayClassification {
        let mut c = DayClassification::unresolved(
            NaiveDate::from_ymd_opt(2025, 5, day).unwrap(),
            UnavailableReason::CellNotFound,
        );
        c.verdict = Verdict::Available;
        c
    }

    #[test]
    fn unconfirmed_month_overrides_every_verdict() {
        let result = TargetCheckResult::new(target(), false, vec![available(23), available(24)]);
        assert!(!result.any_available());
        for day in result.classifications().values() {
            assert_eq!(
                day.verdict,
                Verdict::Unavailable(UnavailableReason::MonthUnconfirmed)
            );
        }
    }

    #[test]
    fn confirmed_month_keeps_verdicts() {
        let result = TargetCheckResult::new(target(), true, vec![available(23)]);
        assert!(result.any_available());
        assert_eq!(
            TargetOutcome::Checked(result).status(),
            TargetStatus::AvailabilityFound
        );
    }

    #[test]
    fn unreached_month_is_no_availability_not_error() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 5, 23).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 26).unwrap(),
        )
        .unwrap();
        let result = TargetCheckResult::unreached(
            target(),
            &range,
            CheckError::NavigationTimeout {
                clicks: 36,
                last_view: "April 2028".into(),
            },
        );
        assert_eq!(result.classifications().len(), 4);
        assert!(result.navigation_issue().unwrap().contains("36 clicks"));
        assert_eq!(
            TargetOutcome::Checked(result).status(),
            TargetStatus::NoAvailability
        );
        assert_eq!(TargetStatus::NoAvailability.to_string(), "NO AVAILABILITY");
    }
}
