//! Outbound notifications: the per-target availability alert and the daily
//! recap, plus the transports that deliver them.

pub mod smtp;
pub mod throttle;

use crate::calendar::DateRange;
use crate::calendar::classifier::Verdict;
use crate::checker::{TargetCheckResult, TargetOutcome, TargetStatus};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use std::fmt::Write as _;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid mailbox `{address}`: {reason}")]
    Address { address: String, reason: String },
    #[error("could not build message: {0}")]
    Message(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A composed message. The transport decides who receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when email is disabled: messages only go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            subject = notification.subject.as_str(),
            body = notification.body.as_str(),
            "Email disabled, notification logged only"
        );
        Ok(())
    }
}

fn display_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y (%A)").to_string()
}

fn short_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn target_dates(range: &DateRange) -> String {
    format!(
        "Target dates:\nCheck-in: {}\nCheck-out: {}\n",
        display_date(range.check_in()),
        display_date(range.check_out())
    )
}

/// Immediate alert for a target with at least one selectable day.
pub fn compose_alert(
    result: &TargetCheckResult,
    range: &DateRange,
    detected_at: DateTime<Local>,
) -> Notification {
    let target = result.target();
    let mut body = format!("Potential availability detected at {}!\n\n", target.name);
    body.push_str(&target_dates(range));
    body.push_str("\nStatus of dates in calendar:\n");
    for day in result.classifications().values() {
        let status = match &day.verdict {
            Verdict::Available => "SELECTABLE".to_string(),
            Verdict::Unavailable(reason) => format!("Not selectable ({reason})"),
        };
        let _ = writeln!(body, "{}: {status}", short_date(day.date));
    }
    let _ = write!(
        body,
        "\nTime detected: {}\n\nBook now at: {}\n",
        detected_at.format("%Y-%m-%d %H:%M:%S"),
        target.url
    );

    Notification {
        subject: format!("Availability alert: {}", target.name),
        body,
    }
}

/// Once-a-day summary across every target of the pass.
pub fn compose_recap(
    outcomes: &[TargetOutcome],
    range: &DateRange,
    reported_at: DateTime<Local>,
) -> Notification {
    let any_available = outcomes
        .iter()
        .any(|o| o.status() == TargetStatus::AvailabilityFound);
    let headline = if any_available {
        "Good news! Some availability was detected today. Check the alert emails for details."
    } else {
        "No availability was found today for your desired dates."
    };

    let mut body = format!("Availability checker daily recap\n\n{headline}\n\n");
    body.push_str(&target_dates(range));
    body.push_str("\nSummary of checks:\n");
    for outcome in outcomes {
        let _ = writeln!(body, "{}: {}", outcome.target().name, outcome.status());
    }
    let _ = write!(
        body,
        "\nTime of report: {}\n",
        reported_at.format("%Y-%m-%d %H:%M:%S")
    );

    Notification {
        subject: "Availability checker: daily recap".to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::BookingTarget;
    use crate::calendar::classifier::{DayClassification, UnavailableReason};
    use crate::error::CheckError;
    use chrono::TimeZone;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2025, 5, 23).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 24).unwrap(),
        )
        .unwrap()
    }

    fn lodge() -> BookingTarget {
        BookingTarget {
            name: "Valley Lodge".into(),
            url: "https://book.example/lodge".into(),
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 2, 9, 30, 0).unwrap()
    }

    fn result_with_day_23_open() -> TargetCheckResult {
        let mut open = DayClassification::unresolved(
            NaiveDate::from_ymd_opt(2025, 5, 23).unwrap(),
            UnavailableReason::CellNotFound,
        );
        open.verdict = Verdict::Available;
        let closed = DayClassification::unresolved(
            NaiveDate::from_ymd_opt(2025, 5, 24).unwrap(),
            UnavailableReason::MarkerClass("ui-state-disabled".into()),
        );
        TargetCheckResult::new(lodge(), true, vec![open, closed])
    }

    #[test]
    fn alert_lists_every_day() {
        let alert = compose_alert(&result_with_day_23_open(), &range(), now());
        assert_eq!(alert.subject, "Availability alert: Valley Lodge");
        assert!(alert.body.contains("Check-in: May 23, 2025 (Friday)"));
        assert!(alert.body.contains("May 23, 2025: SELECTABLE"));
        assert!(
            alert
                .body
                .contains("May 24, 2025: Not selectable (marker class `ui-state-disabled`)")
        );
        assert!(alert.body.contains("Time detected: 2025-04-02 09:30:00"));
        assert!(alert.body.contains("Book now at: https://book.example/lodge"));
    }

    #[test]
    fn recap_has_one_line_per_target() {
        let outcomes = vec![
            TargetOutcome::Checked(result_with_day_23_open()),
            TargetOutcome::Errored {
                target: BookingTarget {
                    name: "Curry Village".into(),
                    url: "https://book.example/curry".into(),
                },
                error: CheckError::SessionFailure("connection refused".into()),
            },
        ];
        let recap = compose_recap(&outcomes, &range(), now());
        assert_eq!(recap.subject, "Availability checker: daily recap");
        assert!(recap.body.contains("Good news!"));
        assert!(recap.body.contains("Valley Lodge: POTENTIAL AVAILABILITY"));
        assert!(recap.body.contains("Curry Village: ERROR CHECKING"));
    }
}
