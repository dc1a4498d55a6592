//! Terminal rendering of a finished pass.

use super::{RunSummary, TargetOutcome, TargetStatus};
use crate::calendar::DateRange;
use std::fmt::Write;
use yansi::Paint;

const RULE_WIDTH: usize = 60;

/// One status line per target plus any selectable days, colored by outcome.
pub fn render(summary: &RunSummary, range: &DateRange) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);

    let _ = writeln!(out, "{}", rule.dim());
    let _ = writeln!(
        out,
        "{} {} to {}",
        "Results for".bold(),
        range.check_in().format("%B %-d, %Y"),
        range.check_out().format("%B %-d, %Y")
    );
    let _ = writeln!(out, "{}", rule.dim());

    for outcome in &summary.outcomes {
        let name = &outcome.target().name;
        let status = outcome.status();
        let label = status.to_string();
        let painted = match status {
            TargetStatus::AvailabilityFound => label.green().bold(),
            TargetStatus::NoAvailability => label.yellow(),
            TargetStatus::Error => label.red().bold(),
        };
        let _ = writeln!(out, "{name:<32} {painted}");

        match outcome {
            TargetOutcome::Checked(result) => {
                let open: Vec<String> = result
                    .classifications()
                    .values()
                    .filter(|c| c.is_available())
                    .map(|c| c.day.to_string())
                    .collect();
                if !open.is_empty() {
                    let _ = writeln!(out, "    selectable days: {}", open.join(", "));
                }
                if let Some(issue) = result.navigation_issue() {
                    let _ = writeln!(out, "    {}", issue.dim());
                }
            }
            TargetOutcome::Errored { error, .. } => {
                let _ = writeln!(out, "    {}", error.to_string().dim());
            }
        }
    }

    let _ = writeln!(out, "{}", rule.dim());
    let verdict = if summary.any_available() {
        "Availability found for at least one target".green().bold()
    } else {
        "No availability found".yellow().bold()
    };
    let _ = writeln!(out, "{verdict}");
    if summary.alerts_sent > 0 || summary.recap_sent {
        let _ = writeln!(
            out,
            "alerts sent: {}, daily recap sent: {}",
            summary.alerts_sent, summary.recap_sent
        );
    }
    if !summary.notification_failures.is_empty() {
        let _ = writeln!(
            out,
            "{}",
            format!(
                "{} notification(s) failed, see logs",
                summary.notification_failures.len()
            )
            .red()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::BookingTarget;
    use crate::checker::TargetCheckResult;
    use crate::error::CheckError;
    use chrono::NaiveDate;

    #[test]
    fn lists_every_target_with_its_status() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 5, 23).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 24).unwrap(),
        )
        .unwrap();
        let lodge = BookingTarget {
            name: "Lodge".into(),
            url: "https://book.example/lodge".into(),
        };
        let camp = BookingTarget {
            name: "Camp".into(),
            url: "https://book.example/camp".into(),
        };
        let summary = RunSummary {
            outcomes: vec![
                TargetOutcome::Checked(TargetCheckResult::new(lodge, true, Vec::new())),
                TargetOutcome::Errored {
                    target: camp,
                    error: CheckError::SessionFailure("chrome crashed".into()),
                },
            ],
            ..RunSummary::default()
        };

        let text = render(&summary, &range);
        assert!(text.contains("Lodge"));
        assert!(text.contains("NO AVAILABILITY"));
        assert!(text.contains("Camp"));
        assert!(text.contains("ERROR CHECKING"));
        assert!(text.contains("chrome crashed"));
        assert!(text.contains("No availability found"));
    }
}
