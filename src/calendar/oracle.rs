//! Second opinion on which month the calendar is showing.
//!
//! The header text comes from the vendor and can lag behind the grid, so it
//! is checked alongside a structural fingerprint: in the first week row, the
//! column for the target month's first weekday has to read `1`.

use super::locator::{Resolver, Role};
use super::{TargetMonth, WeekStart};
use crate::browser::{BrowserError, CalendarBrowser};
use serde::Serialize;
use tracing::{debug, warn};

const DAYS_PER_WEEK: usize = 7;

/// Outcome of both checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonthConfirmation {
    pub header_text: Option<String>,
    pub textual: bool,
    pub structural: bool,
}

impl MonthConfirmation {
    /// Either check passing is enough.
    pub fn confirmed(&self) -> bool {
        self.textual || self.structural
    }
}

pub struct ConfirmationOracle {
    target: TargetMonth,
    week_start: WeekStart,
}

impl ConfirmationOracle {
    pub fn new(target: TargetMonth, week_start: WeekStart) -> Self {
        Self { target, week_start }
    }

    /// Run both checks against the current page. Lookups are fresh on every
    /// call, so this is safe to wrap in a stale retry.
    pub async fn confirm<B: CalendarBrowser>(
        &self,
        resolver: &Resolver<'_, B>,
    ) -> Result<MonthConfirmation, BrowserError> {
        let browser = resolver.browser();
        let root = resolver.resolve(Role::CalendarRoot, None).await?;
        let scope = root.as_ref().map(|r| &r.handle);

        let header_text = match resolver.resolve(Role::ConfirmationHeader, scope).await? {
            Some(header) => Some(browser.text(&header.handle).await?),
            None => None,
        };
        let textual = header_text
            .as_deref()
            .is_some_and(|text| self.textual_match(text));

        let structural = self.first_row_alignment(browser, scope).await?;

        let confirmation = MonthConfirmation {
            header_text,
            textual,
            structural,
        };
        if confirmation.confirmed() {
            debug!(month = %self.target, textual, structural, "Month confirmed");
        } else {
            warn!(
                month = %self.target,
                header = confirmation.header_text.as_deref().unwrap_or(""),
                "Could not confirm target month"
            );
        }
        Ok(confirmation)
    }

    fn textual_match(&self, header: &str) -> bool {
        header.contains(self.target.name()) && header.contains(&self.target.year.to_string())
    }

    /// The first row holding a full week of `<td>` cells is the first week.
    /// Header rows use `<th>` and are skipped naturally.
    async fn first_row_alignment<B: CalendarBrowser>(
        &self,
        browser: &B,
        scope: Option<&B::Handle>,
    ) -> Result<bool, BrowserError> {
        let Some(column) = self.target.first_column(self.week_start) else {
            return Ok(false);
        };

        for row in browser.find_all("tr", scope).await? {
            let cells = browser.find_all("td", Some(&row)).await?;
            if cells.len() < DAYS_PER_WEEK {
                continue;
            }
            let text = browser.text(&cells[column]).await?;
            debug!(column, text = text.as_str(), "First week row inspected");
            return Ok(text == "1");
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::snapshot::SnapshotBrowser;
    use std::time::Duration;

    const MAY: TargetMonth = TargetMonth {
        year: 2025,
        month: 5,
    };

    fn calendar(title: &str, first_week: &[&str]) -> String {
        let cells: String = first_week
            .iter()
            .map(|d| format!("<td>{d}</td>"))
            .collect();
        format!(
            r#"<html><body><div class="ui-datepicker">
            <div class="ui-datepicker-title">{title}</div>
            <table><thead><tr><th>Su</th><th>Mo</th><th>Tu</th><th>We</th><th>Th</th><th>Fr</th><th>Sa</th></tr></thead>
            <tbody><tr>{cells}</tr></tbody></table></div></body></html>"#
        )
    }

    async fn confirm(html: String, week_start: WeekStart) -> MonthConfirmation {
        let browser = SnapshotBrowser::new(vec![html]);
        let resolver = Resolver::new(&browser, Duration::ZERO, Duration::ZERO);
        ConfirmationOracle::new(MAY, week_start)
            .confirm(&resolver)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn both_checks_pass_on_the_right_month() {
        let c = confirm(
            calendar("May 2025", &["", "", "", "", "1", "2", "3"]),
            WeekStart::Sunday,
        )
        .await;
        assert!(c.textual);
        assert!(c.structural);
        assert_eq!(c.header_text.as_deref(), Some("May 2025"));
    }

    #[tokio::test]
    async fn stale_header_is_rescued_by_the_grid() {
        let c = confirm(
            calendar("April 2025", &["", "", "", "", "1", "2", "3"]),
            WeekStart::Sunday,
        )
        .await;
        assert!(!c.textual);
        assert!(c.structural);
        assert!(c.confirmed());
    }

    #[tokio::test]
    async fn adjacent_month_fails_both_checks() {
        // April 2025 starts on a Tuesday.
        let c = confirm(
            calendar("April 2025", &["", "", "1", "2", "3", "4", "5"]),
            WeekStart::Sunday,
        )
        .await;
        assert!(!c.confirmed());
    }

    #[tokio::test]
    async fn monday_grids_shift_the_column() {
        let monday = calendar("", &["", "", "", "1", "2", "3", "4"]);
        assert!(confirm(monday.clone(), WeekStart::Monday).await.structural);
        assert!(!confirm(monday, WeekStart::Sunday).await.structural);
    }
}
