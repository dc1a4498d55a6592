//! Calendar location and classification engine.
//!
//! The pieces run in this order for one booking target:
//! [`locator`] finds widget parts through ordered descriptor lists,
//! [`navigator`] drives the widget to the target month, [`oracle`]
//! corroborates that month independently, and [`classifier`] decides each
//! target day. [`retry`] wraps every step that reuses a DOM handle.

pub mod classifier;
pub mod locator;
pub mod navigator;
pub mod oracle;
pub mod retry;

use chrono::{Datelike, Month, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A booking site to watch. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingTarget {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateRangeError {
    #[error("check-in {check_in} is after check-out {check_out}")]
    Reversed {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    #[error("check-in {check_in} and check-out {check_out} must fall in the same month")]
    SpansMonths {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
}

/// The stay being watched. Every day from check-in to check-out inclusive is a
/// target day, and all of them sit in one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl DateRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, DateRangeError> {
        if check_in > check_out {
            return Err(DateRangeError::Reversed {
                check_in,
                check_out,
            });
        }
        if (check_in.year(), check_in.month()) != (check_out.year(), check_out.month()) {
            return Err(DateRangeError::SpansMonths {
                check_in,
                check_out,
            });
        }
        Ok(Self {
            check_in,
            check_out,
        })
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn target_month(&self) -> TargetMonth {
        TargetMonth {
            year: self.check_in.year(),
            month: self.check_in.month(),
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.check_in
            .iter_days()
            .take_while(|d| *d <= self.check_out)
            .collect()
    }

    /// Day-of-month numbers of every target day.
    pub fn target_days(&self) -> Vec<u32> {
        self.dates().iter().map(Datelike::day).collect()
    }
}

/// First column of the rendered calendar grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Sunday,
    Monday,
}

/// The month the calendar has to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetMonth {
    pub year: i32,
    /// 1-based.
    pub month: u32,
}

impl TargetMonth {
    /// English month name, e.g. `May`.
    pub fn name(&self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("")
    }

    /// Canonical header label, e.g. `May 2025`.
    pub fn label(&self) -> String {
        format!("{} {}", self.name(), self.year)
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn date(&self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day)
    }

    /// Zero-based grid column that holds day 1.
    pub fn first_column(&self, week_start: WeekStart) -> Option<usize> {
        let weekday: Weekday = self.first_day()?.weekday();
        let column = match week_start {
            WeekStart::Sunday => weekday.num_days_from_sunday(),
            WeekStart::Monday => weekday.num_days_from_monday(),
        };
        Some(column as usize)
    }

    /// Month-match predicate for header text: the exact label, or text
    /// containing both the month name and the year as separate substrings.
    pub fn header_matches(&self, header: &str) -> bool {
        let header = header.trim();
        if header == self.label() {
            return true;
        }
        header.contains(self.name()) && header.contains(&self.year.to_string())
    }

    /// Match for widgets that render month and year in separate nodes.
    pub fn parts_match(&self, month_text: &str, year_text: &str) -> bool {
        month_text.trim() == self.name() && year_text.trim() == self.year.to_string()
    }
}

impl fmt::Display for TargetMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn range_days_are_inclusive() {
        let range = DateRange::new(date(2025, 5, 23), date(2025, 5, 26)).unwrap();
        assert_eq!(range.target_days(), vec![23, 24, 25, 26]);
        assert_eq!(range.target_month().label(), "May 2025");
    }

    #[test]
    fn range_rejects_reversed_and_cross_month() {
        assert!(matches!(
            DateRange::new(date(2025, 5, 26), date(2025, 5, 23)),
            Err(DateRangeError::Reversed { .. })
        ));
        assert!(matches!(
            DateRange::new(date(2025, 5, 30), date(2025, 6, 2)),
            Err(DateRangeError::SpansMonths { .. })
        ));
    }

    #[test]
    fn header_match_is_permissive() {
        let may = TargetMonth {
            year: 2025,
            month: 5,
        };
        assert!(may.header_matches("May 2025"));
        assert!(may.header_matches("  May\n2025 "));
        assert!(may.header_matches("Prev Next May 2025"));
        assert!(!may.header_matches("April 2025"));
        assert!(!may.header_matches("May 2026"));
        assert!(!may.header_matches(""));
    }

    #[test]
    fn separate_parts_match_exactly() {
        let may = TargetMonth {
            year: 2025,
            month: 5,
        };
        assert!(may.parts_match(" May", "2025 "));
        assert!(!may.parts_match("Mayo", "2025"));
    }

    #[test]
    fn first_column_follows_week_start() {
        // 1 May 2025 is a Thursday.
        let may = TargetMonth {
            year: 2025,
            month: 5,
        };
        assert_eq!(may.first_column(WeekStart::Sunday), Some(4));
        assert_eq!(may.first_column(WeekStart::Monday), Some(3));
    }
}
