#![allow(dead_code)]

use async_trait::async_trait;
use calwatch::browser::snapshot::{SnapshotBrowser, SnapshotFactory};
use calwatch::calendar::navigator::NavigatorSettings;
use calwatch::calendar::retry::RetryPolicy;
use calwatch::calendar::{BookingTarget, DateRange, WeekStart};
use calwatch::checker::CheckSettings;
use calwatch::notify::{Notification, Notifier, NotifyError};
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};
use std::sync::Mutex;
use std::time::Duration;

/// Check-in May 23, check-out May 26, 2025. May 1 is a Thursday.
pub fn range() -> DateRange {
    DateRange::new(date(2025, 5, 23), date(2025, 5, 26)).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(year, month, day, 9, 30, 0)
        .single()
        .unwrap()
}

pub fn target(name: &str) -> BookingTarget {
    BookingTarget {
        name: name.to_string(),
        url: format!("https://book.example/{}", name.to_lowercase()),
    }
}

/// No waiting anywhere; snapshot pages are fully rendered.
pub fn settings() -> CheckSettings {
    let stale_retry = RetryPolicy::stale(Duration::ZERO);
    CheckSettings {
        range: range(),
        week_start: WeekStart::Sunday,
        locator_wait: Duration::ZERO,
        cell_wait: Duration::ZERO,
        poll_interval: Duration::ZERO,
        target_pause: Duration::ZERO,
        stale_retry,
        navigator: NavigatorSettings {
            max_clicks: 36,
            settle_delay: Duration::ZERO,
            loading_wait: Duration::ZERO,
            read_wait: Duration::ZERO,
            stale_retry,
        },
    }
}

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        date(year + 1, 1, 1)
    } else {
        date(year, month + 1, 1)
    };
    next.pred_opt().unwrap().day()
}

fn day_cell(day: u32, open: bool) -> String {
    if open {
        format!(
            r##"<td class="ui-datepicker-current-month" data-handler="selectDay"><a class="ui-state-default" href="#">{day}</a></td>"##
        )
    } else {
        format!(
            r#"<td class="ui-datepicker-current-month ui-datepicker-unselectable ui-state-disabled"><span class="ui-state-default">{day}</span></td>"#
        )
    }
}

fn grid(year: i32, month: u32, offset: usize, open_days: &[u32]) -> String {
    let filler = r#"<td class="ui-datepicker-other-month"></td>"#.to_string();
    let mut cells = vec![filler.clone(); offset];
    for day in 1..=days_in_month(year, month) {
        cells.push(day_cell(day, open_days.contains(&day)));
    }
    while cells.len() % 7 != 0 {
        cells.push(filler.clone());
    }
    cells
        .chunks(7)
        .map(|week| format!("<tr>{}</tr>", week.concat()))
        .collect()
}

fn page(header: &str, rows: &str) -> String {
    format!(
        r#"<html><body>
        <label for="arrival">Check-in</label>
        <input id="arrival" class="hasDatepicker" name="ArrivalDate" type="text">
        <div id="ui-datepicker-div" class="ui-datepicker">
          <div class="ui-datepicker-header">
            <a class="ui-datepicker-prev" title="Prev">Prev</a>
            <a class="ui-datepicker-next" title="Next">Next</a>
            {header}
          </div>
          <table class="ui-datepicker-calendar">
            <thead><tr><th>Su</th><th>Mo</th><th>Tu</th><th>We</th><th>Th</th><th>Fr</th><th>Sa</th></tr></thead>
            <tbody>{rows}</tbody>
          </table>
        </div>
        </body></html>"#
    )
}

/// A jQuery UI style month view, Sunday first, with `open_days` selectable.
pub fn month_page(year: i32, month: u32, open_days: &[u32]) -> String {
    let name = MONTHS[month as usize - 1];
    let offset = date(year, month, 1).weekday().num_days_from_sunday() as usize;
    page(
        &format!(r#"<div class="ui-datepicker-title">{name} {year}</div>"#),
        &grid(year, month, offset, open_days),
    )
}

/// May 2025 labelled only by separate month and year nodes, with the grid
/// drawn two columns off. Navigation accepts it, confirmation cannot.
pub fn misaligned_may(open_days: &[u32]) -> String {
    page(
        r#"<span class="ui-datepicker-month">May</span>&nbsp;<span class="ui-datepicker-year">2025</span>"#,
        &grid(2025, 5, 2, open_days),
    )
}

pub fn session(frames: Vec<String>) -> SnapshotBrowser {
    SnapshotBrowser::replay(frames)
}

pub fn factory(sessions: &[(&str, &SnapshotBrowser)]) -> SnapshotFactory {
    sessions
        .iter()
        .fold(SnapshotFactory::new(), |factory, (name, browser)| {
            factory.with_session(name, (*browser).clone())
        })
}

/// Keeps every message; optionally refuses all of them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError::Transport("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
