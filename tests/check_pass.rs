//! Full passes over snapshot calendars: navigation, confirmation,
//! classification, alerts and the daily recap.

mod helpers;

use calwatch::calendar::classifier::{UnavailableReason, Verdict};
use calwatch::checker::artifacts::{DiscardArtifacts, MemoryArtifacts};
use calwatch::checker::{Checker, TargetOutcome, TargetStatus};
use calwatch::error::CheckError;
use calwatch::notify::throttle::{MemoryThrottleStore, ThrottleState, ThrottleStore};
use helpers::{
    RecordingNotifier, at, factory, misaligned_may, month_page, session, settings, target,
};
use std::sync::Arc;

const RECAP: &str = "Availability checker: daily recap";

#[tokio::test]
async fn fully_booked_month_sends_no_alert() {
    let lodge = session(vec![month_page(2025, 5, &[1, 2, 3])]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );
    let notifier = RecordingNotifier::default();

    let (summary, _) = checker
        .run_pass(&[target("Lodge")], &notifier, ThrottleState::default(), at(2025, 4, 2))
        .await;

    assert_eq!(summary.outcomes[0].status(), TargetStatus::NoAvailability);
    let result = summary.outcomes[0].result().unwrap();
    assert!(result.calendar_confirmed());
    assert_eq!(result.classifications().len(), 4);
    for day in result.classifications().values() {
        assert!(matches!(
            day.verdict,
            Verdict::Unavailable(UnavailableReason::MarkerClass(_))
        ));
    }
    assert_eq!(summary.alerts_sent, 0);
    assert_eq!(notifier.subjects(), vec![RECAP.to_string()]);
}

#[tokio::test]
async fn one_open_day_triggers_an_alert_listing_it() {
    let lodge = session(vec![month_page(2025, 5, &[23])]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );
    let notifier = RecordingNotifier::default();

    let (summary, _) = checker
        .run_pass(&[target("Lodge")], &notifier, ThrottleState::default(), at(2025, 4, 2))
        .await;

    let result = summary.outcomes[0].result().unwrap();
    assert!(result.any_available());
    assert!(result.classifications()[&23].is_available());
    assert!(!result.classifications()[&24].is_available());
    assert_eq!(summary.alerts_sent, 1);

    let sent = notifier.sent();
    assert_eq!(sent[0].subject, "Availability alert: Lodge");
    assert!(sent[0].body.contains("May 23, 2025: SELECTABLE"));
    assert!(sent[0].body.contains("May 24, 2025: Not selectable"));
    assert!(sent[0].body.contains("https://book.example/lodge"));
    assert!(sent[0].body.contains("Time detected: 2025-04-02 09:30:00"));
    assert!(sent[1].body.contains("Lodge: POTENTIAL AVAILABILITY"));
}

#[tokio::test]
async fn steps_forward_from_an_earlier_month() {
    let lodge = session(vec![
        month_page(2025, 3, &[23, 24]),
        month_page(2025, 4, &[23, 24]),
        month_page(2025, 5, &[25]),
    ]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );

    let outcome = checker.check_target(&target("Lodge")).await;

    assert_eq!(lodge.current_frame(), 2);
    assert_eq!(
        lodge.visited_url().as_deref(),
        Some("https://book.example/lodge")
    );
    let result = outcome.result().unwrap();
    let open: Vec<u32> = result
        .classifications()
        .values()
        .filter(|d| d.is_available())
        .map(|d| d.day)
        .collect();
    assert_eq!(open, vec![25]);
}

#[tokio::test]
async fn unreachable_month_stops_at_the_click_cap() {
    let stuck = session(vec![month_page(2020, 1, &[23]), month_page(2020, 1, &[23])]);
    let checker = Checker::new(
        factory(&[("Lodge", &stuck)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );

    let outcome = checker.check_target(&target("Lodge")).await;

    assert_eq!(outcome.status(), TargetStatus::NoAvailability);
    let result = outcome.result().unwrap();
    assert!(!result.calendar_confirmed());
    assert!(result.navigation_issue().unwrap().contains("36 clicks"));
    assert!(result.navigation_issue().unwrap().contains("January 2020"));
    for day in result.classifications().values() {
        assert_eq!(
            day.verdict,
            Verdict::Unavailable(UnavailableReason::MonthNotReached)
        );
    }
}

#[tokio::test]
async fn unconfirmed_month_never_reports_availability() {
    let lodge = session(vec![misaligned_may(&[23, 24, 25, 26])]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );
    let notifier = RecordingNotifier::default();

    let (summary, _) = checker
        .run_pass(&[target("Lodge")], &notifier, ThrottleState::default(), at(2025, 4, 2))
        .await;

    let result = summary.outcomes[0].result().unwrap();
    assert!(!result.calendar_confirmed());
    assert!(!result.any_available());
    assert!(result.classifications().values().all(|d| d.verdict
        == Verdict::Unavailable(UnavailableReason::MonthUnconfirmed)));
    assert_eq!(summary.alerts_sent, 0);
    assert_eq!(notifier.subjects(), vec![RECAP.to_string()]);
}

#[tokio::test]
async fn failing_target_does_not_stop_the_pass() {
    let lodge = session(vec![month_page(2025, 5, &[26])]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );
    let notifier = RecordingNotifier::default();

    let (summary, _) = checker
        .run_pass(
            &[target("Ghost"), target("Lodge")],
            &notifier,
            ThrottleState::default(),
            at(2025, 4, 2),
        )
        .await;

    assert!(matches!(
        &summary.outcomes[0],
        TargetOutcome::Errored {
            error: CheckError::SessionFailure(_),
            ..
        }
    ));
    assert_eq!(summary.outcomes[0].status(), TargetStatus::Error);
    assert_eq!(summary.outcomes[1].status(), TargetStatus::AvailabilityFound);
    assert_eq!(summary.alerts_sent, 1);

    let recap = notifier.sent().pop().unwrap();
    assert!(recap.body.contains("Ghost: ERROR CHECKING"));
    assert!(recap.body.contains("Lodge: POTENTIAL AVAILABILITY"));
}

#[tokio::test]
async fn session_is_closed_on_success_and_on_failure() {
    let good = session(vec![month_page(2025, 5, &[])]);
    let broken = session(Vec::new());
    let sink = Arc::new(MemoryArtifacts::default());
    let checker = Checker::new(
        factory(&[("Lodge", &good), ("Broken", &broken)]),
        settings(),
        sink.clone(),
    );

    let ok = checker.check_target(&target("Lodge")).await;
    let failed = checker.check_target(&target("Broken")).await;

    assert_eq!(ok.status(), TargetStatus::NoAvailability);
    assert_eq!(failed.status(), TargetStatus::Error);
    assert!(good.is_closed());
    assert!(broken.is_closed());

    let paths = sink.paths();
    for expected in [
        "lodge_initial.html",
        "lodge_calendar_open.html",
        "lodge_target_month.html",
    ] {
        assert!(paths.iter().any(|p| p == expected), "missing {expected}");
    }
}

#[tokio::test]
async fn recap_goes_out_once_per_day() {
    let notifier = RecordingNotifier::default();
    let store = MemoryThrottleStore::default();
    let targets = [target("Lodge")];

    for now in [at(2025, 4, 2), at(2025, 4, 2), at(2025, 4, 3)] {
        // Each pass gets a fresh session, as a new process would.
        let lodge = session(vec![month_page(2025, 5, &[])]);
        let checker = Checker::new(
            factory(&[("Lodge", &lodge)]),
            settings(),
            Arc::new(DiscardArtifacts),
        );
        let before = store.load().await;
        let (_, after) = checker.run_pass(&targets, &notifier, before, now).await;
        store.save(after).await.unwrap();
    }

    assert_eq!(notifier.subjects(), vec![RECAP.to_string(), RECAP.to_string()]);
    assert_eq!(
        store.load().await.last_sent(),
        Some(helpers::date(2025, 4, 3))
    );
}

#[tokio::test]
async fn recap_already_sent_today_is_not_repeated() {
    let store = MemoryThrottleStore::new(ThrottleState::new(Some(helpers::date(2025, 4, 2))));
    let lodge = session(vec![month_page(2025, 5, &[])]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );
    let notifier = RecordingNotifier::default();

    let before = store.load().await;
    let (summary, after) = checker
        .run_pass(&[target("Lodge")], &notifier, before, at(2025, 4, 2))
        .await;

    assert!(!summary.recap_sent);
    assert!(notifier.subjects().is_empty());
    assert_eq!(after, before);
}

#[tokio::test]
async fn failed_recap_leaves_the_throttle_untouched() {
    let lodge = session(vec![month_page(2025, 5, &[24])]);
    let checker = Checker::new(
        factory(&[("Lodge", &lodge)]),
        settings(),
        Arc::new(DiscardArtifacts),
    );
    let notifier = RecordingNotifier::failing();

    let (summary, after) = checker
        .run_pass(&[target("Lodge")], &notifier, ThrottleState::default(), at(2025, 4, 2))
        .await;

    assert_eq!(summary.outcomes[0].status(), TargetStatus::AvailabilityFound);
    assert_eq!(summary.alerts_sent, 0);
    assert!(!summary.recap_sent);
    assert_eq!(summary.notification_failures.len(), 2);
    assert!(matches!(
        summary.notification_failures[0],
        CheckError::NotificationTransportFailure(_)
    ));
    assert_eq!(after, ThrottleState::default());
}
