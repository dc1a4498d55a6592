use anyhow::Context;
use calwatch::browser::snapshot::{SnapshotBrowser, SnapshotFactory};
use calwatch::calendar::BookingTarget;
use calwatch::checker::artifacts::{ArtifactStore, DiscardArtifacts};
use calwatch::checker::{Checker, RunSummary, report};
use calwatch::cli::{Args, Command};
use calwatch::config::Config;
use calwatch::logging::setup_logging;
use calwatch::notify::smtp::SmtpNotifier;
use calwatch::notify::throttle::{FileThrottleStore, ThrottleStore};
use calwatch::notify::{LogNotifier, Notifier};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("calwatch: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);
    let range = match config.date_range() {
        Ok(range) => range,
        Err(e) => {
            error!(error = ?e, "Invalid date range");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting calwatch"
    );

    let result = match args.command {
        None => run_pass(&config).await,
        Some(Command::Replay { files, target_name }) => replay(&config, files, target_name).await,
    };

    match result {
        Ok(summary) => {
            print!("{}", report::render(&summary, &range));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

/// One full pass over the configured targets, with notifications.
async fn run_pass(config: &Config) -> anyhow::Result<RunSummary> {
    let settings = config.check_settings()?;
    let notifier: Box<dyn Notifier> = if config.email.enabled {
        Box::new(SmtpNotifier::new(&config.email).context("Failed to set up SMTP transport")?)
    } else {
        info!("Email disabled, notifications will only be logged");
        Box::new(LogNotifier)
    };

    let store = FileThrottleStore::new(config.throttle_path());
    let throttle = store.load().await;

    let checker = Checker::new(
        config.webdriver(),
        settings,
        Arc::new(ArtifactStore::new(&config.results_dir)),
    );

    let start = Instant::now();
    info!(
        targets = config.targets.len(),
        check_in = %settings.range.check_in(),
        check_out = %settings.range.check_out(),
        "Starting availability pass"
    );
    let (summary, updated) = checker
        .run_pass(&config.targets, notifier.as_ref(), throttle, Local::now())
        .await;

    if updated != throttle
        && let Err(e) = store.save(updated).await
    {
        warn!(error = %e, "Failed to persist recap record");
    }

    info!(
        duration = calwatch::utils::fmt_duration(start.elapsed()),
        any_available = summary.any_available(),
        alerts = summary.alerts_sent,
        recap = summary.recap_sent,
        "Pass finished"
    );
    Ok(summary)
}

/// Re-run the engine over saved HTML captures. Nothing is sent or written.
async fn replay(
    config: &Config,
    files: Vec<PathBuf>,
    target_name: String,
) -> anyhow::Result<RunSummary> {
    let mut frames = Vec::with_capacity(files.len());
    for file in &files {
        let html = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read capture {}", file.display()))?;
        frames.push(html);
    }

    let first = files.first().context("No captures given")?;
    let target = BookingTarget {
        url: format!("file://{}", first.display()),
        name: target_name,
    };
    let factory =
        SnapshotFactory::new().with_session(&target.name, SnapshotBrowser::replay(frames));

    let mut settings = config.check_settings()?;
    settings.locator_wait = Duration::ZERO;
    settings.cell_wait = Duration::ZERO;
    settings.target_pause = Duration::ZERO;
    settings.navigator.settle_delay = Duration::ZERO;
    settings.navigator.loading_wait = Duration::ZERO;
    settings.navigator.read_wait = Duration::ZERO;
    settings.navigator.max_clicks = u32::try_from(files.len()).unwrap_or(u32::MAX);

    info!(target = %target.name, frames = files.len(), "Replaying saved captures");
    let checker = Checker::new(factory, settings, Arc::new(DiscardArtifacts));
    let outcome = checker.check_target(&target).await;

    Ok(RunSummary {
        outcomes: vec![outcome],
        ..RunSummary::default()
    })
}
