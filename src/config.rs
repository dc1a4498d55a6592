//! Layered configuration.
//!
//! Built-in defaults, then `calwatch.toml` (or the file given with
//! `--config`), then `CALWATCH_*` environment variables with `__` between
//! nested keys (`CALWATCH_EMAIL__PASSWORD`).

use crate::browser::webdriver::WebDriverFactory;
use crate::calendar::navigator::{MAX_MONTH_CLICKS, NavigatorSettings};
use crate::calendar::retry::RetryPolicy;
use crate::calendar::{BookingTarget, DateRange, WeekStart};
use crate::checker::CheckSettings;
use anyhow::{Context, bail, ensure};
use chrono::NaiveDate;
use custom_debug_derive::Debug as CustomDebug;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "calwatch.toml";
const ENV_PREFIX: &str = "CALWATCH_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default)]
    pub targets: Vec<BookingTarget>,
    #[serde(default)]
    pub week_start: WeekStart,
    #[serde(default = "default_max_month_clicks")]
    pub max_month_clicks: u32,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub email: EmailConfig,
}

/// Waits and pauses, written as `"10s"`, `"250ms"` or plain seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timing {
    #[serde(deserialize_with = "deserialize_duration")]
    pub locator_wait: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub cell_wait: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub stale_retry_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub target_pause: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub page_load_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            locator_wait: Duration::from_secs(10),
            cell_wait: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_secs(2),
            stale_retry_delay: Duration::from_secs(1),
            target_pause: Duration::from_secs(2),
            page_load_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(CustomDebug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    #[debug(with = "crate::fmt::redacted")]
    pub password: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            sender: None,
            recipient: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_true() -> bool {
    true
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_max_month_clicks() -> u32 {
    MAX_MONTH_CLICKS
}

/// Parse `"10s"`, `"250ms"`, `"1m"`; a bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let parser =
        DurationParser::with_time_units(&[TimeUnit::MilliSecond, TimeUnit::Second, TimeUnit::Minute]);
    let parsed = parser
        .parse(text.trim())
        .map_err(|e| format!("invalid duration `{text}`: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration `{text}`: {e}"))
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load from defaults, file and environment, then validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let figment = Figment::new()
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
            .with_context(|| format!("Failed to load config (file: {})", file.display()))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment.extract().context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.date_range()?;
        ensure!(!self.targets.is_empty(), "at least one target is required");
        for target in &self.targets {
            let url = url::Url::parse(&target.url)
                .with_context(|| format!("target `{}` has an invalid url", target.name))?;
            ensure!(
                matches!(url.scheme(), "http" | "https"),
                "target `{}` url must be http(s), got `{}`",
                target.name,
                url.scheme()
            );
        }
        if self.email.enabled {
            ensure!(
                self.email.sender.is_some() && self.email.recipient.is_some(),
                "email.sender and email.recipient are required when email is enabled"
            );
        }
        Ok(())
    }

    pub fn date_range(&self) -> anyhow::Result<DateRange> {
        DateRange::new(self.check_in, self.check_out).context("Invalid check_in/check_out")
    }

    /// Engine settings. Called after logging is up, so the clamp warning is seen.
    pub fn check_settings(&self) -> anyhow::Result<CheckSettings> {
        let timing = &self.timing;
        let max_clicks = self.max_month_clicks.min(MAX_MONTH_CLICKS);
        if max_clicks < self.max_month_clicks {
            warn!(
                configured = self.max_month_clicks,
                cap = MAX_MONTH_CLICKS,
                "max_month_clicks above the hard cap, clamping"
            );
        }
        let stale_retry = RetryPolicy::stale(timing.stale_retry_delay);
        Ok(CheckSettings {
            range: self.date_range()?,
            week_start: self.week_start,
            locator_wait: timing.locator_wait,
            cell_wait: timing.cell_wait,
            poll_interval: timing.poll_interval,
            target_pause: timing.target_pause,
            stale_retry,
            navigator: NavigatorSettings {
                max_clicks,
                settle_delay: timing.settle_delay,
                loading_wait: timing.locator_wait,
                read_wait: timing.cell_wait,
                stale_retry,
            },
        })
    }

    pub fn webdriver(&self) -> WebDriverFactory {
        WebDriverFactory {
            webdriver_url: self.webdriver_url.clone(),
            headless: self.headless,
            user_agent: self.user_agent.clone(),
            page_load_timeout: self.timing.page_load_timeout,
        }
    }

    pub fn throttle_path(&self) -> PathBuf {
        self.results_dir.join("last_recap.txt")
    }
}
