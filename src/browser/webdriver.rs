//! Chrome over the W3C WebDriver protocol (chromedriver, selenium, ...).

use super::{BrowserError, CalendarBrowser, CellStyle, SessionFactory};
use crate::calendar::BookingTarget;
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::wd::TimeoutConfiguration;
use fantoccini::{Client, ClientBuilder, Locator};
use std::time::Duration;
use tracing::{debug, info};

const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--window-size=1920,1080",
    "--disable-extensions",
    "--disable-gpu",
];

/// Connects a fresh Chrome session per booking target.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: Option<String>,
    pub page_load_timeout: Duration,
}

impl WebDriverFactory {
    fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut args: Vec<String> = CHROME_ARGS.iter().map(|a| a.to_string()).collect();
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }

        let mut caps = serde_json::Map::new();
        caps.insert("browserName".to_string(), serde_json::json!("chrome"));
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": args }),
        );
        caps
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    type Browser = WebDriverBrowser;

    async fn open(&self, target: &BookingTarget) -> Result<WebDriverBrowser, BrowserError> {
        debug!(
            target = target.name.as_str(),
            url = self.webdriver_url.as_str(),
            "Connecting to WebDriver"
        );

        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities());
        let client = builder
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| BrowserError::Session(e.to_string()))?;

        client
            .update_timeouts(TimeoutConfiguration::new(
                None,
                Some(self.page_load_timeout),
                None,
            ))
            .await
            .map_err(map_cmd_error)?;

        info!(headless = self.headless, "WebDriver session established");
        Ok(WebDriverBrowser { client })
    }
}

/// A live WebDriver session.
pub struct WebDriverBrowser {
    client: Client,
}

fn map_cmd_error(err: CmdError) -> BrowserError {
    match err {
        CmdError::Standard(wd) if matches!(wd.error, ErrorStatus::StaleElementReference) => {
            BrowserError::Stale(wd.message.to_string())
        }
        CmdError::Standard(wd) if matches!(wd.error, ErrorStatus::JavascriptError) => {
            BrowserError::Script(wd.message.to_string())
        }
        CmdError::Lost(e) => BrowserError::Session(e.to_string()),
        other => BrowserError::Command(other.to_string()),
    }
}

#[async_trait]
impl CalendarBrowser for WebDriverBrowser {
    type Handle = Element;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.client.goto(url).await.map_err(map_cmd_error)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        self.client.screenshot().await.map_err(map_cmd_error)
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.client.source().await.map_err(map_cmd_error)
    }

    async fn find_all(
        &self,
        css: &str,
        scope: Option<&Element>,
    ) -> Result<Vec<Element>, BrowserError> {
        let found = match scope {
            Some(parent) => parent.find_all(Locator::Css(css)).await,
            None => self.client.find_all(Locator::Css(css)).await,
        };
        found.map_err(map_cmd_error)
    }

    async fn click(&self, handle: &Element) -> Result<(), BrowserError> {
        handle.click().await.map_err(map_cmd_error)
    }

    async fn text(&self, handle: &Element) -> Result<String, BrowserError> {
        let text = handle.text().await.map_err(map_cmd_error)?;
        Ok(text.trim().to_string())
    }

    async fn attribute(
        &self,
        handle: &Element,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        handle.attr(name).await.map_err(map_cmd_error)
    }

    async fn tag_name(&self, handle: &Element) -> Result<String, BrowserError> {
        let tag = handle.tag_name().await.map_err(map_cmd_error)?;
        Ok(tag.to_ascii_lowercase())
    }

    async fn ancestor(&self, handle: &Element, tag: &str) -> Result<Option<Element>, BrowserError> {
        let xpath = format!("./ancestor::{tag}[1]");
        let mut found = handle
            .find_all(Locator::XPath(&xpath))
            .await
            .map_err(map_cmd_error)?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    async fn computed_style(&self, handle: &Element) -> Result<CellStyle, BrowserError> {
        let background = handle
            .css_value("background-color")
            .await
            .map_err(map_cmd_error)?;
        let foreground = handle.css_value("color").await.map_err(map_cmd_error)?;
        Ok(CellStyle {
            background,
            foreground,
        })
    }

    async fn is_interactable(&self, handle: &Element) -> Result<bool, BrowserError> {
        let displayed = handle.is_displayed().await.map_err(map_cmd_error)?;
        if !displayed {
            return Ok(false);
        }
        handle.is_enabled().await.map_err(map_cmd_error)
    }

    async fn select_by_label(&self, handle: &Element, label: &str) -> Result<(), BrowserError> {
        handle.select_by_label(label).await.map_err(map_cmd_error)
    }

    async fn execute(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BrowserError> {
        self.client.execute(script, args).await.map_err(map_cmd_error)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.client.clone().close().await.map_err(map_cmd_error)
    }
}
