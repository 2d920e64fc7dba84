//! WebDriver-backed transport for boards that only render results with
//! JavaScript. Needs a running chromedriver (or compatible) server.

use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::debug;

use crate::error::TransportError;
use crate::fetcher::{Transport, TransportResponse};
use crate::profile::RequestProfile;

/// Buttons that reveal more results or a truncated description.
const SHOW_MORE_SELECTORS: &[&str] = &[
    "button.show-more-less-html__button",
    "button.infinite-scroller__show-more-button",
    "button[aria-label*='Show more']",
    "button[aria-label*='See more']",
    "button[data-testid='load-more']",
];

pub struct BrowserTransport {
    server_url: String,
    settle: Duration,
}

impl BrowserTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            settle: Duration::from_secs(3),
        }
    }

    async fn session(&self, profile: &RequestProfile) -> WebDriverResult<WebDriver> {
        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless()?;
        caps.add_arg(&format!("--user-agent={}", profile.user_agent))?;
        if let Some(proxy) = &profile.proxy {
            caps.add_arg(&format!("--proxy-server={}", proxy))?;
        }
        WebDriver::new(&self.server_url, caps).await
    }

    async fn render(&self, driver: &WebDriver, url: &str) -> WebDriverResult<String> {
        driver.goto(url).await?;
        tokio::time::sleep(self.settle).await;

        for selector in SHOW_MORE_SELECTORS {
            if let Ok(button) = driver.find(By::Css(*selector)).await {
                if button.click().await.is_ok() {
                    debug!(url, selector, "expanded page");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    break;
                }
            }
        }
        driver.source().await
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    async fn get(&self, url: &str, profile: &RequestProfile) -> Result<TransportResponse, TransportError> {
        let driver = self
            .session(profile)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let rendered = self.render(&driver, url).await;
        if let Err(e) = driver.quit().await {
            debug!(url, "webdriver session did not close cleanly: {}", e);
        }

        // WebDriver does not expose the HTTP status; bot pages are still
        // caught by the fetcher's body scan.
        let body = rendered.map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(TransportResponse::new(200, body))
    }
}
