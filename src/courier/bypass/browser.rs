// Scripted-browser rung - renders the page in headless Chrome so the
// anti-bot challenge script can run, then returns the resulting DOM.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use futures_lite::StreamExt;
use tracing::{debug, warn};

use super::diagnostics::is_challenge_page;
use crate::courier::errors::TransportError;
use crate::courier::models::{HttpRequest, HttpResponse};
use crate::courier::traits::ChallengeSolver;

const STEALTH_JS: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
"#;

/// Polling interval while waiting for the challenge to clear
const POLL_INTERVAL: Duration = Duration::from_millis(1500);

pub struct HeadlessBrowser {
    user_agent: String,
}

impl HeadlessBrowser {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    async fn render(&self, request: &HttpRequest) -> Result<String, TransportError> {
        let ua_arg = format!("--user-agent={}", self.user_agent);
        let args = [
            "--disable-blink-features=AutomationControlled",
            "--disable-infobars",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--no-sandbox",
            "--window-size=1920,1080",
            "--disable-extensions",
            "--no-first-run",
            ua_arg.as_str(),
        ];

        let config = BrowserConfig::builder()
            .viewport(Some(Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: Some(1.0),
                ..Default::default()
            }))
            .args(args)
            .build()
            .map_err(|e| TransportError::Unavailable(format!("browser config error: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed to launch browser: {e}")))?;

        let handle = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let result = async {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| TransportError::Other(format!("failed to create page: {e}")))?;

            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_JS))
                .await
                .ok();

            page.goto(request.url.as_str())
                .await
                .map_err(|e| TransportError::Other(format!("failed to navigate: {e}")))?;

            // Challenge pages reload themselves once solved
            let deadline = tokio::time::Instant::now() + request.timeout;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                let html = page
                    .content()
                    .await
                    .map_err(|e| TransportError::Other(format!("failed to read content: {e}")))?;
                if !is_challenge_page(html.as_bytes()) {
                    return Ok(html);
                }
                if tokio::time::Instant::now() >= deadline {
                    debug!("[Browser] Challenge still present at deadline for {}", request.url);
                    return Ok(html);
                }
            }
        }
        .await;

        if let Err(e) = browser.close().await {
            warn!("[Browser] Failed to close browser: {}", e);
        }
        handle.abort();
        result
    }
}

#[async_trait]
impl ChallengeSolver for HeadlessBrowser {
    fn name(&self) -> &'static str {
        "headless-chrome"
    }

    async fn solve(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!("[Browser] Rendering {}", request.url);
        let html = tokio::time::timeout(request.timeout + Duration::from_secs(10), self.render(request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        Ok(HttpResponse {
            status: 200,
            final_url: request.url.clone(),
            content_type: Some("text/html".to_string()),
            retry_after: None,
            body: html.into_bytes(),
        })
    }
}
