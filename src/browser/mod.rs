//! Rendering seam. Pages are rendered and evaluated elsewhere; this crate
//! only asks for candidate texts or the result of an extraction expression.

pub mod error;

pub use error::{BrowserError, Result};

use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

/// One rendered page, reused across sources within a run.
#[async_trait::async_trait]
pub trait Page: Send + Sync {
    /// Navigate to `url`, optionally waiting until `wait_for` matches.
    async fn goto(&self, url: &str, wait_for: Option<&str>) -> Result<()>;

    /// Evaluate a JS expression in the rendered page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Visible text of every element matching `selector`.
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;
}

/// JS expression returning `innerText` of every node matching `selector`.
pub fn texts_expression(selector: &str) -> String {
    // serde_json gives a correctly escaped JS string literal
    let lit = Value::String(selector.to_string()).to_string();
    format!("Array.from(document.querySelectorAll({lit})).map(e => (e.innerText || e.textContent || '').trim())")
}

const FUNCTION_CODE: &str = r#"export default async function ({ page, context }) {
  await page.goto(context.url, { waitUntil: "networkidle2", timeout: context.navTimeoutMs });
  if (context.waitFor) {
    await page.waitForSelector(context.waitFor, { timeout: context.navTimeoutMs }).catch(() => null);
  }
  const data = await page.evaluate(context.expression);
  return { data, type: "application/json" };
}"#;

/// Browserless-style rendering service reached over HTTP.
pub struct BrowserlessBrowser {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    nav_timeout: Duration,
}

impl BrowserlessBrowser {
    /// Build a client and probe the service; failure here means no browser
    /// for the run.
    pub async fn connect(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("community-events-sync/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(90))
            .build()?;

        let browser = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            nav_timeout: Duration::from_secs(45),
        };

        let resp = browser
            .client
            .get(browser.endpoint("json/version"))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message,
            });
        }
        tracing::info!(base_url = %browser.base_url, "rendering service reachable");
        Ok(browser)
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait::async_trait]
impl Browser for BrowserlessBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        Ok(Box::new(BrowserlessPage {
            client: self.client.clone(),
            endpoint: self.endpoint("function"),
            nav_timeout: self.nav_timeout,
            target: Mutex::new(None),
        }))
    }
}

#[derive(Debug, Clone)]
struct Target {
    url: String,
    wait_for: Option<String>,
}

/// The service is stateless, so a "page" is the last navigation target and
/// every evaluation renders it afresh.
pub struct BrowserlessPage {
    client: reqwest::Client,
    endpoint: String,
    nav_timeout: Duration,
    target: Mutex<Option<Target>>,
}

#[async_trait::async_trait]
impl Page for BrowserlessPage {
    async fn goto(&self, url: &str, wait_for: Option<&str>) -> Result<()> {
        let mut t = self.target.lock().unwrap_or_else(|e| e.into_inner());
        *t = Some(Target {
            url: url.to_string(),
            wait_for: wait_for.map(String::from),
        });
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let target = self
            .target
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(BrowserError::NoPage)?;

        let body = json!({
            "code": FUNCTION_CODE,
            "context": {
                "url": target.url,
                "waitFor": target.wait_for,
                "expression": expression,
                "navTimeoutMs": self.nav_timeout.as_millis() as u64,
            }
        });

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let value = self.evaluate(&texts_expression(selector)).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Payload(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.target.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}
