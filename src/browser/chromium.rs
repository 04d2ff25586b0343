//! Chrome DevTools driver. Attaches to a browser that is already running;
//! starting and configuring that browser is left to the caller.

use super::{BrowserLauncher, Locator, PageDriver};
use crate::error::ScrapeError;
use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Resolves a locator to an array of elements inside the page.
const FIND_JS: &str = r#"
function __find(kind, q) {
  if (kind === 'xpath') {
    const r = document.evaluate(q, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const out = [];
    for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i));
    return out;
  }
  return Array.from(document.querySelectorAll(q));
}
"#;

fn locator_args(locator: &Locator) -> Result<String, ScrapeError> {
    let (kind, q) = match locator {
        Locator::Css(q) => ("css", q),
        Locator::XPath(q) => ("xpath", q),
    };
    let q = serde_json::to_string(q).map_err(ScrapeError::browser)?;
    Ok(format!("'{}', {}", kind, q))
}

fn script(locator: &Locator, body: &str) -> Result<String, ScrapeError> {
    Ok(format!(
        "(() => {{ {} const els = __find({}); {} }})()",
        FIND_JS,
        locator_args(locator)?,
        body
    ))
}

const CLICK_BODY: &str = r#"
  const el = els.find(e => e.tagName === 'OPTION' || e.offsetParent !== null) || els[0];
  if (!el) return false;
  if (el.tagName === 'OPTION' && el.parentElement) {
    el.selected = true;
    el.parentElement.value = el.value;
    el.parentElement.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
  }
  el.scrollIntoView({ block: 'center' });
  el.click();
  return true;
"#;

const VALUES_BODY: &str = r#"
  return els.map(e => e.isContentEditable ? (e.innerText || '') : (e.value ?? ''));
"#;

fn replace_body(index: usize, text: &str) -> Result<String, ScrapeError> {
    let text = serde_json::to_string(text).map_err(ScrapeError::browser)?;
    Ok(format!(
        r#"
  const el = els[{index}];
  if (!el) return false;
  el.focus();
  if (el.isContentEditable) {{
    el.innerText = {text};
  }} else {{
    el.value = '';
    el.value = {text};
  }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
"#
    ))
}

/// CDP event loop task; aborted when dropped so a driver that never reached
/// `close` does not leave it running.
struct HandlerTask(JoinHandle<()>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ChromiumDriver {
    page: Page,
    _browser: Browser,
    handler: HandlerTask,
}

impl ChromiumDriver {
    /// Connect to a DevTools websocket and open a blank tab.
    pub async fn connect(websocket_url: &str) -> Result<Self, ScrapeError> {
        info!("Attaching to browser at {}", websocket_url);
        let (browser, mut handler) = Browser::connect(websocket_url)
            .await
            .map_err(ScrapeError::browser)?;
        let handler = HandlerTask(tokio::spawn(async move {
            while (handler.next().await).is_some() {}
        }));
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(ScrapeError::browser)?;
        Ok(Self {
            page,
            _browser: browser,
            handler,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, js: String) -> Result<T, ScrapeError> {
        self.page
            .evaluate(js)
            .await
            .map_err(ScrapeError::browser)?
            .into_value::<T>()
            .map_err(ScrapeError::browser)
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.page.goto(url).await.map_err(ScrapeError::browser)?;
        Ok(())
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        self.page.content().await.map_err(ScrapeError::browser)
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool, ScrapeError> {
        self.eval(script(locator, "return els.length > 0;")?).await
    }

    async fn click(&self, locator: &Locator) -> Result<bool, ScrapeError> {
        self.eval(script(locator, CLICK_BODY)?).await
    }

    async fn field_values(&self, locator: &Locator) -> Result<Vec<String>, ScrapeError> {
        self.eval(script(locator, VALUES_BODY)?).await
    }

    async fn replace_text(
        &self,
        locator: &Locator,
        index: usize,
        text: &str,
    ) -> Result<bool, ScrapeError> {
        self.eval(script(locator, &replace_body(index, text)?)?).await
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        debug!("Closing browser tab");
        self.page
            .clone()
            .close()
            .await
            .map_err(ScrapeError::browser)?;
        self.handler.0.abort();
        Ok(())
    }
}

/// Connects to the configured DevTools endpoint on first use.
pub struct ChromiumLauncher {
    websocket_url: String,
}

impl ChromiumLauncher {
    pub fn new(websocket_url: impl Into<String>) -> Self {
        Self {
            websocket_url: websocket_url.into(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        Ok(Box::new(ChromiumDriver::connect(&self.websocket_url).await?))
    }
}
