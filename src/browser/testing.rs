//! Scripted in-memory driver for exercising the browser path without Chrome.

use super::{BrowserLauncher, Locator, PageDriver};
use crate::error::ScrapeError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    html: Mutex<String>,
    clickable: HashSet<String>,
    present: HashSet<String>,
    fields: HashMap<String, Vec<String>>,
    swaps: HashMap<String, String>,
    fail_goto: bool,
    hidden_field_reads: usize,
    field_reads: AtomicUsize,
    gotos: Mutex<Vec<String>>,
    clicks: Mutex<Vec<String>>,
    replacements: Mutex<Vec<(String, usize, String)>>,
    closed: AtomicUsize,
}

/// Clones share state, so a test keeps a handle after boxing one.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    inner: Arc<Inner>,
}

impl ScriptedDriver {
    pub fn new(html: &str) -> Self {
        let inner = Inner {
            html: Mutex::new(html.to_string()),
            ..Inner::default()
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut Inner)) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("configure before sharing");
        f(inner);
        self
    }

    pub fn clickable(self, locator: &Locator) -> Self {
        let key = locator.to_string();
        self.edit(|i| {
            i.clickable.insert(key);
        })
    }

    pub fn present(self, locator: &Locator) -> Self {
        let key = locator.to_string();
        self.edit(|i| {
            i.present.insert(key);
        })
    }

    pub fn field(self, locator: &Locator, values: &[&str]) -> Self {
        let key = locator.to_string();
        let values = values.iter().map(|v| v.to_string()).collect();
        self.edit(|i| {
            i.fields.insert(key, values);
        })
    }

    /// Clicking `locator` replaces the page content with `html`.
    pub fn on_click_render(self, locator: &Locator, html: &str) -> Self {
        let key = locator.to_string();
        let html = html.to_string();
        self.edit(|i| {
            i.clickable.insert(key.clone());
            i.swaps.insert(key, html);
        })
    }

    /// Field lookups come back empty until `reads` of them have happened.
    pub fn fields_appear_after(self, reads: usize) -> Self {
        self.edit(|i| i.hidden_field_reads = reads)
    }

    pub fn failing_goto(self) -> Self {
        self.edit(|i| i.fail_goto = true)
    }

    pub fn gotos(&self) -> Vec<String> {
        self.inner.gotos.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.inner.clicks.lock().unwrap().clone()
    }

    pub fn replacements(&self) -> Vec<(String, usize, String)> {
        self.inner.replacements.lock().unwrap().clone()
    }

    pub fn field_reads(&self) -> usize {
        self.inner.field_reads.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.inner.gotos.lock().unwrap().push(url.to_string());
        if self.inner.fail_goto {
            return Err(ScrapeError::browser("navigation failed"));
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        Ok(self.inner.html.lock().unwrap().clone())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool, ScrapeError> {
        if self.inner.present.contains(&locator.to_string()) {
            return Ok(true);
        }
        match locator {
            Locator::Css(css) => {
                let html = self.inner.html.lock().unwrap().clone();
                let doc = Html::parse_document(&html);
                Ok(Selector::parse(css)
                    .map(|sel| doc.select(&sel).next().is_some())
                    .unwrap_or(false))
            }
            Locator::XPath(_) => Ok(false),
        }
    }

    async fn click(&self, locator: &Locator) -> Result<bool, ScrapeError> {
        let key = locator.to_string();
        self.inner.clicks.lock().unwrap().push(key.clone());
        if let Some(html) = self.inner.swaps.get(&key) {
            *self.inner.html.lock().unwrap() = html.clone();
        }
        Ok(self.inner.clickable.contains(&key))
    }

    async fn field_values(&self, locator: &Locator) -> Result<Vec<String>, ScrapeError> {
        let seen = self.inner.field_reads.fetch_add(1, Ordering::SeqCst);
        if seen < self.inner.hidden_field_reads {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .fields
            .get(&locator.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_text(
        &self,
        locator: &Locator,
        index: usize,
        text: &str,
    ) -> Result<bool, ScrapeError> {
        self.inner
            .replacements
            .lock()
            .unwrap()
            .push((locator.to_string(), index, text.to_string()));
        Ok(true)
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out clones of one scripted driver and counts launches.
#[derive(Clone, Default)]
pub struct CountingLauncher {
    pub driver: ScriptedDriver,
    pub launches: Arc<AtomicUsize>,
}

impl CountingLauncher {
    pub fn new(driver: ScriptedDriver) -> Self {
        Self {
            driver,
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for CountingLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.driver.clone()))
    }
}
