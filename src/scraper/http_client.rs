use crate::config::ScraperConfig;
use crate::models::Credential;
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// HTTP session shared by the token provider and the query executor.
///
/// Carries the cookie jar, browser-like default headers and the single active
/// credential. The token is replaced as a whole on refresh; callers that share
/// one context across tasks serialize through the inner lock.
pub struct SessionContext {
    inner: reqwest::Client,
    config: ScraperConfig,
    token_header: HeaderName,
    credential: RwLock<Option<Credential>>,
}

impl SessionContext {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(&format!("{}/", base)).context("Invalid referer")?,
        );
        headers.insert(
            header::ORIGIN,
            HeaderValue::from_str(base).context("Invalid origin")?,
        );

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout())
            .gzip(true)
            // The token is bound to the session cookie
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        let token_header = HeaderName::from_bytes(config.token_header.as_bytes())
            .with_context(|| format!("Invalid token header name {:?}", config.token_header))?;

        Ok(Self {
            inner,
            config: config.clone(),
            token_header,
            credential: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.inner
    }

    pub fn token_header(&self) -> &HeaderName {
        &self.token_header
    }

    /// Snapshot of the active credential.
    pub fn credential(&self) -> Option<Credential> {
        match self.credential.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a new credential; the old one is dropped.
    pub fn install(&self, credential: Credential) {
        debug!("Installing token {} from {}", credential.preview(), credential.source_url);
        match self.credential.write() {
            Ok(mut guard) => *guard = Some(credential),
            Err(poisoned) => *poisoned.into_inner() = Some(credential),
        }
    }

    pub fn clear(&self) {
        match self.credential.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Active credential if it is younger than the configured TTL.
    pub fn fresh_credential(&self) -> Option<Credential> {
        self.credential()
            .filter(|c| !c.is_expired(self.config.token_ttl()))
    }

    /// Sleep for the configured delay + random jitter.
    pub async fn polite_delay(&self) {
        if self.config.request_delay_ms == 0 && self.config.jitter_ms == 0 {
            return;
        }
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        sleep(total).await;
    }
}
