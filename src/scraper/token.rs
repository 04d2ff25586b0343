use crate::error::ScrapeError;
use crate::models::Credential;
use tracing::{debug, info, warn};

use super::http_client::SessionContext;
use super::parsers::parse_csrf_token;

/// Discovers the anti-CSRF token on a screener page.
///
/// No retries here: only the executor knows when a token has gone stale.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenProvider;

impl TokenProvider {
    pub fn new() -> Self {
        Self
    }

    /// Fetch `source_url`, parse its `csrf-token` meta tag and install the
    /// result on `ctx`.
    pub async fn acquire(
        &self,
        ctx: &SessionContext,
        source_url: &str,
    ) -> Result<Credential, ScrapeError> {
        info!("Fetching CSRF token from {}", source_url);

        let html = match self.fetch_page(ctx, source_url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Token page failed to load: {}", e);
                return Err(ScrapeError::TokenNotFound {
                    url: source_url.to_string(),
                });
            }
        };

        let Some(token) = parse_csrf_token(&html) else {
            warn!("Could not find CSRF token in meta tag");
            return Err(ScrapeError::TokenNotFound {
                url: source_url.to_string(),
            });
        };

        let credential = Credential::new(token, source_url);
        info!("Found CSRF token {}", credential.preview());
        ctx.install(credential.clone());
        Ok(credential)
    }

    /// GET the screener page as text. Also seeds the session cookie.
    pub async fn fetch_page(
        &self,
        ctx: &SessionContext,
        url: &str,
    ) -> Result<String, ScrapeError> {
        ctx.polite_delay().await;
        debug!("GET {}", url);

        let resp = ctx
            .client()
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .timeout(ctx.config().token_timeout())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}
