use crate::error::ScrapeError;
use crate::models::{Credential, Outcome, RawResultSet, Row, ScanQuery};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::http_client::SessionContext;
use super::normalizer::normalize_raw;
use super::token::TokenProvider;

/// Status the upstream uses for a rejected/expired CSRF token.
pub const TOKEN_REJECTED: u16 = 419;

/// Posts scan clauses to the process endpoint.
pub struct QueryExecutor {
    endpoint: String,
    tokens: TokenProvider,
}

/// What a single POST turned into, before retry policy is applied.
enum Attempt {
    Done(Outcome),
    TokenRejected,
}

impl QueryExecutor {
    pub fn new(endpoint: impl Into<String>, tokens: TokenProvider) -> Self {
        Self {
            endpoint: endpoint.into(),
            tokens,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run `query` with `credential`.
    ///
    /// A 419 triggers exactly one refresh against the credential's source page
    /// and one resend; a second 419 is `Fatal(TokenRejectedAfterRefresh)` and
    /// drops the session credential so the next run fetches a new one.
    /// Every other failure is reported once, without retrying.
    pub async fn execute(
        &self,
        query: &ScanQuery,
        credential: &Credential,
        ctx: &SessionContext,
    ) -> Outcome {
        info!("Sending scan to {}: {}", self.endpoint, query);

        match self.post_once(query, &credential.token, ctx).await {
            Attempt::Done(outcome) => outcome,
            Attempt::TokenRejected => {
                warn!("CSRF token rejected ({}), refreshing once", TOKEN_REJECTED);
                let fresh = match self.tokens.acquire(ctx, &credential.source_url).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Token refresh failed: {}", e);
                        return Outcome::Fatal(e);
                    }
                };

                info!("Retrying with fresh CSRF token {}", fresh.preview());
                match self.post_once(query, &fresh.token, ctx).await {
                    Attempt::Done(outcome) => outcome,
                    Attempt::TokenRejected => {
                        warn!("Token rejected again after refresh, giving up");
                        ctx.clear();
                        Outcome::Fatal(ScrapeError::TokenRejectedAfterRefresh)
                    }
                }
            }
        }
    }

    /// Try `candidates` in order and keep the first clause that returns rows.
    pub async fn probe(
        &self,
        candidates: &[ScanQuery],
        credential: &Credential,
        ctx: &SessionContext,
    ) -> Option<(ScanQuery, Vec<Row>)> {
        for (i, query) in candidates.iter().enumerate() {
            debug!("Probe {}/{}: {}", i + 1, candidates.len(), query);
            // a refresh inside execute replaces the session credential
            let current = ctx.credential().unwrap_or_else(|| credential.clone());
            match self.execute(query, &current, ctx).await {
                Outcome::Success(rows) if !rows.is_empty() => {
                    info!("Working clause: {} ({} rows)", query, rows.len());
                    return Some((query.clone(), rows));
                }
                other => debug!("Clause rejected: {}", other.summary()),
            }
        }
        warn!("No candidate clause produced rows");
        None
    }

    async fn post_once(&self, query: &ScanQuery, token: &str, ctx: &SessionContext) -> Attempt {
        ctx.polite_delay().await;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("scan_clause", query.clause())
            .finish();

        let sent = ctx
            .client()
            .post(&self.endpoint)
            .header(ctx.token_header().clone(), token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .body(body)
            .send()
            .await;

        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                warn!("Request error: {}", e);
                return Attempt::Done(Outcome::Fatal(ScrapeError::Transport(e)));
            }
        };

        let status = resp.status();
        debug!("API returned status code: {}", status);

        if status.as_u16() == TOKEN_REJECTED {
            return Attempt::TokenRejected;
        }
        if status != StatusCode::OK {
            let snippet = resp.text().await.unwrap_or_default();
            warn!("API returned error {}: {}", status, truncate(&snippet, 200));
            return Attempt::Done(Outcome::Fatal(ScrapeError::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            }));
        }

        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return Attempt::Done(Outcome::Fatal(ScrapeError::Transport(e))),
        };

        Attempt::Done(classify_body(&text))
    }
}

/// Map a 200 body onto an outcome.
pub fn classify_body(text: &str) -> Outcome {
    let body: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("JSON decode error: {} (body: {})", e, truncate(text, 200));
            return Outcome::Fatal(ScrapeError::MalformedResponse(e.to_string()));
        }
    };

    let Some(obj) = body.as_object() else {
        return Outcome::Fatal(ScrapeError::MalformedResponse(
            "response body is not a JSON object".to_string(),
        ));
    };

    if let Some(err) = obj.get("scan_error") {
        let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        warn!("Scan error from upstream: {}", msg);
        return Outcome::Fatal(ScrapeError::ScanRejected(msg));
    }

    let keys: Vec<&String> = obj.keys().collect();
    debug!("API response keys: {:?}", keys);

    let data = match obj.get("data") {
        Some(Value::Array(items)) if !items.is_empty() => obj.get("data"),
        Some(Value::Object(map)) if !map.is_empty() => obj.get("data"),
        _ => None,
    };
    let Some(data) = data else {
        info!("API returned no data");
        return Outcome::EmptyResult;
    };

    let rows = normalize_raw(RawResultSet::Json(data.clone()));
    if rows.is_empty() {
        warn!("`data` present but no rows could be normalized");
        return Outcome::EmptyResult;
    }
    info!("Fetched {} stocks via API", rows.len());
    Outcome::Success(rows)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    const PAGE: &str = "/screener/open-high";
    const PROCESS: &str = "/screener/process";

    fn setup(server: &MockServer) -> (SessionContext, QueryExecutor) {
        let cfg = ScraperConfig {
            base_url: server.base_url(),
            ..ScraperConfig::default()
        };
        let ctx = SessionContext::new(&cfg).unwrap();
        let exec = QueryExecutor::new(cfg.process_url(), TokenProvider::new());
        (ctx, exec)
    }

    fn token_page(token: &str) -> String {
        format!(r#"<html><head><meta name="csrf-token" content="{}"></head></html>"#, token)
    }

    fn query() -> ScanQuery {
        ScanQuery::segmented("nifty100", "latest open = latest high")
    }

    #[test]
    fn test_classify_body() {
        assert!(matches!(
            classify_body(r#"{"draw":1,"data":[{"nsecode":"AAA"}]}"#),
            Outcome::Success(rows) if rows.len() == 1
        ));
        assert!(matches!(classify_body(r#"{"data":[]}"#), Outcome::EmptyResult));
        assert!(matches!(classify_body(r#"{"draw":1}"#), Outcome::EmptyResult));
        assert!(matches!(
            classify_body("<html>oops</html>"),
            Outcome::Fatal(ScrapeError::MalformedResponse(_))
        ));
        assert!(matches!(
            classify_body(r#"{"scan_error":"bad clause"}"#),
            Outcome::Fatal(ScrapeError::ScanRejected(m)) if m == "bad clause"
        ));
    }

    #[tokio::test]
    async fn test_success_sends_form_and_token() {
        let server = MockServer::start();
        let api = server.mock(|when, then| {
            when.method(POST)
                .path(PROCESS)
                .header("x-csrf-token", "tok-1")
                .header("content-type", "application/x-www-form-urlencoded; charset=UTF-8");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"data":[{"nsecode":"AAA","per_chg":1.5},{"nsecode":"BBB","per_chg":0.5}]}"#);
        });

        let (ctx, exec) = setup(&server);
        let cred = Credential::new("tok-1", server.url(PAGE));
        let outcome = exec.execute(&query(), &cred, &ctx).await;

        api.assert_calls(1);
        let rows = outcome.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["nsecode"], "AAA");
    }

    #[tokio::test]
    async fn test_419_refreshes_once_then_succeeds() {
        let server = MockServer::start();
        let stale = server.mock(|when, then| {
            when.method(POST).path(PROCESS).header("x-csrf-token", "stale");
            then.status(419).body("CSRF token mismatch");
        });
        let page = server.mock(|when, then| {
            when.method(GET).path(PAGE);
            then.status(200).body(token_page("fresh"));
        });
        let fresh = server.mock(|when, then| {
            when.method(POST).path(PROCESS).header("x-csrf-token", "fresh");
            then.status(200).body(r#"{"data":[{"nsecode":"AAA"}]}"#);
        });

        let (ctx, exec) = setup(&server);
        let cred = Credential::new("stale", server.url(PAGE));
        let outcome = exec.execute(&query(), &cred, &ctx).await;

        stale.assert_calls(1);
        page.assert_calls(1);
        fresh.assert_calls(1);
        assert!(outcome.is_success());
        assert_eq!(ctx.credential().unwrap().token, "fresh");
    }

    #[tokio::test]
    async fn test_second_419_is_terminal() {
        let server = MockServer::start();
        let api = server.mock(|when, then| {
            when.method(POST).path(PROCESS);
            then.status(419);
        });
        let page = server.mock(|when, then| {
            when.method(GET).path(PAGE);
            then.status(200).body(token_page("still-bad"));
        });

        let (ctx, exec) = setup(&server);
        let cred = Credential::new("stale", server.url(PAGE));
        let outcome = exec.execute(&query(), &cred, &ctx).await;

        api.assert_calls(2);
        page.assert_calls(1);
        assert!(matches!(
            outcome,
            Outcome::Fatal(ScrapeError::TokenRejectedAfterRefresh)
        ));
        assert!(ctx.credential().is_none());
    }

    #[tokio::test]
    async fn test_419_with_unrefreshable_token() {
        let server = MockServer::start();
        let api = server.mock(|when, then| {
            when.method(POST).path(PROCESS);
            then.status(419);
        });
        server.mock(|when, then| {
            when.method(GET).path(PAGE);
            then.status(200).body("<html></html>");
        });

        let (ctx, exec) = setup(&server);
        let cred = Credential::new("stale", server.url(PAGE));
        let outcome = exec.execute(&query(), &cred, &ctx).await;

        api.assert_calls(1);
        assert!(matches!(outcome, Outcome::Fatal(ScrapeError::TokenNotFound { .. })));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start();
        let api = server.mock(|when, then| {
            when.method(POST).path(PROCESS);
            then.status(500).body("boom");
        });

        let (ctx, exec) = setup(&server);
        let cred = Credential::new("tok", server.url(PAGE));
        let outcome = exec.execute(&query(), &cred, &ctx).await;

        api.assert_calls(1);
        assert!(matches!(
            outcome,
            Outcome::Fatal(ScrapeError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let ctx = SessionContext::new(&ScraperConfig::default()).unwrap();
        // nothing listens on port 9 locally
        let exec = QueryExecutor::new("http://127.0.0.1:9/screener/process", TokenProvider::new());
        let cred = Credential::new("tok", "http://127.0.0.1:9/screener/x");
        let outcome = exec.execute(&query(), &cred, &ctx).await;
        assert!(matches!(outcome, Outcome::Fatal(ScrapeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_probe_skips_scan_errors() {
        let server = MockServer::start();
        let rejected = server.mock(|when, then| {
            when.method(POST)
                .path(PROCESS)
                .body("scan_clause=%28+%7Bbogus%7D+%28+latest+open+%3D+latest+high+%29+%29");
            then.status(200).body(r#"{"scan_error":"Unknown segment"}"#);
        });
        let accepted = server.mock(|when, then| {
            when.method(POST)
                .path(PROCESS)
                .body("scan_clause=%28+latest+open+%3D+latest+high+%29");
            then.status(200).body(r#"{"data":[{"nsecode":"AAA"}]}"#);
        });

        let (ctx, exec) = setup(&server);
        let cred = Credential::new("tok", server.url(PAGE));
        let candidates = vec![
            ScanQuery::segmented("bogus", "latest open = latest high"),
            ScanQuery::new("( latest open = latest high )"),
        ];
        let (winner, rows) = exec.probe(&candidates, &cred, &ctx).await.unwrap();

        rejected.assert_calls(1);
        accepted.assert_calls(1);
        assert_eq!(winner.clause(), "( latest open = latest high )");
        assert_eq!(rows.len(), 1);
    }
}
