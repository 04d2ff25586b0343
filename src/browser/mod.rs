//! Browser fallback: a driver seam plus the scan-page state machine that runs
//! on top of it.
//!
//! The extractor never talks to a browser directly. It asks a [`PageDriver`]
//! whether things are present, clicks them, and reads the rendered HTML back
//! for parsing. The concrete driver lives behind the `browser` feature.

#[cfg(feature = "browser")]
pub mod chromium;
pub mod extractor;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::ScrapeError;
use crate::utils::wait_until;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub use self::extractor::{BrowserExtractor, FilterChange, Timings};

// ── Locators ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(s: impl Into<String>) -> Self {
        Locator::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Locator::XPath(s.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// Quote `s` as an XPath string literal.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

// ── Driver seam ───────────────────────────────────────────────────────────────

/// Minimal page automation surface. "Not found" is `Ok(false)`; `Err` means
/// the page itself is gone.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError>;

    /// Rendered HTML of the current document.
    async fn content(&self) -> Result<String, ScrapeError>;

    async fn is_present(&self, locator: &Locator) -> Result<bool, ScrapeError>;

    /// Click the first element matching `locator`.
    async fn click(&self, locator: &Locator) -> Result<bool, ScrapeError>;

    /// Current text of every editable field matching `locator`.
    async fn field_values(&self, locator: &Locator) -> Result<Vec<String>, ScrapeError>;

    /// Clear the `index`-th match and type `text` into it.
    async fn replace_text(
        &self,
        locator: &Locator,
        index: usize,
        text: &str,
    ) -> Result<bool, ScrapeError>;

    async fn close(&self) -> Result<(), ScrapeError> {
        Ok(())
    }
}

/// Produces a driver on demand, so nothing is started unless the API path
/// came up empty.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScrapeError>;
}

// ── Selector cascade ──────────────────────────────────────────────────────────

/// Which field of a text locator to overwrite.
#[derive(Debug, Clone)]
pub struct TextTarget {
    /// Lowercase fragments that mark the field holding the segment filter.
    pub hints: Vec<String>,
    /// Any field longer than this is accepted as well.
    pub min_len: usize,
}

impl TextTarget {
    pub fn accepts(&self, current: &str) -> bool {
        let lower = current.to_lowercase();
        current.chars().count() > self.min_len || self.hints.iter().any(|h| lower.contains(h))
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// The element only has to show up.
    Present,
    Click,
    /// Click the trigger, then the first option that responds.
    OpenThenSelect {
        options: Vec<Locator>,
        option_timeout: Duration,
    },
    ReplaceText { text: String, target: TextTarget },
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub locator: Locator,
    pub action: Action,
    pub timeout: Duration,
}

/// Ordered list of (locator, action, timeout) tried until one succeeds.
#[derive(Debug, Clone)]
pub struct SelectorCascade {
    name: &'static str,
    poll: Duration,
    candidates: Vec<Candidate>,
}

impl SelectorCascade {
    pub fn new(name: &'static str, poll: Duration) -> Self {
        Self {
            name,
            poll,
            candidates: Vec::new(),
        }
    }

    pub fn with(mut self, locator: Locator, action: Action, timeout: Duration) -> Self {
        self.candidates.push(Candidate {
            locator,
            action,
            timeout,
        });
        self
    }

    /// Same action and timeout for every locator.
    pub fn with_all(
        mut self,
        locators: impl IntoIterator<Item = Locator>,
        action: Action,
        timeout: Duration,
    ) -> Self {
        for locator in locators {
            self = self.with(locator, action.clone(), timeout);
        }
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Try each candidate in order; the first hit wins. `Ok(None)` when
    /// nothing matched.
    pub async fn run(&self, driver: &dyn PageDriver) -> Result<Option<&Locator>, ScrapeError> {
        for c in &self.candidates {
            if self.attempt(driver, c).await? {
                info!("{}: matched {}", self.name, c.locator);
                return Ok(Some(&c.locator));
            }
            debug!("{}: no match for {}", self.name, c.locator);
        }
        Ok(None)
    }

    async fn attempt(&self, driver: &dyn PageDriver, c: &Candidate) -> Result<bool, ScrapeError> {
        match &c.action {
            Action::Present => {
                wait_until(c.timeout, self.poll, || driver.is_present(&c.locator)).await
            }
            Action::Click => wait_until(c.timeout, self.poll, || driver.click(&c.locator)).await,
            Action::OpenThenSelect {
                options,
                option_timeout,
            } => {
                if !wait_until(c.timeout, self.poll, || driver.click(&c.locator)).await? {
                    return Ok(false);
                }
                for option in options {
                    if wait_until(*option_timeout, self.poll, || driver.click(option)).await? {
                        debug!("{}: picked option {}", self.name, option);
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Action::ReplaceText { text, target } => {
                let locator = &c.locator;
                let ready = wait_until(c.timeout, self.poll, move || async move {
                    let values = driver.field_values(locator).await?;
                    Ok::<bool, ScrapeError>(values.iter().any(|v| target.accepts(v)))
                })
                .await?;
                if !ready {
                    return Ok(false);
                }
                let values = driver.field_values(locator).await?;
                match values.iter().position(|v| target.accepts(v)) {
                    Some(index) => driver.replace_text(locator, index, text).await,
                    None => Ok(false),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedDriver;
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("Run Scan"), "'Run Scan'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn test_text_target_accepts() {
        let target = TextTarget {
            hints: vec!["future".into(), "segment".into()],
            min_len: 10,
        };
        assert!(target.accepts("Future"));
        assert!(target.accepts("stock passes all filters"));
        assert!(!target.accepts("short"));
    }

    #[tokio::test]
    async fn test_cascade_first_hit_wins() {
        let second = Locator::xpath("//button[contains(text(), 'Run Scan')]");
        let driver = ScriptedDriver::new("<html></html>").clickable(&second);

        let cascade = SelectorCascade::new("run-scan", ms(1))
            .with(Locator::css("button.missing"), Action::Click, Duration::ZERO)
            .with(second.clone(), Action::Click, Duration::ZERO)
            .with(Locator::css("button.never"), Action::Click, Duration::ZERO);

        let hit = cascade.run(&driver).await.unwrap();
        assert_eq!(hit, Some(&second));
        assert_eq!(driver.clicks(), vec!["css:button.missing".to_string(), second.to_string()]);
    }

    #[tokio::test]
    async fn test_cascade_open_then_select() {
        let trigger = Locator::xpath("//button[contains(text(), 'Future')]");
        let option = Locator::xpath("//a[contains(text(), 'Nifty 100')]");
        let driver = ScriptedDriver::new("<html></html>")
            .clickable(&trigger)
            .clickable(&option);

        let cascade = SelectorCascade::new("segment", ms(1)).with(
            trigger,
            Action::OpenThenSelect {
                options: vec![Locator::css("option.none"), option.clone()],
                option_timeout: Duration::ZERO,
            },
            Duration::ZERO,
        );
        assert!(cascade.run(&driver).await.unwrap().is_some());
        assert_eq!(driver.clicks().last(), Some(&option.to_string()));
    }

    #[tokio::test]
    async fn test_cascade_replace_text_picks_matching_field() {
        let fields = Locator::xpath("//textarea");
        let driver = ScriptedDriver::new("<html></html>")
            .field(&fields, &["", "Stock passes all of the below filters in Future segment:"]);

        let cascade = SelectorCascade::new("filter-text", ms(1)).with(
            fields.clone(),
            Action::ReplaceText {
                text: "in nifty 100 segment:".into(),
                target: TextTarget {
                    hints: vec!["future".into()],
                    min_len: 10,
                },
            },
            Duration::ZERO,
        );
        assert!(cascade.run(&driver).await.unwrap().is_some());
        assert_eq!(
            driver.replacements(),
            vec![(fields.to_string(), 1, "in nifty 100 segment:".to_string())]
        );
    }

    #[tokio::test]
    async fn test_replace_text_waits_for_field() {
        let fields = Locator::css("textarea");
        let driver = ScriptedDriver::new("<html></html>")
            .field(&fields, &["Stock passes all of the below filters in Future segment:"])
            .fields_appear_after(2);
        let replace = Action::ReplaceText {
            text: "in nifty 100 segment:".into(),
            target: TextTarget {
                hints: vec!["future".into()],
                min_len: 10,
            },
        };

        let cascade = SelectorCascade::new("filter-text", ms(1)).with(fields, replace, ms(2_000));
        assert!(cascade.run(&driver).await.unwrap().is_some());
        assert!(driver.field_reads() >= 3);
        assert_eq!(driver.replacements().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_text_gives_up_at_timeout() {
        let fields = Locator::css("textarea");
        let driver = ScriptedDriver::new("<html></html>")
            .field(&fields, &["Stock passes all of the below filters in Future segment:"])
            .fields_appear_after(100);
        let cascade = SelectorCascade::new("filter-text", ms(1)).with(
            fields,
            Action::ReplaceText {
                text: "x".into(),
                target: TextTarget {
                    hints: vec!["future".into()],
                    min_len: 10,
                },
            },
            Duration::ZERO,
        );
        assert_eq!(cascade.run(&driver).await.unwrap(), None);
        assert_eq!(driver.field_reads(), 1);
        assert!(driver.replacements().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_nothing_matches() {
        let driver = ScriptedDriver::new("<html></html>");
        let cascade = SelectorCascade::new("export", ms(1))
            .with_all(
                [Locator::css("button.csv"), Locator::css("button.excel")],
                Action::Present,
                Duration::ZERO,
            );
        assert_eq!(cascade.name(), "export");
        assert_eq!(cascade.run(&driver).await.unwrap(), None);
    }
}
