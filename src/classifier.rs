//! Best-effort category labelling for uploaded documents.
//!
//! One generation request per file, paced by a fixed delay before every
//! attempt. A rate-limit response is retried after the delay the service
//! suggests (plus a margin) or a fixed default wait; anything else, or
//! running out of attempts, yields [`Category::Other`]. Classification
//! never fails an upload.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::generation::{GenerationError, GenerationService};
use crate::models::Category;

pub struct CategoryClassifier {
    service: Arc<dyn GenerationService>,
    config: ClassifierConfig,
}

impl CategoryClassifier {
    pub fn new(service: Arc<dyn GenerationService>, config: ClassifierConfig) -> Self {
        Self { service, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn classify(&self, file_name: &str) -> Category {
        let prompt = classification_prompt(file_name);

        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;

            match self.service.generate(&prompt).await {
                Ok(raw) => {
                    let category = validate_label(&raw);
                    debug!(file = file_name, %category, "classified");
                    return category;
                }
                Err(GenerationError::ResourceExhausted { body }) => {
                    if attempt == self.config.max_attempts {
                        break;
                    }
                    let wait = parse_retry_delay(&body)
                        .map(|d| d.saturating_add(Duration::from_secs(self.config.retry_margin_secs)))
                        .unwrap_or(Duration::from_secs(self.config.default_wait_secs))
                        .min(Duration::from_secs(self.config.max_wait_secs));
                    warn!(
                        file = file_name,
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        "classifier rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(GenerationError::Other(e)) => {
                    warn!(file = file_name, error = %e, "classification failed, using Other");
                    return Category::Other;
                }
            }
        }

        warn!(
            file = file_name,
            attempts = self.config.max_attempts,
            "classifier retries exhausted, using Other"
        );
        Category::Other
    }
}

fn classification_prompt(file_name: &str) -> String {
    let labels: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    format!(
        "Classify the internal regulation document named \"{}\" into exactly one of \
         these categories: {}. Reply with the category name only.",
        file_name,
        labels.join(", ")
    )
}

/// Map a raw model reply onto the fixed category set.
pub fn validate_label(raw: &str) -> Category {
    let trimmed = raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '.');
    if let Some(exact) = Category::parse(trimmed) {
        return exact;
    }
    Category::ALL
        .into_iter()
        .find(|c| raw.contains(c.as_str()))
        .unwrap_or(Category::Other)
}

fn retry_delay_patterns() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r#""retryDelay"\s*:\s*"([0-9]+(?:\.[0-9]+)?)s""#).expect("static regex"),
            Regex::new(r"(?i)retry in ([0-9]+(?:\.[0-9]+)?)\s*s").expect("static regex"),
        ]
    })
}

/// Server-suggested wait found in a rate-limit error body, if any.
///
/// Delays too large for a `Duration` saturate to `Duration::MAX`; callers
/// cap the wait themselves.
pub fn parse_retry_delay(body: &str) -> Option<Duration> {
    retry_delay_patterns().iter().find_map(|re| {
        let secs: f64 = re.captures(body)?.get(1)?.as_str().parse().ok()?;
        Some(Duration::try_from_secs_f64(secs.ceil()).unwrap_or(Duration::MAX))
    })
}
