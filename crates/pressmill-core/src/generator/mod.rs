//! Content generation: wraps a text provider with prompting, validation and
//! bounded retries.
//!
//! ```text
//! Product ──▶ draft prompt ──▶ TextProvider ──▶ clean + parse ──▶ Article
//!                                   ▲               │ invalid → transient
//!                                   └── retry with exponential backoff
//! ```
//!
//! The optional review pass runs once over a valid draft; if it fails the
//! draft is kept.

pub mod ollama;
pub mod prompt;

use std::time::Duration;

use tracing::{info, warn};

use crate::article::{clean_provider_output, Article};
use crate::config::{GenerationConfig, Product, ProviderConfig, SiteConfig};
use crate::error::GenerationError;

pub use ollama::OllamaProvider;

/// A raw text-completion capability.
pub trait TextProvider {
    fn name(&self) -> &str;

    fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Produces a validated article for a product.
pub trait ContentGenerator {
    fn generate(&self, product: &Product, site: &SiteConfig) -> Result<Article, GenerationError>;
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &GenerationConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.backoff_base_ms),
            max_delay: Duration::from_millis(cfg.backoff_max_ms),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct Generator<P> {
    provider: P,
    policy: RetryPolicy,
    review_pass: bool,
}

impl<P: TextProvider> Generator<P> {
    pub fn new(provider: P, policy: RetryPolicy, review_pass: bool) -> Self {
        Self {
            provider,
            policy,
            review_pass,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn attempt(&self, product: &Product, site: &SiteConfig) -> Result<Article, GenerationError> {
        let raw = self
            .provider
            .complete(&prompt::draft_prompt(product, site))?;
        let draft_html = clean_provider_output(&raw);
        let draft = Article::from_html(&draft_html, product)?;

        if !self.review_pass {
            return Ok(draft);
        }
        match self.review(&draft_html, product) {
            Ok(reviewed) => Ok(reviewed),
            Err(e) => {
                warn!(product = %product.name, error = %e, "review pass failed; keeping draft");
                Ok(draft)
            }
        }
    }

    fn review(&self, draft_html: &str, product: &Product) -> Result<Article, GenerationError> {
        let raw = self.provider.complete(&prompt::review_prompt(draft_html))?;
        Article::from_html(&clean_provider_output(&raw), product)
    }
}

impl<P: TextProvider> ContentGenerator for Generator<P> {
    fn generate(&self, product: &Product, site: &SiteConfig) -> Result<Article, GenerationError> {
        let max = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max {
            info!(
                product = %product.name,
                provider = self.provider.name(),
                attempt,
                max,
                "generating article"
            );
            match self.attempt(product, site) {
                Ok(article) => return Ok(article),
                Err(GenerationError::Permanent(msg)) => {
                    warn!(product = %product.name, attempt, error = %msg, "permanent generation failure");
                    return Err(GenerationError::Permanent(msg));
                }
                Err(GenerationError::Transient(msg)) => {
                    warn!(product = %product.name, attempt, max, error = %msg, "transient generation failure");
                    last_error = msg;
                    if attempt < max {
                        std::thread::sleep(self.policy.delay_after(attempt));
                    }
                }
            }
        }

        Err(GenerationError::Permanent(format!(
            "gave up after {max} attempt(s): {last_error}"
        )))
    }
}

/// Build the configured generator.
pub fn from_config(cfg: &GenerationConfig) -> Result<Generator<OllamaProvider>, GenerationError> {
    let provider = match &cfg.provider {
        ProviderConfig::Ollama {
            base_url,
            model,
            temperature,
            timeout_secs,
        } => OllamaProvider::new(
            base_url,
            model,
            *temperature,
            Duration::from_secs(*timeout_secs),
        )?,
    };
    Ok(Generator::new(
        provider,
        RetryPolicy::from_config(cfg),
        cfg.review_pass,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
