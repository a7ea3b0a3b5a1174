use crate::error::{PressmillError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SiteConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
}

// ---------------------------------------------------------------------------
// PostingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_stale_lock_minutes")]
    pub stale_lock_minutes: u64,
    /// Cap on published posts in any trailing 24 hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_posts_per_day: Option<u32>,
    /// Older posts of a product beyond this count are withdrawn on publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_posts_per_product: Option<u32>,
}

fn default_interval_minutes() -> u64 {
    24 * 60
}

fn default_stale_lock_minutes() -> u64 {
    30
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            stale_lock_minutes: default_stale_lock_minutes(),
            max_posts_per_day: None,
            max_posts_per_product: None,
        }
    }
}

/// Upper bound accepted for `interval_minutes` and `stale_lock_minutes`
/// (ten years).
pub const MAX_PERIOD_MINUTES: u64 = 10 * 365 * 24 * 60;

/// Largest whole-minute count chrono can represent.
const DURATION_LIMIT_MINUTES: u64 = (i64::MAX / 60_000) as u64;

fn minutes(m: u64) -> chrono::Duration {
    chrono::Duration::minutes(m.min(DURATION_LIMIT_MINUTES) as i64)
}

impl PostingConfig {
    pub fn interval(&self) -> chrono::Duration {
        minutes(self.interval_minutes)
    }

    pub fn stale_lock_timeout(&self) -> chrono::Duration {
        minutes(self.stale_lock_minutes)
    }
}

// ---------------------------------------------------------------------------
// GenerationConfig / ProviderConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_ollama_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_ollama_model() -> String {
    "llama3:8b".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Ollama {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout_secs(&self) -> u64 {
        match self {
            ProviderConfig::Ollama { timeout_secs, .. } => *timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Run a second editor pass over the draft.
    #[serde(default = "default_review_pass")]
    pub review_pass: bool,
    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_review_pass() -> bool {
    true
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            review_pass: default_review_pass(),
            provider: ProviderConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub site: SiteConfig,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<PathBuf>,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub portfolio: Vec<Product>,
}

fn default_version() -> u32 {
    1
}

fn default_output_path() -> PathBuf {
    PathBuf::from(paths::DEFAULT_OUTPUT_DIR)
}

impl Config {
    pub fn new(site_name: impl Into<String>, site_url: impl Into<String>) -> Self {
        Self {
            version: 1,
            site: SiteConfig {
                name: site_name.into(),
                url: site_url.into(),
                tagline: None,
            },
            output_path: default_output_path(),
            template_path: None,
            assets_dir: None,
            posting: PostingConfig::default(),
            generation: GenerationConfig::default(),
            portfolio: Vec::new(),
        }
    }

    /// Starter config written by `pressmill init`.
    pub fn scaffold() -> Self {
        let mut cfg = Config::new("Product Spotlight", "https://example.com");
        cfg.site.tagline = Some("Honest write-ups of things worth buying".to_string());
        cfg.portfolio.push(Product {
            name: "Example Product".to_string(),
            link: "https://example.com/affiliate/example-product".to_string(),
            description: "Replace this entry with a real product from your portfolio.".to_string(),
        });
        cfg
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PressmillError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())?;
        Ok(())
    }

    /// Load and reject any config with error-level findings.
    pub fn load_validated(root: &Path) -> Result<Self> {
        let cfg = Self::load(root)?;
        let errors: Vec<String> = cfg
            .validate(root)
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(PressmillError::Config(errors.join("; ")));
        }
        Ok(cfg)
    }

    pub fn output_dir(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.output_path)
    }

    pub fn template_file(&self, root: &Path) -> Option<PathBuf> {
        self.template_path
            .as_deref()
            .map(|p| paths::resolve(root, p))
    }

    pub fn assets_source(&self, root: &Path) -> Option<PathBuf> {
        self.assets_dir.as_deref().map(|p| paths::resolve(root, p))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. Site identity
        if self.site.name.trim().is_empty() {
            warnings.push(ConfigWarning::error("site.name is empty"));
        }
        if self.site.url.trim().is_empty() {
            warnings.push(ConfigWarning::error("site.url is empty"));
        } else if !is_http_url(&self.site.url) {
            warnings.push(ConfigWarning::error(format!(
                "site.url '{}' is not an http(s) URL",
                self.site.url
            )));
        }

        // 2. Output must not expose the state directory
        let output = paths::normalize(&self.output_dir(root));
        if paths::normalize(&paths::state_dir(root)).starts_with(&output) {
            warnings.push(ConfigWarning::error(format!(
                "output_path '{}' contains the state directory '{}'",
                output.display(),
                paths::PRESSMILL_DIR
            )));
        }

        // 3. Posting cadence
        for (field, value) in [
            ("interval_minutes", self.posting.interval_minutes),
            ("stale_lock_minutes", self.posting.stale_lock_minutes),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning::error(format!("posting.{field} must be > 0")));
            } else if value > MAX_PERIOD_MINUTES {
                warnings.push(ConfigWarning::error(format!(
                    "posting.{field}={value} exceeds the maximum of {MAX_PERIOD_MINUTES}"
                )));
            }
        }
        if self.posting.max_posts_per_day == Some(0) {
            warnings.push(ConfigWarning::error(
                "posting.max_posts_per_day must be > 0 when set",
            ));
        }
        if self.posting.max_posts_per_product == Some(0) {
            warnings.push(ConfigWarning::error(
                "posting.max_posts_per_product must be > 0 when set",
            ));
        }

        // 4. Generation
        if self.generation.max_attempts == 0 {
            warnings.push(ConfigWarning::error("generation.max_attempts must be > 0"));
        }
        if self.generation.max_attempts > 10 {
            warnings.push(ConfigWarning::warning(format!(
                "generation.max_attempts={} (>10 is unusual)",
                self.generation.max_attempts
            )));
        }
        let ProviderConfig::Ollama {
            base_url, model, ..
        } = &self.generation.provider;
        if !is_http_url(base_url) {
            warnings.push(ConfigWarning::error(format!(
                "generation.provider.base_url '{base_url}' is not an http(s) URL"
            )));
        }
        if model.trim().is_empty() {
            warnings.push(ConfigWarning::error("generation.provider.model is empty"));
        }

        // 5. A run can legitimately take this long; a shorter stale timeout
        //    lets a second run reclaim a live lock.
        let worst_case_secs =
            self.generation.provider.timeout_secs() * u64::from(self.generation.max_attempts.max(1));
        if self.posting.stale_lock_minutes.saturating_mul(60) < worst_case_secs {
            warnings.push(ConfigWarning::warning(format!(
                "posting.stale_lock_minutes={} is shorter than the worst-case generation time ({}s)",
                self.posting.stale_lock_minutes, worst_case_secs
            )));
        }

        // 6. Portfolio
        if self.portfolio.is_empty() {
            warnings.push(ConfigWarning::warning(
                "portfolio is empty; cycles will be skipped",
            ));
        }
        let mut seen = HashSet::new();
        for (i, product) in self.portfolio.iter().enumerate() {
            if product.name.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!("portfolio[{i}].name is empty")));
            } else if !seen.insert(product.name.trim().to_lowercase()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate product name '{}' in portfolio",
                    product.name
                )));
            }
            if product.link.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!("portfolio[{i}].link is empty")));
            } else if !is_http_url(&product.link) {
                warnings.push(ConfigWarning::error(format!(
                    "portfolio[{i}].link '{}' is not an http(s) URL",
                    product.link
                )));
            }
            if product.description.trim().is_empty() {
                warnings.push(ConfigWarning::warning(format!(
                    "portfolio[{i}] '{}' has no description",
                    product.name
                )));
            }
        }

        warnings
    }
}

fn is_http_url(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with("http://") && s.len() > "http://".len())
        || (s.starts_with("https://") && s.len() > "https://".len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
