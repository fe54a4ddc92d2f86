//! Application configuration for paperdigest.
//!
//! User config lives at `~/.paperdigest/paperdigest.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file; the config names the environment
//! variables that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperdigest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperdigest";

// ---------------------------------------------------------------------------
// Config structs (matching paperdigest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listing scrape settings.
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Completion API settings (ranking and summarization).
    #[serde(default)]
    pub llm: LlmConfig,

    /// PDF conversion API settings.
    #[serde(default)]
    pub converter: ConverterConfig,

    /// Ranking settings.
    #[serde(default)]
    pub ranker: RankerConfig,

    /// Summary formatting options.
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Output locations.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[fetcher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Paper listing URL to scrape.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Number of candidate papers to collect across pages.
    #[serde(default = "default_target_count")]
    pub target_count: usize,

    /// Maximum listing pages to visit.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Delay in ms between listing page requests.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            target_count: default_target_count(),
            max_pages: default_max_pages(),
            request_delay_ms: default_request_delay(),
        }
    }
}

fn default_listing_url() -> String {
    "https://paperswithcode.com/latest".into()
}
fn default_target_count() -> usize {
    100
}
fn default_max_pages() -> u32 {
    10
}
fn default_request_delay() -> u64 {
    2000
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model to use for ranking and summarization.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_api_key_env(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
        }
    }
}

fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.deepseek.com".into()
}
fn default_llm_model() -> String {
    "deepseek-chat".into()
}
fn default_temperature() -> f32 {
    0.7
}

/// `[converter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Name of the env var holding the conversion API key.
    #[serde(default = "default_converter_api_key_env")]
    pub api_key_env: String,

    /// Conversion API base URL.
    #[serde(default = "default_converter_base_url")]
    pub base_url: String,

    /// Interval in ms between status polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Overall deadline in seconds for one conversion job.
    #[serde(default = "default_conversion_timeout")]
    pub timeout_secs: u64,

    /// Maximum PDF size accepted for upload.
    #[serde(default = "default_max_pdf_bytes")]
    pub max_pdf_bytes: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_converter_api_key_env(),
            base_url: default_converter_base_url(),
            poll_interval_ms: default_poll_interval(),
            timeout_secs: default_conversion_timeout(),
            max_pdf_bytes: default_max_pdf_bytes(),
        }
    }
}

fn default_converter_api_key_env() -> String {
    "DOC2X_APIKEY".into()
}
fn default_converter_base_url() -> String {
    "https://v2.doc2x.noedgeai.com".into()
}
fn default_poll_interval() -> u64 {
    3000
}
fn default_conversion_timeout() -> u64 {
    600
}
fn default_max_pdf_bytes() -> u64 {
    50 * 1024 * 1024
}

/// `[ranker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankerConfig {
    /// How many papers to select from the candidate pool.
    #[serde(default = "default_shortlist")]
    pub shortlist: usize,

    /// Max completion tokens for the ranking response.
    #[serde(default = "default_rank_max_tokens")]
    pub max_tokens: u32,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            shortlist: default_shortlist(),
            max_tokens: default_rank_max_tokens(),
        }
    }
}

fn default_shortlist() -> usize {
    3
}
fn default_rank_max_tokens() -> u32 {
    100
}

/// `[summary]` section — formatting options for generated summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Output language of the summary.
    #[serde(default = "default_language")]
    pub language: String,

    /// Target length guidance passed to the model.
    #[serde(default = "default_target_length")]
    pub target_length: String,

    /// Audience framing passed to the model.
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Sections the summary should cover, in order.
    #[serde(default = "default_sections")]
    pub sections: Vec<String>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            target_length: default_target_length(),
            audience: default_audience(),
            sections: default_sections(),
        }
    }
}

fn default_language() -> String {
    "Chinese".into()
}
fn default_target_length() -> String {
    "800-1200 words".into()
}
fn default_audience() -> String {
    "machine learning practitioners".into()
}
fn default_sections() -> Vec<String> {
    vec![
        "motivation".into(),
        "method".into(),
        "results".into(),
        "takeaways".into(),
    ]
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for run outputs (PDFs, Markdown, summaries, digest).
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "~/paperdigest-runs".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperdigest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperdigest/paperdigest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DigestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DigestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DigestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DigestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the completion and conversion API key env vars are set and non-empty.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    require_env(&config.llm.api_key_env, "completion API")?;
    require_env(&config.converter.api_key_env, "conversion API")?;
    Ok(())
}

fn require_env(var_name: &str, what: &str) -> Result<()> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(DigestError::config(format!(
            "{what} key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("listing_url"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("DOC2X_APIKEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.ranker.shortlist, 3);
        assert_eq!(parsed.llm.model, "deepseek-chat");
        assert_eq!(parsed.converter.poll_interval_ms, 3000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[ranker]
shortlist = 5

[summary]
language = "English"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.ranker.shortlist, 5);
        assert_eq!(config.summary.language, "English");
        // Untouched sections keep defaults
        assert_eq!(config.fetcher.target_count, 100);
        assert_eq!(config.summary.target_length, "800-1200 words");
        assert_eq!(config.summary.sections.len(), 4);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "PD_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_keys(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("key not found"));
    }
}
