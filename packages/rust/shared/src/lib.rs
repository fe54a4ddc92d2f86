//! Shared domain types, errors, and configuration for the paperdigest pipeline.
//!
//! All pipeline crates depend on this one. It defines the [`PaperRecord`]
//! flowing through every stage, the [`DigestError`] taxonomy, and the
//! TOML-backed application configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AppConfig, ConverterConfig, FetcherConfig, LlmConfig, OutputConfig, RankerConfig,
    SummaryConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_keys,
};
pub use error::{DigestError, Result};
pub use types::{DroppedPaper, PaperRecord, StageOutcome, digest_filename, stable_id, summary_filename};
