//! Configuration module for Feed-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use feed_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Extraction runs on: {}", config.extraction.schedule);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ClassificationConfig, ClassifierConfig, Config, EngineConfig, ExtractionConfig,
    FacebookConfig, InstagramConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
