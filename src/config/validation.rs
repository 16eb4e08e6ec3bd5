use crate::config::types::{
    ClassificationConfig, ClassifierConfig, Config, EngineConfig, ExtractionConfig,
    FacebookConfig, InstagramConfig, StorageConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

const MAX_WORKERS: u32 = 32;
const MAX_RETRIES: u32 = 20;
const MAX_LOOKBACK_DAYS: u32 = 3650;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_storage_config(&config.storage)?;
    validate_extraction_config(&config.extraction)?;
    if let Some(classification) = &config.classification {
        validate_classification_config(classification)?;
    }
    validate_classifier_config(&config.classifier)?;
    validate_instagram_config(&config.instagram)?;
    validate_facebook_config(&config.facebook, &config.accounts)?;
    validate_accounts(&config.accounts)?;
    Ok(())
}

fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.server_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "server-id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    validate_schedule("extraction", &config.schedule)?;
    validate_workers("extraction", config.max_workers)?;
    validate_retries("extraction", config.max_retries)?;

    if config.lookback_days > MAX_LOOKBACK_DAYS {
        return Err(ConfigError::Validation(format!(
            "extraction lookback-days must be <= {}, got {}",
            MAX_LOOKBACK_DAYS, config.lookback_days
        )));
    }
    Ok(())
}

fn validate_classification_config(config: &ClassificationConfig) -> Result<(), ConfigError> {
    validate_schedule("classification", &config.schedule)?;
    validate_workers("classification", config.max_workers)?;
    validate_retries("classification", config.max_retries)?;

    if config.credential.trim().is_empty() {
        return Err(ConfigError::Validation(
            "classification credential cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_classifier_config(config: &ClassifierConfig) -> Result<(), ConfigError> {
    validate_endpoint("classifier endpoint", &config.endpoint)?;
    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "classifier model cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_instagram_config(config: &InstagramConfig) -> Result<(), ConfigError> {
    validate_endpoint("instagram endpoint", &config.endpoint)?;
    if config.page_size == 0 || config.page_size > 50 {
        return Err(ConfigError::Validation(format!(
            "instagram page-size must be between 1 and 50, got {}",
            config.page_size
        )));
    }
    Ok(())
}

fn validate_facebook_config(
    config: &FacebookConfig,
    accounts: &[String],
) -> Result<(), ConfigError> {
    validate_endpoint("facebook endpoint", &config.endpoint)?;

    let has_facebook_account = accounts.iter().any(|account| {
        Url::parse(account)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .map(|host| host == "facebook.com" || host.ends_with(".facebook.com"))
            .unwrap_or(false)
    });
    if has_facebook_account && config.doc_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "facebook doc-id is required when facebook accounts are configured".to_string(),
        ));
    }
    Ok(())
}

/// Validates the account list: absolute http(s) URLs with a host, no duplicates
fn validate_accounts(accounts: &[String]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for account in accounts {
        let url = Url::parse(account).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid account URL '{}': {}", account, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Account URL '{}' must be an http(s) URL with a host",
                account
            )));
        }

        if !seen.insert(account.trim_end_matches('/').to_string()) {
            return Err(ConfigError::Validation(format!(
                "Account '{}' is listed more than once",
                account
            )));
        }
    }
    Ok(())
}

fn validate_workers(job: &str, workers: u32) -> Result<(), ConfigError> {
    if workers < 1 || workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "{} max-workers must be between 1 and {}, got {}",
            job, MAX_WORKERS, workers
        )));
    }
    Ok(())
}

fn validate_retries(job: &str, retries: u32) -> Result<(), ConfigError> {
    if retries > MAX_RETRIES {
        return Err(ConfigError::Validation(format!(
            "{} max-retries must be <= {}, got {}",
            job, MAX_RETRIES, retries
        )));
    }
    Ok(())
}

/// Checks the field count of a cron expression; the scheduler parses the rest
fn validate_schedule(job: &str, schedule: &str) -> Result<(), ConfigError> {
    let fields = schedule.split_whitespace().count();
    if !(6..=7).contains(&fields) {
        return Err(ConfigError::InvalidSchedule(format!(
            "{} schedule '{}' must have 6 or 7 fields (seconds first), got {}",
            job, schedule, fields
        )));
    }
    Ok(())
}

fn validate_endpoint(name: &str, endpoint: &str) -> Result<(), ConfigError> {
    Url::parse(endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", name, endpoint, e)))?;
    Ok(())
}
