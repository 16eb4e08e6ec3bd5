use serde::Deserialize;

/// Main configuration structure for Feed-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub classification: Option<ClassificationConfig>,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub facebook: FacebookConfig,
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// Settings shared by every job
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Identifies this node; prefixes the retry-ledger scopes
    #[serde(rename = "server-id")]
    pub server_id: String,

    /// Pause between two chunks of the same cycle (milliseconds)
    #[serde(rename = "chunk-delay-ms", default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Extraction job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Six-field cron expression (seconds first)
    #[serde(default = "default_extraction_schedule")]
    pub schedule: String,

    /// Number of accounts synchronized concurrently
    #[serde(rename = "max-workers", default = "default_extraction_workers")]
    pub max_workers: u32,

    /// Requeues allowed per account and cycle
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Posts older than midnight (UTC) of today minus this many days stop pagination
    #[serde(rename = "lookback-days", default = "default_lookback_days")]
    pub lookback_days: u32,

    #[serde(rename = "run-on-start", default = "default_true")]
    pub run_on_start: bool,
}

/// Classification job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_classification_schedule")]
    pub schedule: String,

    #[serde(rename = "max-workers", default = "default_classification_workers")]
    pub max_workers: u32,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// API credential; also keys the durable rate-limit record
    pub credential: String,

    /// Backoff recorded when a rate-limit response carries no hint (milliseconds)
    #[serde(rename = "default-backoff-ms", default = "default_backoff_ms")]
    pub default_backoff_ms: u64,

    #[serde(rename = "run-on-start", default = "default_true")]
    pub run_on_start: bool,
}

/// Classifier endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_classifier_model")]
    pub model: String,

    /// Prompt template; `{description}` and `{today}` are substituted
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            model: default_classifier_model(),
            prompt: None,
        }
    }
}

/// Instagram feed source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InstagramConfig {
    #[serde(default = "default_instagram_endpoint")]
    pub endpoint: String,

    #[serde(rename = "doc-id", default = "default_instagram_doc_id")]
    pub doc_id: String,

    #[serde(rename = "page-size", default = "default_instagram_page_size")]
    pub page_size: u32,

    /// Raw `Cookie` header value sent with every timeline request
    #[serde(default)]
    pub cookies: String,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            endpoint: default_instagram_endpoint(),
            doc_id: default_instagram_doc_id(),
            page_size: default_instagram_page_size(),
            cookies: String::new(),
        }
    }
}

/// Facebook feed source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FacebookConfig {
    #[serde(default = "default_facebook_endpoint")]
    pub endpoint: String,

    /// Persisted query id of the profile timeline refetch query
    #[serde(rename = "doc-id", default)]
    pub doc_id: String,

    #[serde(default)]
    pub cookies: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            endpoint: default_facebook_endpoint(),
            doc_id: String::new(),
            cookies: String::new(),
        }
    }
}

fn default_chunk_delay_ms() -> u64 {
    200
}

fn default_extraction_schedule() -> String {
    "0 0/30 * * * *".to_string()
}

fn default_classification_schedule() -> String {
    "0 15/30 * * * *".to_string()
}

fn default_extraction_workers() -> u32 {
    1
}

fn default_classification_workers() -> u32 {
    2
}

fn default_lookback_days() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    60_200
}

fn default_true() -> bool {
    true
}

fn default_classifier_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_classifier_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_instagram_endpoint() -> String {
    "https://www.instagram.com".to_string()
}

fn default_instagram_doc_id() -> String {
    "28584433827869438".to_string()
}

fn default_instagram_page_size() -> u32 {
    12
}

fn default_facebook_endpoint() -> String {
    "https://web.facebook.com".to_string()
}
