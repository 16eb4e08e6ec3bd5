//! Gemini `generateContent` classifier

use crate::classifier::{credential_fingerprint, Classifier};
use crate::config::ClassifierConfig;
use crate::model::Post;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Assumed when the image host sends no content type
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Prompt used when the configuration does not provide one
///
/// `{today}` and `{description}` are replaced before the call.
pub const DEFAULT_PROMPT: &str = r#"You receive a social media post published by an Islamic outreach account. Decide whether it announces the schedule of one or more Islamic lectures (kajian).

If it does, answer with a JSON object, or a JSON array with one object per lecture day:
{"theme": string, "date": "YYYY-MM-DD" or null, "venue": string or null, "location": string or null, "speaker": string or null}

If it does not announce a lecture schedule (prayer times, i'tikaf schedules and similar do not count), or it carries no date or time information, answer with JSON null.

When only a weekday is given, resolve the date relative to today, {today}.

Post text: '{description}'"#;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Classifier backed by the Gemini REST API in JSON response mode
pub struct GeminiClassifier {
    client: Client,
    endpoint: String,
    model: String,
    prompt: String,
}

impl GeminiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        })
    }

    fn render_prompt(&self, post: &Post) -> String {
        let today = Utc::now().format("%A, %Y-%m-%d").to_string();
        self.prompt
            .replace("{today}", &today)
            .replace("{description}", post.description.as_deref().unwrap_or(""))
    }

    /// Downloads the post's first image as an inline request part
    async fn image_part(&self, post: &Post) -> Result<Option<serde_json::Value>> {
        let Some(media) = post.media.first() else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&media.url)
            .send()
            .await
            .map_err(|e| HarvestError::transport(&post.id, format!("image download: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::transport(
                &post.id,
                format!("image download returned HTTP {}", status),
            ));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::transport(&post.id, format!("image download: {}", e)))?;

        tracing::debug!("Inlining {} bytes of {} for post {}", bytes.len(), mime_type, post.id);
        Ok(Some(json!({
            "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(&bytes) }
        })))
    }
}

/// Reads a `Retry-After` header given in seconds
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, post: &Post, credential: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        let mut parts = vec![json!({ "text": self.render_prompt(post) })];
        if let Some(image) = self.image_part(post).await? {
            parts.push(image);
        }
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .client
            .post(url)
            .query(&[("key", credential)])
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::transport(&post.id, e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(HarvestError::RateLimited {
                credential: credential_fingerprint(credential),
                retry_after: retry_after(&response),
            });
        }
        if !status.is_success() {
            return Err(HarvestError::transport(
                &post.id,
                format!("classifier returned HTTP {}", status),
            ));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::parse(&post.id, e.without_url().to_string()))?;

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text)))
    }
}
