//! Post classification collaborators
//!
//! A classifier receives one post and the API credential to spend, and returns
//! the raw model output. Turning that text into a
//! [`ClassificationOutcome`](crate::model::ClassificationOutcome) is done by
//! [`parse_outcome`](crate::model::parse_outcome), so every classifier shares the
//! same fail-closed interpretation.

mod gemini;

pub use gemini::{GeminiClassifier, DEFAULT_PROMPT};

use crate::model::Post;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Stable, non-secret identifier for an API credential
///
/// Used as the rate-limit record key and in log lines in place of the key itself.
pub fn credential_fingerprint(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    format!("key-{}", &hex::encode(digest)[..12])
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies `post`, returning the raw output text (`None` when the model
    /// produced nothing)
    ///
    /// # Errors
    ///
    /// `RateLimited` when the credential's quota is exhausted, `Transport` for
    /// any other failed call.
    async fn classify(&self, post: &Post, credential: &str) -> Result<Option<String>>;
}
