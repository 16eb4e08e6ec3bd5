//! Extraction and classification work handlers

use crate::classifier::{credential_fingerprint, Classifier};
use crate::engine::orchestrator::JobHandler;
use crate::engine::pagination::{extract, StopCondition};
use crate::feed::FeedRegistry;
use crate::model::{newest_post, parse_outcome, Post};
use crate::state::Watermark;
use crate::storage::Storage;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The two kinds of scheduled work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Extraction,
    Classification,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Classification => "classification",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronizes one account per work item
#[derive(Clone)]
pub struct ExtractionJob {
    registry: FeedRegistry,
    storage: Arc<dyn Storage>,
    accounts: Vec<String>,
    lookback_days: u32,
    cancel: CancellationToken,
}

impl ExtractionJob {
    pub fn new(
        registry: FeedRegistry,
        storage: Arc<dyn Storage>,
        accounts: Vec<String>,
        lookback_days: u32,
    ) -> Self {
        Self {
            registry,
            storage,
            accounts,
            lookback_days,
            cancel: CancellationToken::new(),
        }
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    /// Returns a copy whose pagination loops observe `cancel`
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Probes every source that handles at least one configured account
    ///
    /// # Errors
    ///
    /// `FatalSetup` if any of those sources is unreachable.
    pub async fn probe(&self) -> Result<()> {
        let mut probed = HashSet::new();
        for account in &self.accounts {
            let Ok(source) = self.registry.source_for(account) else {
                continue;
            };
            if !probed.insert(source.platform()) {
                continue;
            }
            source.probe().await.map_err(|e| match e {
                HarvestError::FatalSetup(message) => HarvestError::FatalSetup(message),
                other => HarvestError::FatalSetup(format!(
                    "{} probe failed: {}",
                    source.platform(),
                    other
                )),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ExtractionJob {
    type Item = String;

    fn item_key(&self, account: &String) -> String {
        account.clone()
    }

    async fn handle(&self, account: String) -> Result<()> {
        let source = self.registry.source_for(&account)?;
        let watermark = self.storage.get_watermark(&account)?;
        let stop = StopCondition::for_account(
            watermark.as_ref(),
            Utc::now().date_naive(),
            self.lookback_days,
        );

        let extraction = extract(source.as_ref(), &account, &stop, &self.cancel).await;
        let clean = extraction.error.is_none();

        if let Some(newest) = newest_post(&extraction.posts) {
            let inserted = self.storage.upsert_posts(&extraction.posts)?;

            let mut mark = watermark.unwrap_or_else(|| Watermark::new(account.as_str()));
            mark.advance(newest, clean);
            self.storage.put_watermark(&mark)?;

            tracing::info!(
                "Extracted {} posts from {} ({} new, {} pages)",
                extraction.posts.len(),
                account,
                inserted,
                extraction.pages
            );
        } else {
            tracing::debug!("No new posts from {}", account);
        }

        match extraction.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Classifies one stored post per work item
#[derive(Clone)]
pub struct ClassificationJob {
    classifier: Arc<dyn Classifier>,
    storage: Arc<dyn Storage>,
    credential: String,
    credential_id: String,
}

impl ClassificationJob {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        storage: Arc<dyn Storage>,
        credential: impl Into<String>,
    ) -> Self {
        let credential = credential.into();
        Self {
            credential_id: credential_fingerprint(&credential),
            classifier,
            storage,
            credential,
        }
    }

    /// Posts without a classification outcome, oldest first
    pub fn pending(&self) -> Result<Vec<Post>> {
        Ok(self.storage.pending_classification()?)
    }
}

#[async_trait]
impl JobHandler for ClassificationJob {
    type Item = Post;

    fn item_key(&self, post: &Post) -> String {
        post.id.clone()
    }

    fn credential(&self) -> Option<String> {
        Some(self.credential_id.clone())
    }

    async fn handle(&self, post: Post) -> Result<()> {
        let raw = self.classifier.classify(&post, &self.credential).await?;
        let outcome = parse_outcome(&post.id, raw.as_deref())?;
        self.storage.record_classification(&post.id, &outcome)?;

        if outcome.is_match() {
            tracing::info!("Post {} matched ({})", post.id, post.post_url);
        } else {
            tracing::debug!("Post {} did not match", post.id);
        }
        Ok(())
    }
}
