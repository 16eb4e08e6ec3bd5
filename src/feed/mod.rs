//! Feed source collaborators
//!
//! A feed source knows how to page through one platform's account timeline and
//! how to turn a raw page into [`Post`] records. The pagination engine and the
//! extraction job are written once against [`FeedSource`]; platforms plug in
//! through the [`FeedRegistry`].

mod facebook;
mod instagram;

pub use facebook::FacebookSource;
pub use instagram::InstagramSource;

use crate::model::Post;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// One page of a remote account timeline, before parsing
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// Opaque item records in feed order (newest first)
    pub items: Vec<serde_json::Value>,
    /// Cursor for the following page
    pub next_cursor: Option<String>,
    /// Whether the platform reports another page
    pub has_more: bool,
}

/// Fetches and parses timeline pages for one platform
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Platform name stored on every post this source produces
    fn platform(&self) -> &'static str;

    /// Returns true if this source can synchronize `account`
    fn handles(&self, account: &Url) -> bool;

    /// Checks that the platform is reachable before a cycle starts
    ///
    /// A failure here aborts the whole cycle as a fatal setup error.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// Fetches one page of `account_url`, starting after `cursor`
    async fn fetch_page(&self, account_url: &str, cursor: Option<&str>) -> Result<RawPage>;

    /// Turns a raw page into posts, dropping items with neither text nor media
    fn parse(&self, account_url: &str, page: &RawPage) -> Result<Vec<Post>>;
}

/// Extracts the account handle from a profile URL: its last non-empty path segment
pub(crate) fn username_from_url(account_url: &str) -> Option<String> {
    let url = Url::parse(account_url).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Routes account URLs to the feed source that handles them
#[derive(Clone, Default)]
pub struct FeedRegistry {
    sources: Vec<Arc<dyn FeedSource>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source; earlier registrations win when several match
    pub fn register(&mut self, source: Arc<dyn FeedSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn FeedSource>] {
        &self.sources
    }

    /// Finds the source for `account_url`
    ///
    /// # Errors
    ///
    /// `UnsupportedAccount` if the URL does not parse or no source handles it.
    pub fn source_for(&self, account_url: &str) -> Result<Arc<dyn FeedSource>> {
        let url = Url::parse(account_url)
            .map_err(|_| HarvestError::UnsupportedAccount(account_url.to_string()))?;

        self.sources
            .iter()
            .find(|source| source.handles(&url))
            .cloned()
            .ok_or_else(|| HarvestError::UnsupportedAccount(account_url.to_string()))
    }
}
