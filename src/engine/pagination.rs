//! Incremental pagination over one account
//!
//! Pages are requested strictly one after another, newest first, until the
//! source runs out of pages or a page reaches already-synchronized content.

use crate::feed::FeedSource;
use crate::model::Post;
use crate::state::Watermark;
use crate::HarvestError;
use chrono::{Days, NaiveDate};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Where incremental extraction of one account may stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCondition {
    /// Id of the newest post stored by the last clean run
    pub item_id: Option<String>,
    /// Posts created strictly before this instant (epoch seconds) are old
    pub creation_time: i64,
}

impl StopCondition {
    /// Derives the stop condition for an account
    ///
    /// The stop time is UTC midnight of `today` minus `lookback_days`, or the
    /// epoch when that date is out of range.
    pub fn for_account(watermark: Option<&Watermark>, today: NaiveDate, lookback_days: u32) -> Self {
        let creation_time = today
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .and_then(|horizon| horizon.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(0);

        Self {
            item_id: watermark.and_then(|w| w.last_successful_item_id.clone()),
            creation_time,
        }
    }

    /// Returns true if `post` is already-synchronized content
    pub fn is_boundary(&self, post: &Post) -> bool {
        self.item_id.as_deref() == Some(post.id.as_str()) || post.created_at < self.creation_time
    }
}

/// Result of paginating one account
///
/// Posts gathered before a failure are kept alongside the error.
#[derive(Debug, Default)]
pub struct Extraction {
    pub posts: Vec<Post>,
    pub pages: usize,
    pub error: Option<HarvestError>,
}

/// Pages through `account_url` until the stop condition holds
///
/// A page containing a boundary item is truncated at that item: posts before
/// it in feed order are kept, the boundary and everything after it are not.
/// `cancel` is checked before each page request.
pub async fn extract(
    source: &dyn FeedSource,
    account_url: &str,
    stop: &StopCondition,
    cancel: &CancellationToken,
) -> Extraction {
    let mut extraction = Extraction::default();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            extraction.error = Some(HarvestError::Cancelled);
            break;
        }

        let page = match source.fetch_page(account_url, cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                extraction.error = Some(e);
                break;
            }
        };
        extraction.pages += 1;

        let posts = match source.parse(account_url, &page) {
            Ok(posts) => posts,
            Err(e) => {
                extraction.error = Some(e);
                break;
            }
        };

        let boundary = posts.iter().position(|post| stop.is_boundary(post));
        let keep = boundary.unwrap_or(posts.len());
        for post in posts.into_iter().take(keep) {
            if seen.insert(post.id.clone()) {
                extraction.posts.push(post);
            }
        }

        tracing::debug!(
            "Page {} of {}: {} posts so far",
            extraction.pages,
            account_url,
            extraction.posts.len()
        );

        if boundary.is_some() || !page.has_more {
            break;
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => {
                extraction.error = Some(HarvestError::parse(
                    account_url,
                    "page reports more results but carries no cursor",
                ));
                break;
            }
        }
    }

    extraction
}
