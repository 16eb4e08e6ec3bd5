use serde::{Deserialize, Serialize};

/// An image attached to a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub caption: Option<String>,
}

/// A content item pulled from a remote account
///
/// Posts are immutable once stored; `id` is stable and unique per platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub platform: String,
    pub account_id: String,
    pub account_url: String,
    /// Creation time in epoch seconds
    pub created_at: i64,
    pub description: Option<String>,
    pub post_url: String,
    pub author_name: Option<String>,
    pub username: Option<String>,
    pub profile_picture: Option<String>,
    pub media: Vec<MediaItem>,
}

impl Post {
    /// A post with neither text nor media carries nothing worth classifying
    pub fn is_substantive(&self) -> bool {
        let has_text = self
            .description
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false);
        has_text || !self.media.is_empty()
    }
}

/// Picks the newest post by creation time; ties keep the earliest in feed order
pub fn newest_post(posts: &[Post]) -> Option<&Post> {
    posts.iter().fold(None, |newest: Option<&Post>, post| match newest {
        Some(current) if current.created_at >= post.created_at => Some(current),
        _ => Some(post),
    })
}
