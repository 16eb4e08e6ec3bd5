use crate::model::Post;

/// Per-account progress marker bounding incremental extraction
///
/// `last_seen_*` follows the newest post stored by any run, including runs that
/// ended with an error. `last_successful_*` only moves when a run finished
/// cleanly, and is what the next run uses as its stop item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub account_url: String,
    pub last_seen_item_id: Option<String>,
    pub last_seen_creation_time: Option<i64>,
    pub last_successful_item_id: Option<String>,
    pub last_successful_creation_time: Option<i64>,
}

impl Watermark {
    /// Creates an empty watermark for an account that was never synced
    pub fn new(account_url: impl Into<String>) -> Self {
        Self {
            account_url: account_url.into(),
            last_seen_item_id: None,
            last_seen_creation_time: None,
            last_successful_item_id: None,
            last_successful_creation_time: None,
        }
    }

    /// Records `post` as the newest post stored for this account
    ///
    /// The successful cursor only advances when `clean` is true.
    pub fn advance(&mut self, post: &Post, clean: bool) {
        self.last_seen_item_id = Some(post.id.clone());
        self.last_seen_creation_time = Some(post.created_at);
        if clean {
            self.last_successful_item_id = Some(post.id.clone());
            self.last_successful_creation_time = Some(post.created_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, created_at: i64) -> Post {
        Post {
            id: id.to_string(),
            platform: "instagram".to_string(),
            account_id: "1".to_string(),
            account_url: "https://www.instagram.com/a".to_string(),
            created_at,
            description: Some("x".to_string()),
            post_url: String::new(),
            author_name: None,
            username: None,
            profile_picture: None,
            media: vec![],
        }
    }

    #[test]
    fn test_clean_advance_moves_both_cursors() {
        let mut mark = Watermark::new("https://www.instagram.com/a");
        mark.advance(&post("p1", 100), true);

        assert_eq!(mark.last_seen_item_id.as_deref(), Some("p1"));
        assert_eq!(mark.last_successful_item_id.as_deref(), Some("p1"));
        assert_eq!(mark.last_successful_creation_time, Some(100));
    }

    #[test]
    fn test_partial_advance_keeps_successful_cursor() {
        let mut mark = Watermark::new("https://www.instagram.com/a");
        mark.advance(&post("p1", 100), true);
        mark.advance(&post("p2", 200), false);

        assert_eq!(mark.last_seen_item_id.as_deref(), Some("p2"));
        assert_eq!(mark.last_seen_creation_time, Some(200));
        assert_eq!(mark.last_successful_item_id.as_deref(), Some("p1"));
        assert_eq!(mark.last_successful_creation_time, Some(100));
    }
}
