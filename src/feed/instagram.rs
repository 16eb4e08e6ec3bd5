//! Instagram timeline source
//!
//! Pages through a user's timeline with the web GraphQL query and decodes the
//! response into a typed intermediate form. Any missing required field fails the
//! page as a parse error instead of producing a partial post.

use crate::config::InstagramConfig;
use crate::feed::{username_from_url, FeedSource, RawPage};
use crate::model::{MediaItem, Post};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Tallest image variant kept for a post
const MAX_IMAGE_HEIGHT: u32 = 640;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("feed-harvest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<TimelineData>,
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TimelineData {
    #[serde(rename = "xdt_api__v1__feed__user_timeline_graphql_connection")]
    connection: Connection,
}

#[derive(Debug, Deserialize)]
struct Connection {
    edges: Vec<Edge>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// Instagram sends numeric ids as strings in some payloads and numbers in others
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeId {
    Text(String),
    Number(u64),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Node {
    id: NodeId,
    code: String,
    taken_at: i64,
    user: NodeUser,
    caption: Option<Caption>,
    image_versions2: Option<ImageVersions>,
    #[serde(default)]
    carousel_media: Option<Vec<CarouselItem>>,
    accessibility_caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodeUser {
    pk: NodeId,
    username: String,
    full_name: Option<String>,
    profile_pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Caption {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageVersions {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    url: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct CarouselItem {
    image_versions2: Option<ImageVersions>,
    accessibility_caption: Option<String>,
}

/// Picks the tallest candidate no taller than [`MAX_IMAGE_HEIGHT`], else the smallest
fn pick_candidate(candidates: &[Candidate]) -> Option<Candidate> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| b.height.cmp(&a.height).then(b.width.cmp(&a.width)));
    sorted
        .iter()
        .find(|c| c.height <= MAX_IMAGE_HEIGHT)
        .or_else(|| sorted.last())
        .cloned()
}

fn media_item(versions: Option<&ImageVersions>, caption: Option<&String>) -> Option<MediaItem> {
    let candidate = pick_candidate(&versions?.candidates)?;
    Some(MediaItem {
        url: candidate.url,
        width: candidate.width,
        height: candidate.height,
        caption: caption.cloned(),
    })
}

/// Instagram GraphQL timeline source
pub struct InstagramSource {
    client: Client,
    endpoint: String,
    doc_id: String,
    page_size: u32,
    cookies: String,
}

impl InstagramSource {
    /// Builds the source and its HTTP client
    pub fn new(config: &InstagramConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            doc_id: config.doc_id.clone(),
            page_size: config.page_size,
            cookies: config.cookies.clone(),
        })
    }

    fn variables(&self, username: &str, cursor: Option<&str>) -> String {
        json!({
            "after": cursor,
            "before": null,
            "data": {
                "count": self.page_size,
                "include_relationship_info": true,
                "latest_besties_reel_media": true,
                "latest_reel_media": true,
            },
            "username": username,
            "__relay_internal__pv__PolarisIsLoggedInrelayprovider": true,
            "__relay_internal__pv__PolarisShareSheetV3relayprovider": true,
        })
        .to_string()
    }

    fn to_post(&self, account_url: &str, node: Node) -> Post {
        let media = match &node.carousel_media {
            Some(items) if !items.is_empty() => items
                .iter()
                .filter_map(|item| {
                    media_item(
                        item.image_versions2.as_ref(),
                        item.accessibility_caption.as_ref(),
                    )
                })
                .collect(),
            _ => media_item(
                node.image_versions2.as_ref(),
                node.accessibility_caption.as_ref(),
            )
            .into_iter()
            .collect(),
        };

        Post {
            id: node.id.to_string(),
            platform: self.platform().to_string(),
            account_id: node.user.pk.to_string(),
            account_url: account_url.to_string(),
            created_at: node.taken_at,
            description: node.caption.and_then(|c| c.text),
            post_url: format!("https://www.instagram.com/p/{}", node.code),
            author_name: node.user.full_name.filter(|name| !name.is_empty()),
            username: Some(node.user.username),
            profile_picture: node.user.profile_pic_url,
            media,
        }
    }
}

#[async_trait]
impl FeedSource for InstagramSource {
    fn platform(&self) -> &'static str {
        "instagram"
    }

    fn handles(&self, account: &Url) -> bool {
        match account.host_str() {
            Some(host) => host == "instagram.com" || host.ends_with(".instagram.com"),
            None => false,
        }
    }

    async fn probe(&self) -> Result<()> {
        self.client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| HarvestError::FatalSetup(format!("{} unreachable: {}", self.endpoint, e)))?;
        Ok(())
    }

    async fn fetch_page(&self, account_url: &str, cursor: Option<&str>) -> Result<RawPage> {
        let username = username_from_url(account_url)
            .ok_or_else(|| HarvestError::parse(account_url, "no username in account URL"))?;

        let form = [
            ("variables", self.variables(&username, cursor)),
            ("doc_id", self.doc_id.clone()),
            ("server_timestamps", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/graphql/query", self.endpoint))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, &self.cookies)
            .form(&form)
            .send()
            .await
            .map_err(|e| HarvestError::transport(account_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::transport(
                account_url,
                format!("HTTP {}", status),
            ));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| HarvestError::parse(account_url, format!("timeline payload: {}", e)))?;

        if let Some(errors) = envelope.errors {
            return Err(HarvestError::parse(
                account_url,
                format!("timeline query rejected: {}", errors),
            ));
        }

        let connection = envelope
            .data
            .ok_or_else(|| HarvestError::parse(account_url, "timeline payload has no data"))?
            .connection;

        Ok(RawPage {
            items: connection.edges.into_iter().map(|edge| edge.node).collect(),
            next_cursor: connection.page_info.end_cursor,
            has_more: connection.page_info.has_next_page,
        })
    }

    fn parse(&self, account_url: &str, page: &RawPage) -> Result<Vec<Post>> {
        let mut posts = Vec::with_capacity(page.items.len());

        for item in &page.items {
            let node: Node = serde_json::from_value(item.clone())
                .map_err(|e| HarvestError::parse(account_url, format!("timeline node: {}", e)))?;

            let post = self.to_post(account_url, node);
            if post.is_substantive() {
                posts.push(post);
            } else {
                tracing::debug!("Dropping empty post {} from {}", post.id, account_url);
            }
        }

        Ok(posts)
    }
}
