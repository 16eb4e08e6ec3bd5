//! Facebook profile timeline source
//!
//! The timeline GraphQL endpoint streams one JSON document per line. Feed units
//! arrive either as a labelled `..._timeline_list_feed_units` document or inside
//! the first, unlabelled one; the page info rides on the last document that
//! carries it.

use crate::config::FacebookConfig;
use crate::feed::{username_from_url, FeedSource, RawPage};
use crate::model::{MediaItem, Post};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("feed-harvest/", env!("CARGO_PKG_VERSION"));

const FRIENDLY_NAME: &str = "ProfileCometTimelineFeedRefetchQuery";

/// Feed units requested per page
const PAGE_SIZE: u32 = 3;

#[derive(Debug, Deserialize)]
struct StreamDoc {
    label: Option<String>,
    data: Option<StreamData>,
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamData {
    node: Option<serde_json::Value>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

impl StreamDoc {
    /// The feed unit this document carries, if any
    fn feed_unit(&self) -> Option<serde_json::Value> {
        let node = self.data.as_ref()?.node.as_ref()?;
        match &self.label {
            Some(label) if label.ends_with("timeline_list_feed_units") => Some(node.clone()),
            Some(_) => None,
            None => node
                .pointer("/timeline_list_feed_units/edges/0/node")
                .filter(|unit| !unit.is_null())
                .cloned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedUnit {
    post_id: String,
    comet_sections: UnitSections,
}

#[derive(Debug, Deserialize)]
struct UnitSections {
    content: ContentSection,
    context_layout: ContextLayout,
}

#[derive(Debug, Deserialize)]
struct ContentSection {
    story: ContentStory,
}

#[derive(Debug, Deserialize)]
struct ContentStory {
    actors: Vec<Actor>,
    message: Option<Message>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Actor {
    id: String,
    name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    styles: Option<AttachmentStyles>,
}

#[derive(Debug, Deserialize)]
struct AttachmentStyles {
    attachment: Option<AttachmentBody>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    all_subattachments: Option<Subattachments>,
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
struct Subattachments {
    #[serde(default)]
    nodes: Vec<Subattachment>,
}

#[derive(Debug, Deserialize)]
struct Subattachment {
    media: Option<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "__typename")]
    typename: String,
    image_uri: Option<String>,
    image: Option<Image>,
    viewer_image: Option<Image>,
    comet_photo_attachment_resolution_renderer: Option<ResolutionRenderer>,
    accessibility_caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Image {
    uri: Option<String>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ResolutionRenderer {
    image: Image,
}

#[derive(Debug, Deserialize)]
struct ContextLayout {
    story: ContextStory,
}

#[derive(Debug, Deserialize)]
struct ContextStory {
    comet_sections: ContextSections,
}

#[derive(Debug, Deserialize)]
struct ContextSections {
    #[serde(default)]
    metadata: Vec<Metadata>,
    actor_photo: Option<ActorPhoto>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    story: Option<MetadataStory>,
}

#[derive(Debug, Deserialize)]
struct MetadataStory {
    creation_time: Option<i64>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActorPhoto {
    story: ActorPhotoStory,
}

#[derive(Debug, Deserialize)]
struct ActorPhotoStory {
    #[serde(default)]
    actors: Vec<PhotoActor>,
}

#[derive(Debug, Deserialize)]
struct PhotoActor {
    profile_picture: Option<Picture>,
}

#[derive(Debug, Deserialize)]
struct Picture {
    uri: Option<String>,
}

impl Media {
    fn is_photo(&self) -> bool {
        self.typename == "Photo"
    }

    /// A carousel entry: direct URI, else the viewer or plain image
    fn subattachment_item(&self) -> Option<MediaItem> {
        let image = self.viewer_image.as_ref().or(self.image.as_ref());
        let url = self
            .image_uri
            .clone()
            .or_else(|| image.and_then(|i| i.uri.clone()))?;
        Some(MediaItem {
            url,
            width: image.map(|i| i.width).unwrap_or(0),
            height: image.map(|i| i.height).unwrap_or(0),
            caption: self.accessibility_caption.clone(),
        })
    }

    /// A single attached photo rendered at its attachment resolution
    fn single_item(&self) -> Option<MediaItem> {
        let image = self
            .comet_photo_attachment_resolution_renderer
            .as_ref()
            .map(|r| &r.image)
            .or(self.image.as_ref())?;
        Some(MediaItem {
            url: image.uri.clone()?,
            width: image.width,
            height: image.height,
            caption: self.accessibility_caption.clone(),
        })
    }
}

fn media_items(story: &ContentStory) -> Vec<MediaItem> {
    let Some(body) = story
        .attachments
        .first()
        .and_then(|a| a.styles.as_ref())
        .and_then(|s| s.attachment.as_ref())
    else {
        return Vec::new();
    };

    match &body.all_subattachments {
        Some(subs) if !subs.nodes.is_empty() => subs
            .nodes
            .iter()
            .filter_map(|node| node.media.as_ref())
            .filter(|media| media.is_photo())
            .filter_map(Media::subattachment_item)
            .collect(),
        _ => body
            .media
            .as_ref()
            .filter(|media| media.is_photo())
            .and_then(Media::single_item)
            .into_iter()
            .collect(),
    }
}

/// Facebook GraphQL profile timeline source
pub struct FacebookSource {
    client: Client,
    endpoint: String,
    doc_id: String,
    cookies: String,
}

impl FacebookSource {
    /// Builds the source and its HTTP client
    pub fn new(config: &FacebookConfig) -> Result<Self> {
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
            cookies: config.cookies.clone(),
        })
    }

    fn variables(profile: &str, cursor: Option<&str>) -> String {
        json!({
            "count": PAGE_SIZE,
            "cursor": cursor,
            "id": profile,
            "renderLocation": "timeline",
            "scale": 1,
        })
        .to_string()
    }

    fn to_post(&self, account_url: &str, unit: FeedUnit) -> Result<Post> {
        let FeedUnit {
            post_id,
            comet_sections: sections,
        } = unit;
        let story = sections.content.story;
        let context = sections.context_layout.story.comet_sections;

        let actor = story.actors.first().ok_or_else(|| {
            HarvestError::parse(account_url, format!("post {} has no actor", post_id))
        })?;
        let metadata = context
            .metadata
            .iter()
            .filter_map(|m| m.story.as_ref())
            .find(|story| story.creation_time.is_some());
        let created_at = metadata
            .and_then(|m| m.creation_time)
            .ok_or_else(|| {
                HarvestError::parse(account_url, format!("post {} has no creation time", post_id))
            })?;

        let profile_picture = context
            .actor_photo
            .and_then(|photo| photo.story.actors.into_iter().next())
            .and_then(|actor| actor.profile_picture)
            .and_then(|picture| picture.uri);

        Ok(Post {
            id: format!("{}_{}", post_id, actor.id),
            platform: self.platform().to_string(),
            account_id: actor.id.clone(),
            account_url: account_url.to_string(),
            created_at,
            description: story.message.as_ref().and_then(|m| m.text.clone()),
            post_url: metadata
                .and_then(|m| m.url.clone())
                .unwrap_or_else(|| format!("https://www.facebook.com/{}", post_id)),
            author_name: actor.name.clone().filter(|name| !name.is_empty()),
            username: actor.url.as_deref().and_then(username_from_url),
            profile_picture,
            media: media_items(&story),
        })
    }
}

#[async_trait]
impl FeedSource for FacebookSource {
    fn platform(&self) -> &'static str {
        "facebook"
    }

    fn handles(&self, account: &Url) -> bool {
        match account.host_str() {
            Some(host) => host == "facebook.com" || host.ends_with(".facebook.com"),
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
        let profile = username_from_url(account_url)
            .ok_or_else(|| HarvestError::parse(account_url, "no profile id in account URL"))?;

        let form = [
            ("fb_api_req_friendly_name", FRIENDLY_NAME.to_string()),
            ("variables", Self::variables(&profile, cursor)),
            ("doc_id", self.doc_id.clone()),
            ("server_timestamps", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/api/graphql/", self.endpoint))
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

        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::transport(account_url, e.to_string()))?;

        let mut items = Vec::new();
        let mut page_info = None;
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            let doc: StreamDoc = serde_json::from_str(line).map_err(|e| {
                HarvestError::parse(account_url, format!("timeline document: {}", e))
            })?;

            if let Some(errors) = &doc.errors {
                return Err(HarvestError::parse(
                    account_url,
                    format!("timeline query rejected: {}", errors),
                ));
            }
            if let Some(unit) = doc.feed_unit() {
                items.push(unit);
            }
            if let Some(info) = doc.data.and_then(|data| data.page_info) {
                page_info = Some(info);
            }
        }

        let page_info = page_info
            .ok_or_else(|| HarvestError::parse(account_url, "timeline payload has no page info"))?;

        Ok(RawPage {
            items,
            next_cursor: page_info.end_cursor,
            has_more: page_info.has_next_page,
        })
    }

    fn parse(&self, account_url: &str, page: &RawPage) -> Result<Vec<Post>> {
        let mut posts = Vec::with_capacity(page.items.len());

        for item in &page.items {
            let unit: FeedUnit = serde_json::from_value(item.clone())
                .map_err(|e| HarvestError::parse(account_url, format!("feed unit: {}", e)))?;

            let post = self.to_post(account_url, unit)?;
            if post.is_substantive() {
                posts.push(post);
            } else {
                tracing::debug!("Dropping empty post {} from {}", post.id, account_url);
            }
        }

        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT: &str = "https://www.facebook.com/masjidraya/";

    fn source(endpoint: &str) -> FacebookSource {
        FacebookSource::new(&FacebookConfig {
            endpoint: endpoint.to_string(),
            doc_id: "77".to_string(),
            cookies: "c_user=1; xs=abc".to_string(),
        })
        .unwrap()
    }

    fn unit(post_id: &str, creation_time: i64, message: Option<&str>) -> serde_json::Value {
        json!({
            "post_id": post_id,
            "comet_sections": {
                "content": {
                    "story": {
                        "actors": [{
                            "id": "5001",
                            "name": "Masjid Raya",
                            "url": "https://www.facebook.com/masjidraya"
                        }],
                        "message": message.map(|text| json!({ "text": text })),
                        "attachments": []
                    }
                },
                "context_layout": {
                    "story": {
                        "comet_sections": {
                            "metadata": [{
                                "story": {
                                    "creation_time": creation_time,
                                    "url": format!("https://www.facebook.com/masjidraya/posts/{}", post_id)
                                }
                            }],
                            "actor_photo": {
                                "story": {
                                    "actors": [{ "profile_picture": { "uri": "https://cdn.test/pp.jpg" } }]
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Builds the streamed body: first unit unlabelled, the rest labelled, page info last
    fn stream(units: Vec<serde_json::Value>, next: Option<&str>) -> String {
        let mut lines = Vec::new();
        for (i, unit) in units.into_iter().enumerate() {
            let doc = if i == 0 {
                json!({ "data": { "node": { "timeline_list_feed_units": { "edges": [{ "node": unit }] } } } })
            } else {
                json!({ "label": "ProfileCometTimelineFeed_user$stream$user_timeline_list_feed_units", "data": { "node": unit } })
            };
            lines.push(doc.to_string());
        }
        lines.push(
            json!({
                "label": "ProfileCometTimelineFeed_user$defer$page_info",
                "data": { "page_info": { "has_next_page": next.is_some(), "end_cursor": next } }
            })
            .to_string(),
        );
        lines.join("\r\n")
    }

    #[test]
    fn test_handles_facebook_hosts_only() {
        let source = source("http://localhost");
        assert!(source.handles(&Url::parse("https://www.facebook.com/a").unwrap()));
        assert!(source.handles(&Url::parse("https://web.facebook.com/a").unwrap()));
        assert!(source.handles(&Url::parse("https://facebook.com/a").unwrap()));
        assert!(!source.handles(&Url::parse("https://www.instagram.com/a").unwrap()));
        assert!(!source.handles(&Url::parse("https://notfacebook.com/a").unwrap()));
    }

    #[test]
    fn test_parse_builds_posts_and_drops_empty_ones() {
        let source = source("http://localhost");
        let page = RawPage {
            items: vec![unit("11", 300, Some("Kajian Ahad pagi")), unit("12", 200, None)],
            next_cursor: None,
            has_more: false,
        };

        let posts = source.parse(ACCOUNT, &page).unwrap();
        assert_eq!(posts.len(), 1);

        let post = &posts[0];
        assert_eq!(post.id, "11_5001");
        assert_eq!(post.platform, "facebook");
        assert_eq!(post.account_id, "5001");
        assert_eq!(post.created_at, 300);
        assert_eq!(post.description.as_deref(), Some("Kajian Ahad pagi"));
        assert_eq!(post.post_url, "https://www.facebook.com/masjidraya/posts/11");
        assert_eq!(post.author_name.as_deref(), Some("Masjid Raya"));
        assert_eq!(post.username.as_deref(), Some("masjidraya"));
        assert_eq!(post.profile_picture.as_deref(), Some("https://cdn.test/pp.jpg"));
    }

    #[test]
    fn test_parse_subattachment_photos() {
        let source = source("http://localhost");
        let mut album = unit("21", 100, None);
        album["comet_sections"]["content"]["story"]["attachments"] = json!([{
            "styles": { "attachment": { "all_subattachments": { "nodes": [
                { "media": {
                    "__typename": "Photo",
                    "image_uri": "https://cdn.test/a.jpg",
                    "image": { "uri": "https://cdn.test/a-small.jpg", "width": 600, "height": 400 },
                    "accessibility_caption": "poster"
                } },
                { "media": { "__typename": "Video" } },
                { "media": {
                    "__typename": "Photo",
                    "viewer_image": { "uri": "https://cdn.test/b.jpg", "width": 720, "height": 720 }
                } }
            ] } } }
        }]);

        let page = RawPage {
            items: vec![album],
            next_cursor: None,
            has_more: false,
        };
        let posts = source.parse(ACCOUNT, &page).unwrap();

        let media = &posts[0].media;
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].url, "https://cdn.test/a.jpg");
        assert_eq!((media[0].width, media[0].height), (600, 400));
        assert_eq!(media[0].caption.as_deref(), Some("poster"));
        assert_eq!(media[1].url, "https://cdn.test/b.jpg");
    }

    #[test]
    fn test_parse_single_photo_fallback() {
        let source = source("http://localhost");
        let mut single = unit("31", 100, None);
        single["comet_sections"]["content"]["story"]["attachments"] = json!([{
            "styles": { "attachment": { "media": {
                "__typename": "Photo",
                "comet_photo_attachment_resolution_renderer": {
                    "image": { "uri": "https://cdn.test/one.jpg", "width": 960, "height": 640 }
                }
            } } }
        }]);

        let page = RawPage {
            items: vec![single],
            next_cursor: None,
            has_more: false,
        };
        let posts = source.parse(ACCOUNT, &page).unwrap();

        assert_eq!(posts[0].media.len(), 1);
        assert_eq!(posts[0].media[0].url, "https://cdn.test/one.jpg");
        assert_eq!(posts[0].media[0].height, 640);
    }

    #[test]
    fn test_parse_missing_creation_time_fails_closed() {
        let source = source("http://localhost");
        let mut broken = unit("41", 100, Some("x"));
        broken["comet_sections"]["context_layout"]["story"]["comet_sections"]["metadata"] =
            json!([]);

        let page = RawPage {
            items: vec![broken],
            next_cursor: None,
            has_more: false,
        };
        let err = source.parse(ACCOUNT, &page).unwrap_err();
        assert!(matches!(err, HarvestError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_fetch_page_reads_streamed_units_and_page_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql/"))
            .and(header("cookie", "c_user=1; xs=abc"))
            .and(body_string_contains("doc_id=77"))
            .and(body_string_contains(FRIENDLY_NAME))
            .and(body_string_contains("masjidraya"))
            .and(body_string_contains("cursor-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(stream(
                vec![unit("1", 300, Some("a")), unit("2", 200, Some("b"))],
                Some("cursor-2"),
            )))
            .mount(&server)
            .await;

        let source = source(&server.uri());
        let page = source.fetch_page(ACCOUNT, Some("cursor-1")).await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("cursor-2"));

        let ids: Vec<_> = source
            .parse(ACCOUNT, &page)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["1_5001", "2_5001"]);
    }

    #[tokio::test]
    async fn test_fetch_page_without_page_info_is_parse_error() {
        let server = MockServer::start().await;
        let body = json!({ "data": { "node": { "timeline_list_feed_units": { "edges": [] } } } })
            .to_string();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let err = source(&server.uri())
            .fetch_page(ACCOUNT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_fetch_page_non_success_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = source(&server.uri())
            .fetch_page(ACCOUNT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Transport { .. }));
    }
}
