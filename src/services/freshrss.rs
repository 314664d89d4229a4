use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::NewArticle;

use super::reader_api::{
    Category, ReaderApi, StreamContentsQuery, StreamIdsQuery, StreamItem, Subscription, Tag,
};

const USER_AGENT: &str = "speedy-sync/1.0";

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    subscriptions: Vec<WireSubscription>,
}

#[derive(Debug, Deserialize)]
struct WireSubscription {
    id: String,
    title: Option<String>,
    url: Option<String>,
    #[serde(rename = "htmlUrl")]
    html_url: Option<String>,
    #[serde(default)]
    categories: Vec<WireCategory>,
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    id: String,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<WireTag>,
}

#[derive(Debug, Deserialize)]
struct WireTag {
    id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamContentsResponse {
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Default, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: String,
    #[serde(rename = "timestampUsec")]
    timestamp_usec: Option<String>,
    published: Option<i64>,
    title: Option<String>,
    author: Option<String>,
    #[serde(default)]
    canonical: Vec<WireLink>,
    #[serde(default)]
    alternate: Vec<WireLink>,
    #[serde(default)]
    categories: Vec<String>,
    origin: Option<WireOrigin>,
    summary: Option<WireContent>,
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct WireLink {
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireOrigin {
    #[serde(rename = "streamId")]
    stream_id: Option<String>,
    #[serde(rename = "htmlUrl")]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemIdsResponse {
    #[serde(rename = "itemRefs")]
    item_refs: Option<Vec<ItemRef>>,
}

#[derive(Debug, Deserialize)]
struct ItemRef {
    id: String,
}

/// HTTP client for a FreshRSS (Google Reader API) server.
///
/// `host` is the API base, e.g. `https://rss.example.com/api/greader.php`.
pub struct FreshRssClient {
    client: Client,
    host: String,
    auth_token: RwLock<Option<String>>,
}

impl FreshRssClient {
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            auth_token: RwLock::new(None),
        })
    }

    pub fn set_auth_token(&self, token: &str) {
        if let Ok(mut guard) = self.auth_token.write() {
            *guard = Some(token.to_string());
        }
    }

    fn auth_token(&self) -> Option<String> {
        self.auth_token.read().ok().and_then(|token| token.clone())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.host, endpoint)
    }

    async fn get(&self, endpoint: &str, mut params: Vec<(&str, String)>) -> Result<Response> {
        params.push(("ck", Utc::now().timestamp_millis().to_string()));
        let request = self.client.get(self.url(endpoint)).query(&params);
        self.send(request).await
    }

    async fn post(&self, endpoint: &str, form: Vec<(&str, String)>) -> Result<Response> {
        let request = self.client.post(self.url(endpoint)).form(&form);
        self.send(request).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match self.auth_token() {
            Some(token) => request.header(AUTHORIZATION, format!("GoogleLogin auth={}", token)),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ReaderApi for FreshRssClient {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let form = vec![("Email", username.to_string()), ("Passwd", password.to_string())];
        let response = match self.post("/accounts/ClientLogin", form).await {
            Err(AppError::Api { status: 403, .. }) => return Err(AppError::Unauthorized),
            other => other?,
        };

        let body = response.text().await?;
        body.lines()
            .find_map(|line| line.trim().strip_prefix("Auth="))
            .map(str::to_string)
            .ok_or(AppError::Unauthorized)
    }

    async fn write_token(&self) -> Result<String> {
        let response = self.get("/reader/api/0/token", Vec::new()).await?;
        Ok(response.text().await?.trim().to_string())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        let params = vec![("output", "json".to_string())];
        let response = self.get("/reader/api/0/subscription/list", params).await?;
        let list: SubscriptionList = response.json().await?;

        Ok(list
            .subscriptions
            .into_iter()
            .map(|sub| Subscription {
                id: sub.id,
                title: sub.title.unwrap_or_default(),
                url: sub.url.unwrap_or_default(),
                html_url: sub.html_url.unwrap_or_default(),
                categories: sub
                    .categories
                    .into_iter()
                    .map(|cat| Category {
                        id: cat.id,
                        label: cat.label.unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let params = vec![("output", "json".to_string())];
        let response = self.get("/reader/api/0/tag/list", params).await?;
        let list: TagList = response.json().await?;

        Ok(list
            .tags
            .into_iter()
            .map(|tag| Tag {
                id: tag.id,
                kind: tag.kind,
            })
            .collect())
    }

    async fn stream_contents(&self, query: StreamContentsQuery) -> Result<Vec<StreamItem>> {
        let mut params = Vec::new();
        if let Some(exclude) = query.exclude {
            params.push(("xt", exclude));
        }
        if query.since > 0 {
            params.push(("ot", query.since.to_string()));
        }
        if query.limit > 0 {
            params.push(("n", query.limit.to_string()));
        }
        params.push(("r", "n".to_string()));

        let endpoint = format!("/reader/api/0/stream/contents/{}", query.stream_id);
        let response = self.get(&endpoint, params).await?;
        let contents: StreamContentsResponse = response.json().await?;

        let items = contents
            .items
            .into_iter()
            .filter_map(|item| {
                let mapped = stream_item(item);
                if mapped.is_none() {
                    tracing::warn!("Skipping stream item without a usable id");
                }
                mapped
            })
            .collect();
        Ok(items)
    }

    async fn stream_item_ids(&self, query: StreamIdsQuery) -> Result<Vec<String>> {
        let mut params = vec![("s", query.include)];
        if let Some(exclude) = query.exclude {
            params.push(("xt", exclude));
        }
        if query.limit > 0 {
            params.push(("n", query.limit.to_string()));
        }
        params.push(("r", "n".to_string()));
        params.push(("output", "json".to_string()));

        let response = self.get("/reader/api/0/stream/items/ids", params).await?;
        let ids: ItemIdsResponse = response.json().await?;

        Ok(ids
            .item_refs
            .unwrap_or_default()
            .into_iter()
            .map(|item| item.id)
            .collect())
    }

    async fn edit_tag(
        &self,
        write_token: &str,
        item_ids: &[String],
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Result<()> {
        let mut form = vec![("T", write_token.to_string())];
        if let Some(add) = add {
            form.push(("a", add.to_string()));
        }
        if let Some(remove) = remove {
            form.push(("r", remove.to_string()));
        }
        form.extend(item_ids.iter().map(|id| ("i", id.clone())));

        let response = self.post("/reader/api/0/edit-tag", form).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if body.trim() != "OK" {
            return Err(AppError::Api { status, body });
        }
        Ok(())
    }
}

fn stream_item(item: WireItem) -> Option<StreamItem> {
    let id = short_item_id(&item.id).or_else(|| {
        item.timestamp_usec
            .clone()
            .filter(|usec| !usec.is_empty())
    })?;

    let (feed_id, origin_url) = match item.origin {
        Some(origin) => (
            origin.stream_id.unwrap_or_default(),
            origin.html_url.unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };

    let href = first_href(&item.canonical)
        .or_else(|| first_href(&item.alternate))
        .unwrap_or(origin_url);

    let content = item
        .content
        .and_then(|c| c.content)
        .or_else(|| item.summary.and_then(|s| s.content))
        .unwrap_or_default();

    Some(StreamItem {
        article: NewArticle {
            id,
            feed_id,
            title: item.title.unwrap_or_default(),
            content,
            author: item.author.unwrap_or_default(),
            href,
            published_at: item.published.unwrap_or_default(),
        },
        categories: item.categories,
    })
}

fn first_href(links: &[WireLink]) -> Option<String> {
    links
        .iter()
        .filter_map(|link| link.href.as_deref())
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

/// Decimal form of an item id, as used by `stream/items/ids`.
///
/// Long ids look like `tag:google.com,2005:reader/item/000000000000001f`.
fn short_item_id(long_id: &str) -> Option<String> {
    let tail = long_id.rsplit('/').next()?;
    if tail.is_empty() {
        return None;
    }
    if long_id.starts_with("tag:google.com") {
        return u64::from_str_radix(tail, 16).ok().map(|n| n.to_string());
    }
    if tail.chars().all(|c| c.is_ascii_digit()) {
        return Some(tail.to_string());
    }
    None
}
