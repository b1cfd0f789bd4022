//! Notion database as the document store.
//!
//! Each capture becomes a page in one database with three properties:
//! `Name` (title), `URL` (url) and `Status` (select). Content is appended as
//! block children in batches; comments go through the comments endpoint.

use super::blocks::{markdown_to_blocks, rich_text};
use super::DocumentStore;
use crate::config::MAX_BLOCKS_PER_APPEND;
use crate::document::{DocumentId, DocumentStatus};
use crate::error::WebclipError;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// API version the request bodies are written against.
pub const NOTION_VERSION: &str = "2022-06-28";

const DEFAULT_API_BASE: &str = "https://api.notion.com/v1";

/// Connection settings for [`NotionDocumentStore`].
#[derive(Clone)]
pub struct NotionConfig {
    pub token: String,
    pub database_id: String,
    pub api_base: String,
    pub max_blocks_per_append: usize,
    pub timeout: Duration,
}

impl NotionConfig {
    pub fn new(token: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            database_id: database_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_blocks_per_append: MAX_BLOCKS_PER_APPEND,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionConfig")
            .field("token", &"<redacted>")
            .field("database_id", &self.database_id)
            .field("api_base", &self.api_base)
            .field("max_blocks_per_append", &self.max_blocks_per_append)
            .finish()
    }
}

/// [`DocumentStore`] backed by the Notion REST API.
#[derive(Debug, Clone)]
pub struct NotionDocumentStore {
    client: Client,
    config: NotionConfig,
}

impl NotionDocumentStore {
    pub fn new(config: NotionConfig) -> Result<Self, WebclipError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebclipError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Value,
    ) -> Result<Value, WebclipError> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        let response = self
            .client
            .request(method, &url)
            .bearer_auth(&self.config.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| WebclipError::publish(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WebclipError::publish(
                operation,
                format!("HTTP {status}: {detail}"),
            ));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| WebclipError::publish(operation, e))
    }

    /// IDs of the non-archived pages whose `URL` property equals `url`.
    async fn pages_for_url(&self, url: &str) -> Result<Vec<String>, WebclipError> {
        let path = format!("databases/{}/query", self.config.database_id);
        let response = self
            .call("query_database", Method::POST, &path, query_body(url))
            .await?;
        Ok(page_ids(&response))
    }
}

#[async_trait]
impl DocumentStore for NotionDocumentStore {
    async fn create_document(&self, title: &str, url: &str) -> Result<DocumentId, WebclipError> {
        for page_id in self.pages_for_url(url).await? {
            self.call(
                "archive_page",
                Method::PATCH,
                &format!("pages/{page_id}"),
                json!({ "archived": true }),
            )
            .await?;
            info!(url, page_id = %page_id, "archived previous capture");
        }

        let response = self
            .call(
                "create_page",
                Method::POST,
                "pages",
                create_page_body(&self.config.database_id, title, url),
            )
            .await?;
        let id = response["id"]
            .as_str()
            .ok_or_else(|| WebclipError::publish("create_page", "response has no page id"))?;
        debug!(url, page_id = id, "page created");
        Ok(DocumentId(id.to_string()))
    }

    async fn append_content(&self, id: &DocumentId, markdown: &str) -> Result<(), WebclipError> {
        let blocks = markdown_to_blocks(markdown);
        let path = format!("blocks/{id}/children");
        for (n, batch) in blocks.chunks(self.config.max_blocks_per_append.max(1)).enumerate() {
            let children: Vec<Value> = batch.iter().map(|b| b.to_json()).collect();
            self.call(
                "append_blocks",
                Method::PATCH,
                &path,
                json!({ "children": children }),
            )
            .await?;
            debug!(page_id = %id, batch = n + 1, blocks = batch.len(), "blocks appended");
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: &DocumentId,
        status: DocumentStatus,
    ) -> Result<(), WebclipError> {
        self.call(
            "update_status",
            Method::PATCH,
            &format!("pages/{id}"),
            status_body(status),
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, id: &DocumentId, text: &str) -> Result<(), WebclipError> {
        self.call("create_comment", Method::POST, "comments", comment_body(id, text))
            .await?;
        Ok(())
    }
}

// ── Request bodies ───────────────────────────────────────────────────────────

fn query_body(url: &str) -> Value {
    json!({
        "filter": {
            "property": "URL",
            "url": { "equals": url }
        }
    })
}

fn page_ids(response: &Value) -> Vec<String> {
    response["results"]
        .as_array()
        .map(|pages| {
            pages
                .iter()
                .filter(|p| !p["archived"].as_bool().unwrap_or(false))
                .filter_map(|p| p["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn create_page_body(database_id: &str, title: &str, url: &str) -> Value {
    json!({
        "parent": { "database_id": database_id },
        "properties": {
            "Name": { "title": rich_text(title) },
            "URL": { "url": url },
            "Status": { "select": { "name": DocumentStatus::InProgress.as_str() } }
        }
    })
}

fn status_body(status: DocumentStatus) -> Value {
    json!({
        "properties": {
            "Status": { "select": { "name": status.as_str() } }
        }
    })
}

fn comment_body(id: &DocumentId, text: &str) -> Value {
    json!({
        "parent": { "page_id": id.as_str() },
        "rich_text": rich_text(text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_on_url_property() {
        let body = query_body("https://ex.com/");
        assert_eq!(body["filter"]["property"], "URL");
        assert_eq!(body["filter"]["url"]["equals"], "https://ex.com/");
    }

    #[test]
    fn page_ids_skip_archived() {
        let response = json!({
            "results": [
                { "id": "a", "archived": false },
                { "id": "b", "archived": true },
                { "id": "c" }
            ]
        });
        assert_eq!(page_ids(&response), vec!["a".to_string(), "c".to_string()]);
        assert!(page_ids(&json!({})).is_empty());
    }

    #[test]
    fn new_page_starts_in_progress() {
        let body = create_page_body("db", "Title", "https://ex.com/");
        assert_eq!(body["parent"]["database_id"], "db");
        assert_eq!(body["properties"]["Status"]["select"]["name"], "In progress");
        assert_eq!(body["properties"]["URL"]["url"], "https://ex.com/");
        assert_eq!(
            body["properties"]["Name"]["title"][0]["text"]["content"],
            "Title"
        );
    }

    #[test]
    fn status_and_comment_bodies() {
        assert_eq!(
            status_body(DocumentStatus::Failed)["properties"]["Status"]["select"]["name"],
            "Failed"
        );
        let body = comment_body(&DocumentId("p1".into()), "could not fetch");
        assert_eq!(body["parent"]["page_id"], "p1");
        assert_eq!(body["rich_text"][0]["text"]["content"], "could not fetch");
    }

    #[test]
    fn debug_redacts_token() {
        let config = NotionConfig::new("secret_abc", "db");
        assert!(!format!("{config:?}").contains("secret_abc"));
    }
}
