//! HTTP gateway to the read model and write model services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{CreatedItem, GatewayError, Item, ItemType, NewItem};

const JSON: &str = "application/json";
const JSON_UTF8: &str = "application/json; charset=UTF-8";

/// Operations the item cache needs from the remote services.
///
/// Implemented by [`BacklogClient`] over HTTP and by in-memory doubles in tests.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch a single item from the read model.
    async fn fetch_item(&self, id: &str) -> Result<Option<Item>, GatewayError>;

    /// Fetch the items under `parent_id` (top-level items when `None`),
    /// restricted to `types` unless it is empty.
    async fn fetch_items(
        &self,
        parent_id: Option<&str>,
        types: &[ItemType],
    ) -> Result<Vec<Item>, GatewayError>;

    /// Create an item through the write model and return its assigned id.
    async fn add_item(
        &self,
        title: &str,
        item_type: ItemType,
        parent_id: Option<&str>,
    ) -> Result<CreatedItem, GatewayError>;

    /// Turn a Task into a Story.
    async fn promote_task(&self, id: &str) -> Result<(), GatewayError>;

    /// Mark an item as completed.
    async fn complete_task(&self, id: &str) -> Result<(), GatewayError>;
}

/// Base URLs of the two remote services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub read_model_url: String,
    pub write_model_url: String,
}

impl GatewayConfig {
    pub fn new(read_model_url: impl Into<String>, write_model_url: impl Into<String>) -> Self {
        Self {
            read_model_url: read_model_url.into().trim_end_matches('/').to_string(),
            write_model_url: write_model_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// HTTP client for the backlog read and write models.
pub struct BacklogClient {
    http: Client,
    config: GatewayConfig,
    authenticated_user: Arc<RwLock<Option<String>>>,
}

impl BacklogClient {
    /// Create a new client for the given services.
    ///
    /// An empty `authenticated_user` means requests carry no `Authorization`
    /// header.
    pub fn new(config: GatewayConfig, authenticated_user: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            config,
            authenticated_user: Arc::new(RwLock::new(non_empty(authenticated_user.into()))),
        }
    }

    /// Get the user sent in the `Authorization` header, if any.
    pub async fn authenticated_user(&self) -> Option<String> {
        self.authenticated_user.read().await.clone()
    }

    /// Switch the user for subsequent requests. An empty value clears it.
    pub async fn set_authenticated_user(&self, user: impl Into<String>) {
        let user = non_empty(user.into());
        debug!(user = ?user, "authenticated user changed");
        *self.authenticated_user.write().await = user;
    }

    fn item_url(base: &str, parent_id: Option<&str>) -> String {
        match parent_id {
            Some(parent_id) => format!("{}/item/{}/child", base, parent_id),
            None => format!("{}/item", base),
        }
    }

    /// Start a request with the headers every call carries.
    async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url).header(ACCEPT, JSON);
        match self.authenticated_user.read().await.as_deref() {
            Some(user) => builder.header(AUTHORIZATION, user),
            None => builder,
        }
    }

    /// Turn a non-success status into `RemoteCallFailed`.
    async fn check_status(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await?;
        debug!(status = status.as_u16(), body = %body, "remote call failed");
        Err(GatewayError::RemoteCallFailed {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn patch(&self, url: &str) -> Result<(), GatewayError> {
        debug!(url = %url, "sending command");
        let response = self.request(Method::PATCH, url).await.send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for BacklogClient {
    async fn fetch_item(&self, id: &str) -> Result<Option<Item>, GatewayError> {
        let url = format!("{}/item/{}", self.config.read_model_url, id);
        debug!(url = %url, "fetching item");

        let response = self.request(Method::GET, &url).await.send().await?;
        Self::read_json(response).await
    }

    async fn fetch_items(
        &self,
        parent_id: Option<&str>,
        types: &[ItemType],
    ) -> Result<Vec<Item>, GatewayError> {
        let mut url = Self::item_url(&self.config.read_model_url, parent_id);
        if !types.is_empty() {
            // Sent as a raw `A|B`; `RequestBuilder::query` would encode the bar.
            let filter = types
                .iter()
                .map(ItemType::as_str)
                .collect::<Vec<_>>()
                .join("|");
            url = format!("{}?type={}", url, filter);
        }
        debug!(url = %url, "fetching items");

        let response = self.request(Method::GET, &url).await.send().await?;
        Self::read_json(response).await
    }

    async fn add_item(
        &self,
        title: &str,
        item_type: ItemType,
        parent_id: Option<&str>,
    ) -> Result<CreatedItem, GatewayError> {
        let url = Self::item_url(&self.config.write_model_url, parent_id);
        let body = serde_json::to_vec(&NewItem { title, item_type })?;
        debug!(url = %url, item_type = %item_type, "adding item");

        let response = self
            .request(Method::POST, &url)
            .await
            .header(CONTENT_TYPE, JSON_UTF8)
            .body(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn promote_task(&self, id: &str) -> Result<(), GatewayError> {
        self.patch(&format!("{}/item/{}/promote", self.config.write_model_url, id))
            .await
    }

    async fn complete_task(&self, id: &str) -> Result<(), GatewayError> {
        self.patch(&format!("{}/item/{}/complete", self.config.write_model_url, id))
            .await
    }
}

fn non_empty(user: String) -> Option<String> {
    if user.is_empty() { None } else { Some(user) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Progress;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, user: &str) -> BacklogClient {
        let read = format!("{}/read", server.uri());
        let write = format!("{}/write", server.uri());
        BacklogClient::new(GatewayConfig::new(read, write), user)
    }

    fn task_json(id: &str, parent_id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "type": "Task",
            "title": "Buy milk",
            "progress": "notStarted",
            "parentId": parent_id
        })
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = GatewayConfig::new("http://read/", "http://write");
        assert_eq!(config.read_model_url, "http://read");
        assert_eq!(config.write_model_url, "http://write");
    }

    #[tokio::test]
    async fn test_empty_user_means_no_user() {
        let client = BacklogClient::new(GatewayConfig::new("http://r", "http://w"), "");
        assert_eq!(client.authenticated_user().await, None);

        client.set_authenticated_user("alice").await;
        assert_eq!(client.authenticated_user().await, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_item() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item/t1"))
            .and(header("Accept", "application/json"))
            .and(header("Authorization", "frontend"))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("t1", "s1")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let item = client.fetch_item("t1").await.unwrap().unwrap();

        assert_eq!(item.id, "t1");
        assert_eq!(item.item_type, ItemType::Task);
        assert_eq!(item.progress, Progress::NotStarted);
        assert_eq!(item.parent_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_fetch_item_null_body_is_absent() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item/gone"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        assert_eq!(client.fetch_item("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_top_level_items_with_type_filter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item"))
            .and(query_param("type", "Feature|Epic"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "e1", "type": "Epic", "title": "Launch", "progress": "notStarted" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let items = client
            .fetch_items(None, &[ItemType::Feature, ItemType::Epic])
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].parent_id, None);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].url.query(), Some("type=Feature|Epic"));
    }

    #[tokio::test]
    async fn test_requests_without_body_carry_no_content_type() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("t1", "s1")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/write/item/t1/complete"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        client.fetch_item("t1").await.unwrap();
        client.complete_task("t1").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert!(
                !request.headers.contains_key("content-type"),
                "{} {} sent a content type",
                request.method,
                request.url
            );
        }
    }

    #[tokio::test]
    async fn test_switching_user_changes_authorization_header() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/write/item/t1/promote"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        client.promote_task("t1").await.unwrap();
        client.set_authenticated_user("alice").await;
        client.promote_task("t1").await.unwrap();
        client.set_authenticated_user("").await;
        client.promote_task("t1").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("authorization").unwrap(), "frontend");
        assert_eq!(requests[1].headers.get("authorization").unwrap(), "alice");
        assert!(!requests[2].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_fetch_children_without_filter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item/s1/child"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([task_json("t1", "s1")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let items = client.fetch_items(Some("s1"), &[]).await.unwrap();
        assert_eq!(items[0].id, "t1");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].url.query(), None);
    }

    #[tokio::test]
    async fn test_no_authorization_header_without_user() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server, "");
        client.fetch_items(None, &[]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key("authorization"));
        assert_eq!(requests[0].headers.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_add_child_item() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write/item/epic/child"))
            .and(header("Content-Type", "application/json; charset=UTF-8"))
            .and(header("Authorization", "frontend"))
            .and(body_json(serde_json::json!({ "title": "MMF Title", "type": "Feature" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "f1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let created = client
            .add_item("MMF Title", ItemType::Feature, Some("epic"))
            .await
            .unwrap();

        assert_eq!(created.id, "f1");
    }

    #[tokio::test]
    async fn test_add_top_level_item() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/write/item"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "e9" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let created = client.add_item("Epic", ItemType::Epic, None).await.unwrap();
        assert_eq!(created.id, "e9");
    }

    #[tokio::test]
    async fn test_promote_and_complete() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/write/item/t1/promote"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/write/item/t1/complete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        client.promote_task("t1").await.unwrap();
        client.complete_task("t1").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_remote_call_failed() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/write/item/t1/complete"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already completed"))
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let err = client.complete_task("t1").await.unwrap_err();

        assert_eq!(err.status(), Some(409));
        match err {
            GatewayError::RemoteCallFailed { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "already completed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_items_failure_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let err = client.fetch_items(None, &[ItemType::Task]).await.unwrap_err();
        assert!(matches!(err, GatewayError::RemoteCallFailed { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_json_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/read/item"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, "frontend");
        let err = client.fetch_items(None, &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Json(_)));
    }
}
