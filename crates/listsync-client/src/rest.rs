//! REST implementation of the list-service client.
//!
//! Speaks the service's v3 member API: members are addressed by the
//! subscriber key under `lists/{list_id}/members/{hash}`, tags are posted
//! as active/inactive toggles, and segments live under
//! `lists/{list_id}/segments`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{ClientError, ClientResult};
use crate::key::subscriber_key;
use crate::traits::ListClient;
use crate::types::{
    AccountInfo, MemberPage, MemberPayload, PageRequest, RemoteMember, Segment,
    SubscriptionStatus,
};

/// Configuration for the REST client.
#[derive(Clone)]
pub struct RestConfig {
    /// API key, sent as HTTP basic auth password.
    pub api_key: String,
    /// Data-center prefix, e.g. `us21`.
    pub server_prefix: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("api_key", &"<redacted>")
            .field("server_prefix", &self.server_prefix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl RestConfig {
    /// Create a configuration with the default 30 second timeout.
    pub fn new(api_key: impl Into<String>, server_prefix: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            server_prefix: server_prefix.into(),
            timeout_secs: 30,
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> ClientResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::invalid_configuration("API key is empty"));
        }
        if self.server_prefix.trim().is_empty() {
            return Err(ClientError::invalid_configuration("server prefix is empty"));
        }
        Ok(())
    }

    /// Base URL for the configured data center.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("https://{}.api.mailchimp.com/3.0", self.server_prefix)
    }
}

/// REST client for the list service.
pub struct RestListClient {
    config: RestConfig,
    client: Client,
}

impl std::fmt::Debug for RestListClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestListClient")
            .field("config", &self.config)
            .finish()
    }
}

impl RestListClient {
    /// Create a new REST client.
    pub fn new(config: RestConfig) -> ClientResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ClientError::invalid_configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url(), path)
    }

    fn member_url(&self, list_id: &str, email: &str) -> String {
        self.url(&format!(
            "lists/{list_id}/members/{}",
            subscriber_key(email)
        ))
    }

    fn transport_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout {
                timeout_secs: self.config.timeout_secs,
            }
        } else if err.is_connect() {
            ClientError::connection_failed_with_source("connection refused or unreachable", err)
        } else {
            ClientError::connection_failed_with_source("request failed", err)
        }
    }

    /// Turn an error response into a `ClientError`, preserving the
    /// service's own `detail`/`title` text.
    async fn error_from_response(&self, response: Response) -> ClientError {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        error_for_status(status, &body)
    }

    async fn check(&self, response: Response) -> ClientResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.error_from_response(response).await)
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(&self, response: Response) -> ClientResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::malformed_response(e.to_string()))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth("listsync", Some(&self.config.api_key))
    }
}

fn error_for_status(status: StatusCode, body: &Value) -> ClientError {
    let detail = body
        .get("detail")
        .and_then(Value::as_str)
        .or_else(|| body.get("title").and_then(Value::as_str))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"))
        .to_string();

    match status.as_u16() {
        401 => ClientError::AuthenticationFailed,
        429 => ClientError::RateLimited { detail },
        code => ClientError::api(code, detail),
    }
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    email_address: &'a str,
    status_if_new: SubscriptionStatus,
    merge_fields: &'a HashMap<String, String>,
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct MemberResource {
    id: String,
    email_address: String,
    status: String,
    #[serde(default)]
    merge_fields: HashMap<String, Value>,
    #[serde(default)]
    tags: Vec<TagResource>,
}

#[derive(Debug, Deserialize)]
struct TagResource {
    name: String,
}

impl MemberResource {
    fn into_member(self) -> ClientResult<RemoteMember> {
        let status = self
            .status
            .parse()
            .map_err(|e: String| ClientError::malformed_response(e))?;

        let merge_fields = self
            .merge_fields
            .into_iter()
            .map(|(name, value)| (name, render_merge_value(&value)))
            .collect();

        Ok(RemoteMember {
            id: self.id,
            email_address: self.email_address,
            status,
            merge_fields,
            tags: self.tags.into_iter().map(|t| t.name).collect(),
        })
    }
}

/// Render a merge field value as text. The service stores some attributes
/// as numbers; local mapping works in strings throughout.
fn render_merge_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct MembersResource {
    #[serde(default)]
    members: Vec<MemberResource>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Debug, Deserialize)]
struct SegmentResource {
    id: Value,
    name: String,
    #[serde(default)]
    member_count: u64,
}

impl SegmentResource {
    fn into_segment(self) -> Segment {
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Segment {
            id,
            name: self.name,
            member_count: self.member_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SegmentsResource {
    #[serde(default)]
    segments: Vec<SegmentResource>,
}

#[derive(Debug, Serialize)]
struct TagToggle<'a> {
    name: &'a str,
    status: &'a str,
}

#[async_trait]
impl ListClient for RestListClient {
    #[instrument(skip(self, payload), fields(email = %payload.email_address))]
    async fn upsert_member(
        &self,
        list_id: &str,
        payload: &MemberPayload,
    ) -> ClientResult<RemoteMember> {
        let body = UpsertBody {
            email_address: &payload.email_address,
            status_if_new: payload.status_if_new,
            merge_fields: &payload.merge_fields,
            tags: &payload.tags,
        };

        let response = self
            .authed(
                self.client
                    .put(self.member_url(list_id, &payload.email_address)),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check(response).await?;
        let resource: MemberResource = self.parse(response).await?;
        resource.into_member()
    }

    #[instrument(skip(self))]
    async fn fetch_members(&self, list_id: &str, page: PageRequest) -> ClientResult<MemberPage> {
        let response = self
            .authed(self.client.get(self.url(&format!("lists/{list_id}/members"))))
            .query(&[
                ("count", page.count.to_string()),
                ("offset", page.offset.to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check(response).await?;
        let resource: MembersResource = self.parse(response).await?;

        let members = resource
            .members
            .into_iter()
            .map(MemberResource::into_member)
            .collect::<ClientResult<Vec<_>>>()?;

        let fetched = page.offset + members.len() as u64;
        debug!(fetched, total = resource.total_items, "fetched member page");

        Ok(MemberPage {
            has_more: fetched < resource.total_items,
            total_items: resource.total_items,
            members,
        })
    }

    #[instrument(skip(self))]
    async fn delete_member(&self, list_id: &str, email: &str) -> ClientResult<()> {
        let response = self
            .authed(self.client.delete(self.member_url(list_id, email)))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, tags))]
    async fn add_tags(&self, list_id: &str, email: &str, tags: &[String]) -> ClientResult<()> {
        self.toggle_tags(list_id, email, tags, "active").await
    }

    #[instrument(skip(self, tags))]
    async fn remove_tags(&self, list_id: &str, email: &str, tags: &[String]) -> ClientResult<()> {
        self.toggle_tags(list_id, email, tags, "inactive").await
    }

    #[instrument(skip(self))]
    async fn list_segments(&self, list_id: &str) -> ClientResult<Vec<Segment>> {
        let response = self
            .authed(
                self.client
                    .get(self.url(&format!("lists/{list_id}/segments"))),
            )
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check(response).await?;
        let resource: SegmentsResource = self.parse(response).await?;
        Ok(resource
            .segments
            .into_iter()
            .map(SegmentResource::into_segment)
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_segment(&self, list_id: &str, name: &str) -> ClientResult<Segment> {
        let body = serde_json::json!({
            "name": name,
            "static_segment": [],
        });

        let response = self
            .authed(
                self.client
                    .post(self.url(&format!("lists/{list_id}/segments"))),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check(response).await?;
        let resource: SegmentResource = self.parse(response).await?;
        Ok(resource.into_segment())
    }

    #[instrument(skip(self))]
    async fn add_to_segment(
        &self,
        list_id: &str,
        segment_id: &str,
        email: &str,
    ) -> ClientResult<()> {
        let body = serde_json::json!({ "email_address": email });

        let response = self
            .authed(self.client.post(self.url(&format!(
                "lists/{list_id}/segments/{segment_id}/members"
            ))))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn test_connection(&self) -> ClientResult<AccountInfo> {
        let response = self
            .authed(self.client.get(format!("{}/", self.config.base_url())))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check(response).await?;
        let body: Value = self.parse(response).await?;

        Ok(AccountInfo {
            account_name: body
                .get("account_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            account_id: body
                .get("account_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl RestListClient {
    async fn toggle_tags(
        &self,
        list_id: &str,
        email: &str,
        tags: &[String],
        status: &str,
    ) -> ClientResult<()> {
        if tags.is_empty() {
            return Ok(());
        }

        let toggles: Vec<TagToggle<'_>> = tags
            .iter()
            .map(|name| TagToggle { name, status })
            .collect();
        let body = serde_json::json!({ "tags": toggles });

        let response = self
            .authed(
                self.client
                    .post(format!("{}/tags", self.member_url(list_id, email))),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(RestConfig::new("key", "us21").validate().is_ok());
        assert!(RestConfig::new("", "us21").validate().is_err());
        assert!(RestConfig::new("key", "  ").validate().is_err());
    }

    #[test]
    fn test_base_url() {
        let config = RestConfig::new("key", "us21");
        assert_eq!(config.base_url(), "https://us21.api.mailchimp.com/3.0");
    }

    #[test]
    fn test_member_url_uses_subscriber_key() {
        let client = RestListClient::new(RestConfig::new("key", "us21")).unwrap();
        let url = client.member_url("L1", "a@x.com");
        assert_eq!(
            url,
            "https://us21.api.mailchimp.com/3.0/lists/L1/members/743173788aa9166801df2e18f0e7ff24"
        );
    }

    #[test]
    fn test_error_for_status_detail() {
        let body = serde_json::json!({"detail": "This list does not exist."});
        let err = error_for_status(StatusCode::NOT_FOUND, &body);
        match err {
            ClientError::Api { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "This list does not exist.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_for_status_title_fallback() {
        let body = serde_json::json!({"title": "Invalid Resource"});
        let err = error_for_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().contains("Invalid Resource"));
    }

    #[test]
    fn test_error_for_status_auth_and_rate() {
        let err = error_for_status(StatusCode::UNAUTHORIZED, &Value::Null);
        assert!(matches!(err, ClientError::AuthenticationFailed));

        let err = error_for_status(StatusCode::TOO_MANY_REQUESTS, &Value::Null);
        assert!(matches!(err, ClientError::RateLimited { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_member_resource_conversion() {
        let resource: MemberResource = serde_json::from_value(serde_json::json!({
            "id": "743173788aa9166801df2e18f0e7ff24",
            "email_address": "a@x.com",
            "status": "subscribed",
            "merge_fields": {"FNAME": "A", "REVENUE": 12000000},
            "tags": [{"id": 1, "name": "source:person"}],
        }))
        .unwrap();

        let member = resource.into_member().unwrap();
        assert_eq!(member.status, SubscriptionStatus::Subscribed);
        assert_eq!(member.merge_field("FNAME"), Some("A"));
        assert_eq!(member.merge_field("REVENUE"), Some("12000000"));
        assert_eq!(member.tags, vec!["source:person".to_string()]);
    }

    #[test]
    fn test_member_resource_bad_status() {
        let resource: MemberResource = serde_json::from_value(serde_json::json!({
            "id": "x",
            "email_address": "a@x.com",
            "status": "archived?",
        }))
        .unwrap();
        assert!(resource.into_member().is_err());
    }

    #[test]
    fn test_segment_resource_numeric_id() {
        let resource: SegmentResource = serde_json::from_value(serde_json::json!({
            "id": 49381,
            "name": "High Value Customers",
            "member_count": 125,
        }))
        .unwrap();
        let segment = resource.into_segment();
        assert_eq!(segment.id, "49381");
        assert_eq!(segment.name, "High Value Customers");
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = RestConfig::new("super-secret", "us21");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("us21"));
    }
}
