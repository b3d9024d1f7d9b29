//! HttpCaseClient - reqwest client for the agent REST API.
//!
//! Non-success responses are mapped back onto [`AgentError`] by status code so
//! callers can match `NotFound` / `Conflict` exactly as they would against the
//! in-memory service.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use super::{EventSource, RemoteCaseClient};
use crate::config::ApiConfig;
use crate::error::{AgentError, Result};
use crate::events::types::{EventType, RemoteEvent};
use crate::model::{LegalCase, SourceFile};

const API_PREFIX: &str = "agents/v1/";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSourceFileRequest<'a> {
    #[serde(flatten)]
    source_file: &'a SourceFile,
    /// Base64-encoded file content.
    content: String,
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    types: Vec<&'a str>,
}

#[derive(Serialize)]
struct ConfirmEventRequest {
    uuid: Uuid,
}

#[derive(Serialize)]
struct PingRequest<'a> {
    payload: &'a str,
}

pub struct HttpCaseClient {
    client: Client,
    base_url: Url,
    client_id: String,
    secret: String,
    poll_interval: Duration,
    /// Events fetched in the last batch but not yet handed to `receive`.
    buffered: Mutex<VecDeque<RemoteEvent>>,
}

impl HttpCaseClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid API base URL: {}", config.base_url))?
            .join(API_PREFIX)
            .context("Failed to build API root URL")?;

        Ok(Self {
            client,
            base_url,
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
            poll_interval: Duration::from_millis(config.event_poll_interval_ms),
            buffered: Mutex::new(VecDeque::new()),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AgentError::InvalidInput(format!("bad path {path}: {e}")))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.basic_auth(&self.client_id, Some(&self.secret))
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::from_status(status, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self.authed(self.client.get(url)).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<()> {
        let url = self.url(path)?;
        let response = self
            .authed(self.client.request(method, url))
            .json(body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_empty(&self, method: reqwest::Method, path: &str) -> Result<()> {
        let url = self.url(path)?;
        let response = self.authed(self.client.request(method, url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    fn pop_buffered(&self) -> Option<RemoteEvent> {
        self.buffered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl RemoteCaseClient for HttpCaseClient {
    async fn health(&self) -> Result<()> {
        self.send_empty(reqwest::Method::GET, "health").await
    }

    async fn create_case(&self, case: &LegalCase) -> Result<()> {
        self.send_json(reqwest::Method::POST, "legalcases", case)
            .await
    }

    async fn get_case(&self, id: Uuid) -> Result<LegalCase> {
        self.get_json(&format!("legalcases/{id}")).await
    }

    async fn update_case(&self, case: &LegalCase) -> Result<()> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("legalcases/{}", case.id),
            case,
        )
        .await
    }

    async fn list_cases(&self) -> Result<Vec<LegalCase>> {
        self.get_json("legalcases").await
    }

    async fn archive_case(&self, id: Uuid) -> Result<()> {
        self.send_empty(reqwest::Method::PATCH, &format!("legalcases/{id}/archive"))
            .await
    }

    async fn delete_case(&self, id: Uuid) -> Result<()> {
        self.send_empty(reqwest::Method::DELETE, &format!("legalcases/{id}"))
            .await
    }

    async fn create_file(&self, file: &SourceFile, content: &[u8]) -> Result<()> {
        let body = CreateSourceFileRequest {
            source_file: file,
            content: STANDARD.encode(content),
        };
        self.send_json(reqwest::Method::POST, "sourcefiles", &body)
            .await
    }

    async fn get_file(&self, id: Uuid) -> Result<SourceFile> {
        self.get_json(&format!("sourcefiles/{id}")).await
    }

    async fn list_files(&self, case_id: Uuid) -> Result<Vec<SourceFile>> {
        self.get_json(&format!("legalcases/{case_id}/sourcefiles"))
            .await
    }

    async fn delete_file(&self, id: Uuid) -> Result<()> {
        self.send_empty(reqwest::Method::DELETE, &format!("sourcefiles/{id}"))
            .await
    }
}

#[async_trait]
impl EventSource for HttpCaseClient {
    async fn subscribe(&self, types: &[EventType]) -> Result<()> {
        let body = SubscribeRequest {
            types: types.iter().map(EventType::as_str).collect(),
        };
        self.send_json(reqwest::Method::POST, "events/subscribe", &body)
            .await
    }

    async fn receive(&self) -> Result<RemoteEvent> {
        loop {
            if let Some(event) = self.pop_buffered() {
                return Ok(event);
            }

            let batch: Vec<RemoteEvent> = self.get_json("events").await?;
            if batch.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            tracing::trace!(count = batch.len(), "Fetched event batch");
            self.buffered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(batch);
        }
    }

    async fn confirm(&self, uuid: Uuid) -> Result<()> {
        self.send_json(
            reqwest::Method::POST,
            "events/confirm",
            &ConfirmEventRequest { uuid },
        )
        .await
        .map_err(|e| match e {
            AgentError::NotFound(_) => AgentError::UnknownEvent(uuid),
            other => other,
        })
    }

    async fn ping(&self, payload: &str) -> Result<()> {
        self.send_json(reqwest::Method::POST, "events/ping", &PingRequest { payload })
            .await
    }

    async fn download_file(&self, uri: &str) -> Result<Vec<u8>> {
        let url = Url::parse(uri)
            .or_else(|_| self.url(uri.trim_start_matches('/')))
            .map_err(|e| AgentError::InvalidInput(format!("bad file uri {uri}: {e}")))?;
        let response = self.authed(self.client.get(url)).send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_urls_are_rooted_under_api_prefix() {
        let client = HttpCaseClient::new(&config("https://agents.example.invalid")).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            client.url(&format!("legalcases/{id}")).unwrap().as_str(),
            format!("https://agents.example.invalid/agents/v1/legalcases/{id}")
        );
    }

    #[test]
    fn test_base_url_with_path_keeps_path() {
        let client = HttpCaseClient::new(&config("http://localhost:8085/api")).unwrap();
        assert_eq!(
            client.url("events").unwrap().as_str(),
            "http://localhost:8085/api/agents/v1/events"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(HttpCaseClient::new(&config("not a url")).is_err());
    }

    #[test]
    fn test_create_file_body_encodes_content() {
        let file = SourceFile::new(Uuid::nil(), Uuid::nil()).reference("hello.pdf");
        let body = CreateSourceFileRequest {
            source_file: &file,
            content: STANDARD.encode(b"%PDF"),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["content"], "JVBERg==");
        assert_eq!(value["reference"], "hello.pdf");
    }
}
