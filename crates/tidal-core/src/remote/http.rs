//! Generic JSON-over-HTTP remote endpoint.
//!
//! Routes, relative to the configured base URL:
//! `POST /{table}`, `PUT /{table}/{id}` (with `If-Match: <version>`),
//! `DELETE /{table}/{id}` and `GET /{table}`. A `409 Conflict` response
//! carries the remote's current record as its body.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;

use super::{RemoteAck, RemoteEndpoint, RemoteRecord};
use crate::models::Payload;
use crate::util::{compact_text, is_http_url};
use crate::{Error, Result};

/// HTTP client for a record-store backend.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    record_id: &'a str,
    payload: &'a Payload,
}

impl HttpRemote {
    /// Builds a client for an explicit base URL; `token` is sent as a bearer token.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Transport(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(table))
    }

    fn record_url(&self, table: &str, record_id: &str) -> String {
        format!(
            "{}/{}",
            self.table_url(table),
            urlencoding::encode(record_id)
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn dispatch(request: RequestBuilder, action: &str) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|error| Error::Transport(format!("{action} request failed: {error}")))
    }

    async fn check(
        response: Response,
        table: &str,
        record_id: &str,
        action: &str,
    ) -> Result<Response> {
        if response.status() == StatusCode::CONFLICT {
            let remote = response.json::<RemoteRecord>().await.map_err(|error| {
                Error::Transport(format!("Failed to parse conflict response: {error}"))
            })?;
            return Err(Error::VersionConflict {
                table: table.to_string(),
                record_id: record_id.to_string(),
                remote: Box::new(remote),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "{action} request failed with HTTP {status}: {}",
                compact_text(&body)
            )));
        }
        Ok(response)
    }

    async fn send(
        request: RequestBuilder,
        table: &str,
        record_id: &str,
        action: &str,
    ) -> Result<Response> {
        let response = Self::dispatch(request, action).await?;
        Self::check(response, table, record_id, action).await
    }

    async fn read_ack(response: Response) -> Result<RemoteAck> {
        response
            .json::<RemoteAck>()
            .await
            .map_err(|error| Error::Transport(format!("Failed to parse write response: {error}")))
    }
}

impl RemoteEndpoint for HttpRemote {
    async fn create(&self, table: &str, record_id: &str, payload: &Payload) -> Result<RemoteAck> {
        let request = self
            .request(Method::POST, self.table_url(table))
            .json(&CreateBody { record_id, payload });
        let response = Self::send(request, table, record_id, "Create").await?;
        Self::read_ack(response).await
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<RemoteAck> {
        let mut request = self
            .request(Method::PUT, self.record_url(table, record_id))
            .json(payload);
        if let Some(version) = base_version {
            request = request.header("If-Match", version.to_string());
        }
        let response = Self::send(request, table, record_id, "Update").await?;
        Self::read_ack(response).await
    }

    async fn delete(&self, table: &str, record_id: &str, base_version: Option<i64>) -> Result<()> {
        let mut request = self.request(Method::DELETE, self.record_url(table, record_id));
        if let Some(version) = base_version {
            request = request.header("If-Match", version.to_string());
        }

        let response = Self::dispatch(request, "Delete").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response, table, record_id, "Delete").await?;
        Ok(())
    }

    async fn list(&self, table: &str) -> Result<Vec<RemoteRecord>> {
        let request = self.request(Method::GET, self.table_url(table));
        let response = Self::send(request, table, "*", "List").await?;
        response
            .json::<Vec<RemoteRecord>>()
            .await
            .map_err(|error| Error::Transport(format!("Failed to parse list response: {error}")))
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(Error::InvalidInput(
            "Remote base URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(&base) {
        return Err(Error::InvalidInput(
            "Remote base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("sync.example.com").is_err());
    }

    #[test]
    fn normalize_base_url_trims_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://sync.example.com/v1/").unwrap(),
            "https://sync.example.com/v1"
        );
    }

    #[test]
    fn record_urls_are_percent_encoded() {
        let remote = HttpRemote::new(
            "https://sync.example.com/v1",
            None,
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(
            remote.record_url("notes", "a b/c"),
            "https://sync.example.com/v1/notes/a%20b%2Fc"
        );
        assert_eq!(remote.table_url("notes"), "https://sync.example.com/v1/notes");
    }
}
