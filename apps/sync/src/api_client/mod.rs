/// Backend client: the single point of entry for every HTTP call this layer makes.
///
/// Endpoints are opaque request/response contracts. Nothing here retries;
/// the only retry policy in the layer is the offline queue's bounded count.
use std::fmt;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod endpoints;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// HTTP verbs a replayable action may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize)]
struct BackendError {
    error: BackendErrorBody,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    message: String,
}

/// Thin wrapper over `reqwest::Client` bound to one backend base URL.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: HttpMethod, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method.as_reqwest(), self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(HttpMethod::Get, path).send().await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        debug!("GET {path} succeeded ({} bytes)", body.len());
        Ok(serde_json::from_str(&body)?)
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.request(HttpMethod::Post, path).json(body).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// POST a JSON body and hand back the open response so the caller can
    /// read it chunk by chunk.
    pub async fn post_streaming<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        let response = self
            .request(HttpMethod::Post, path)
            .header("accept", "text/event-stream")
            .json(body)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Sends an opaque `{endpoint, method, body}` triple and returns the HTTP
    /// status. Non-2xx statuses are not errors here; the caller decides.
    pub async fn send_raw(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<u16, ApiError> {
        let mut builder = self.request(method, endpoint);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        debug!("{method} {endpoint} -> {status}");
        Ok(status)
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Extracts `error.message` from a backend error body, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<BackendError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new("https://api.example.com/v1/", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        assert_eq!(
            client().url("/contacts/saved"),
            "https://api.example.com/v1/contacts/saved"
        );
        assert_eq!(
            client().url("insight"),
            "https://api.example.com/v1/insight"
        );
    }

    #[test]
    fn test_absolute_url_passes_through() {
        assert_eq!(
            client().url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_error_message_from_structured_body() {
        let body = r#"{"error": {"code": "NOT_FOUND", "message": "Contact not found"}}"#;
        assert_eq!(error_message(body), "Contact not found");
    }

    #[test]
    fn test_error_message_falls_back_to_raw_body() {
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_method_serializes_uppercase() {
        let json = serde_json::to_string(&HttpMethod::Delete).unwrap();
        assert_eq!(json, "\"DELETE\"");
        assert_eq!(HttpMethod::Put.to_string(), "PUT");
    }
}
