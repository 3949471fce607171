//! HTTP transport for the remote API.
//!
//! Wraps a `reqwest::Client` with the base URL, JSON bodies, the bearer
//! token and the error mapping every remote operation shares:
//!
//! - the request never reached a server (connect failure, timeout)
//!   → [`RemoteError::Unreachable`];
//! - the server answered with a non-2xx status → [`RemoteError::Api`]
//!   carrying the server's `error`/`message` text verbatim;
//! - the server answered 2xx with a body we cannot decode
//!   → [`RemoteError::InvalidResponse`].

use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::ApiErrorBody;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::backend::storage::error::StorageError;
use crate::backend::storage::keys::API_TOKEN_KEY;
use crate::backend::storage::traits::KeyValueStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Server at {base_url} is unreachable, check the server address in settings ({reason})")]
    Unreachable { base_url: String, reason: String },
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Unexpected response from server: {0}")]
    InvalidResponse(String),
    #[error("Invalid server address '{0}'")]
    InvalidBaseUrl(String),
}

impl RemoteError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable { .. })
    }

    /// HTTP status of an application error
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// API client for communicating with the backend server
pub struct ApiClient {
    base_url: Url,
    http: Client,
    token: RwLock<Option<String>>,
    kv: Arc<dyn KeyValueStore>,
}

impl ApiClient {
    /// Create a client for `base_url`, picking up a cached session token
    pub fn new(base_url: &str, timeout: Duration, kv: Arc<dyn KeyValueStore>) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|_| RemoteError::InvalidBaseUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidBaseUrl(base_url.to_string()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidResponse(format!("failed to build HTTP client: {}", e)))?;

        let token = match kv.get(API_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!("Failed to read cached session token: {}", e);
                None
            }
        };

        Ok(Self {
            base_url,
            http,
            token: RwLock::new(token),
            kv,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Cache (or clear) the session token, in memory and in storage
    pub fn set_token(&self, token: Option<String>) -> Result<(), StorageError> {
        match &token {
            Some(token) => self.kv.set(API_TOKEN_KEY, token)?,
            None => self.kv.remove(API_TOKEN_KEY)?,
        }
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
        Ok(())
    }

    /// Build a URL from path segments; each segment is percent-encoded
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn transport_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_connect() || e.is_timeout() {
            RemoteError::Unreachable {
                base_url: self.base_url.to_string(),
                reason: e.to_string(),
            }
        } else {
            RemoteError::InvalidResponse(e.to_string())
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<String, RemoteError> {
        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = error_message(status, &body);
        debug!("Server returned {}: {}", status, message);
        Err(RemoteError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn decode<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
        serde_json::from_str(body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let body = self.execute(self.request(Method::GET, url)).await?;
        Self::decode(&body)
    }

    pub async fn post_json<B, T>(&self, url: Url, payload: &B) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(self.request(Method::POST, url).json(payload)).await?;
        Self::decode(&body)
    }

    /// Send a request whose response body is irrelevant
    pub async fn send<B>(&self, method: Method, url: Url, payload: Option<&B>) -> Result<(), RemoteError>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.request(method, url);
        if let Some(payload) = payload {
            builder = builder.json(payload);
        }
        self.execute(builder).await.map(|_| ())
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(text) = parsed.text() {
            return text.to_string();
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('{') {
        return trimmed.to_string();
    }
    format!(
        "Server error {}",
        status.canonical_reason().unwrap_or(status.as_str())
    )
}
