//! HTTP client shared by the REST backends.
//!
//! Wraps reqwest with:
//! - Basic or session-token authentication
//! - Retry with backoff on transient failures (network errors, 429, 5xx).
//!   Only GET is retried after the request may have reached the server;
//!   other methods retry connect failures only.
//! - Non-2xx responses turned into [`MigrationError::Api`]

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::Endpoint;
use crate::config::NetworkConfig;
use crate::error::{MigrationError, Result};
use crate::poll::{retry_async, PollConfig};

/// Characters of a non-JSON error body kept in the error message.
const ERROR_BODY_LIMIT: usize = 300;

/// How requests are authenticated.
#[derive(Clone)]
enum Auth {
    Basic { username: String, password: String },
    Session { header: &'static str, token: String },
}

/// REST client bound to one management endpoint.
pub struct HttpClient {
    client: Client,
    base_url: Url,
    auth: RwLock<Auth>,
    credentials: (String, String),
    retry: PollConfig,
}

impl HttpClient {
    /// Create a client that authenticates with HTTP basic auth.
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .danger_accept_invalid_certs(endpoint.accept_invalid_certs)
            .build()
            .map_err(|e| MigrationError::Connection {
                system: endpoint.host.clone(),
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let base_url = Url::parse(&endpoint.base_url()).map_err(|e| {
            MigrationError::validation("host", format!("invalid endpoint {}: {}", endpoint.host, e))
        })?;

        Ok(Self {
            client,
            base_url,
            auth: RwLock::new(Auth::Basic {
                username: endpoint.username.clone(),
                password: endpoint.password.clone(),
            }),
            credentials: (endpoint.username.clone(), endpoint.password.clone()),
            retry: PollConfig::new()
                .with_interval(Duration::from_secs(1))
                .with_max_interval(Duration::from_secs(10))
                .with_backoff(2.0)
                .with_jitter(true),
        })
    }

    /// Switch to session-token authentication.
    pub fn set_session(&self, header: &'static str, token: impl Into<String>) {
        let mut auth = self.auth.write().unwrap_or_else(|p| p.into_inner());
        *auth = Auth::Session {
            header,
            token: token.into(),
        };
    }

    /// Drop the session token and fall back to basic auth.
    pub fn clear_session(&self) {
        let mut auth = self.auth.write().unwrap_or_else(|p| p.into_inner());
        *auth = Auth::Basic {
            username: self.credentials.0.clone(),
            password: self.credentials.1.clone(),
        };
    }

    /// Resolve an API path (or a server-relative link) against the endpoint.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| MigrationError::validation("path", format!("{}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let auth = self.auth.read().unwrap_or_else(|p| p.into_inner()).clone();
        match auth {
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Session { header, token } => request.header(header, token),
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = self.url(path)?;
        let mut request = self.authorize(self.client.request(method.clone(), url.clone()));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {}", method, url);
        let response = request.send().await.map_err(|e| MigrationError::Network {
            message: format!("{} {} failed: {}", method, url, e),
            source: Some(e),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = api_error_message(&text)
            .unwrap_or_else(|| truncate_chars(text.trim(), ERROR_BODY_LIMIT));
        Err(MigrationError::Api {
            url: url.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    /// Send a request, retrying transient failures.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let idempotent = method == Method::GET;
        retry_async(
            &self.retry,
            NetworkConfig::MAX_RETRIES,
            || self.send_once(method.clone(), path, query, body),
            |e: &MigrationError| {
                if idempotent {
                    e.is_retryable()
                } else {
                    e.is_connect_failure()
                }
            },
        )
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.send(Method::GET, path, query, None).await?;
        Ok(response.json::<T>().await?)
    }

    /// POST and decode a JSON response body.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> Result<T> {
        let response = self.send(Method::POST, path, query, Some(body)).await?;
        Ok(response.json::<T>().await?)
    }

    /// Send a request whose response body is ignored.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<()> {
        self.send(method, path, query, body).await.map(|_| ())
    }
}

/// Pull the human-readable message out of an ONTAP or vSphere error body.
pub fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.pointer("/messages/0/default_message"))
        .or_else(|| value.pointer("/localizableMessage/defaultMessage"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Keep at most `max` characters of `text`.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
