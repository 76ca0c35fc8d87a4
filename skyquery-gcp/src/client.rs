//! Authenticated REST client shared by every typed service handle.
//!
//! All GCP JSON APIs follow the same shape:
//! - Base URL: `https://{service}.googleapis.com/{version}/`
//! - Auth: `Authorization: Bearer {access_token}`
//! - Pagination: `pageToken` / `nextPageToken`
//! - Errors: `{"error": {"code": 403, "status": "PERMISSION_DENIED", "message": "..."}}`

use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::auth::AccessTokenSource;
use crate::services::ServiceKind;
use crate::session::Session;
use crate::{GcpError, Result};

const QUOTA_PROJECT_HEADER: &str = "x-goog-user-project";

/// Client for one GCP REST API.
#[derive(Clone)]
pub struct ApiClient {
    kind: ServiceKind,
    base_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    project: Option<String>,
    quota_project: Option<String>,
}

impl ApiClient {
    /// Build a client for `kind` from session options.
    pub fn new(kind: ServiceKind, session: &Session) -> Result<Self> {
        let mut base_url = session.endpoint(kind).to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Url::parse(&base_url).map_err(|e| {
            GcpError::Config(format!("invalid endpoint for {}: {} ({})", kind, base_url, e))
        })?;

        Ok(Self {
            kind,
            base_url,
            http: session.http().clone(),
            tokens: session.tokens(),
            project: session.project().map(str::to_string),
            quota_project: session.quota_project().map(str::to_string),
        })
    }

    /// The API this client talks to.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Base URL, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Configured project, if any.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// Join a method path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        let mut request = request.bearer_auth(token);
        if let Some(quota) = &self.quota_project {
            request = request.header(QUOTA_PROJECT_HEADER, quota);
        }
        Ok(request)
    }

    /// GET a method path and deserialize the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.url(path);
        trace!(service = self.kind.cache_key(), %url, "GET");
        let request = self.authorize(self.http.get(&url).query(query)).await?;
        self.send(request).await
    }

    /// POST a JSON body and deserialize the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        trace!(service = self.kind.cache_key(), %url, "POST");
        let request = self.authorize(self.http.post(&url).json(body)).await?;
        self.send(request).await
    }

    /// DELETE a method path, discarding the response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        trace!(service = self.kind.cache_key(), %url, "DELETE");
        let request = self.authorize(self.http.delete(&url)).await?;
        let response = request.send().await?;
        self.check(response).await.map(|_| ())
    }

    /// Follow `nextPageToken` pagination and collect the `items_field` array
    /// of every page.
    pub async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        items_field: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, &str)> = query.to_vec();
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: serde_json::Value = self.get_json(path, &params).await?;
            if let Some(serde_json::Value::Array(values)) = page.get(items_field) {
                for value in values {
                    items.push(serde_json::from_value(value.clone())?);
                }
            }

            match page.get("nextPageToken").and_then(|t| t.as_str()) {
                Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.check(request.send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(api_error(self.kind, status.as_u16(), &body))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("quota_project", &self.quota_project)
            .finish()
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/// Parse a Google error body into a [`GcpError::Api`].
fn api_error(kind: ServiceKind, code: u16, body: &str) -> GcpError {
    let (status, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.status, envelope.error.message),
        Err(_) => (String::new(), body.trim().to_string()),
    };
    GcpError::Api {
        service: kind.cache_key(),
        code,
        status,
        message,
    }
}
