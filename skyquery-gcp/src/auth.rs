//! Access token sources.
//!
//! Every client handle authenticates through an [`AccessTokenSource`].
//! Service account keys and Application Default Credentials are delegated to
//! `gcp_auth`; impersonation wraps another source and exchanges its token
//! through the IAM Credentials API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CredentialsSource;
use crate::{GcpError, Result};

/// Default IAM Credentials endpoint used for impersonation.
pub const IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com/";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Produces OAuth bearer tokens.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Get a valid access token.
    async fn access_token(&self) -> Result<String>;

    /// Project the credentials belong to, if known.
    async fn project_id(&self) -> Option<String> {
        None
    }
}

/// A fixed, caller-supplied token.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Create a static token source.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Token source backed by a `gcp_auth` provider.
pub struct ProviderTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
    scopes: Vec<String>,
}

impl ProviderTokenSource {
    /// Wrap a `gcp_auth` provider requesting `scopes`.
    pub fn new(provider: Arc<dyn gcp_auth::TokenProvider>, scopes: Vec<String>) -> Self {
        Self { provider, scopes }
    }

    /// Build a provider from resolved credentials.
    ///
    /// Unreadable or malformed key material is a [`GcpError::Credentials`];
    /// failing to discover Application Default Credentials is a
    /// [`GcpError::Auth`].
    pub async fn from_credentials(
        credentials: &CredentialsSource,
        scopes: Vec<String>,
    ) -> Result<Self> {
        let provider: Arc<dyn gcp_auth::TokenProvider> = match credentials {
            CredentialsSource::ServiceAccountFile(path) => {
                let account = gcp_auth::CustomServiceAccount::from_file(path).map_err(|e| {
                    GcpError::Credentials(format!("failed to load {}: {}", path, e))
                })?;
                Arc::new(account)
            }
            CredentialsSource::ServiceAccountJson(json) => {
                let account = gcp_auth::CustomServiceAccount::from_json(json)
                    .map_err(|e| GcpError::Credentials(e.to_string()))?;
                Arc::new(account)
            }
            CredentialsSource::ApplicationDefault => gcp_auth::provider().await?,
            CredentialsSource::AccessToken(_) => {
                return Err(GcpError::Config(
                    "static access tokens do not use a credentials provider".to_string(),
                ));
            }
        };
        Ok(Self::new(provider, scopes))
    }
}

#[async_trait]
impl AccessTokenSource for ProviderTokenSource {
    async fn access_token(&self) -> Result<String> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let token = self.provider.token(&scopes).await?;
        Ok(token.as_str().to_string())
    }

    async fn project_id(&self) -> Option<String> {
        self.provider.project_id().await.ok().map(|p| p.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
    lifetime: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Impersonates a service account using tokens from another source.
///
/// Concurrent callers wait on one refresh instead of each exchanging a token.
pub struct ImpersonatedTokenSource {
    source: Arc<dyn AccessTokenSource>,
    target: String,
    scopes: Vec<String>,
    lifetime: Duration,
    endpoint: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ImpersonatedTokenSource {
    /// Impersonate `target` with credentials from `source`.
    pub fn new(
        source: Arc<dyn AccessTokenSource>,
        target: impl Into<String>,
        scopes: Vec<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            source,
            target: target.into(),
            scopes,
            lifetime: Duration::from_secs(3600),
            endpoint: IAM_CREDENTIALS_ENDPOINT.to_string(),
            http,
            cached: Mutex::new(None),
        }
    }

    /// Use a different IAM Credentials endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Request tokens valid for `lifetime`.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// The impersonated service account.
    pub fn target(&self) -> &str {
        &self.target
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let source_token = self.source.access_token().await?;
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:generateAccessToken",
            self.endpoint.trim_end_matches('/'),
            self.target
        );
        let body = GenerateAccessTokenRequest {
            scope: &self.scopes,
            lifetime: format!("{}s", self.lifetime.as_secs()),
        };

        let requested_at = Instant::now();
        let response = self
            .http
            .post(&url)
            .bearer_auth(source_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GcpError::Auth(format!(
                "impersonating {} failed (HTTP {}): {}",
                self.target,
                status.as_u16(),
                text.trim()
            )));
        }

        let parsed: GenerateAccessTokenResponse = response.json().await?;
        debug!(target_account = %self.target, "obtained impersonated access token");
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: requested_at + self.lifetime,
        })
    }
}

#[async_trait]
impl AccessTokenSource for ImpersonatedTokenSource {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached
            .as_ref()
            .filter(|current| Instant::now() + REFRESH_MARGIN < current.expires_at)
        {
            return Ok(current.token.clone());
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn project_id(&self) -> Option<String> {
        project_from_service_account(&self.target)
    }
}

/// Extract the project from a `name@project.iam.gserviceaccount.com` email.
pub fn project_from_service_account(email: &str) -> Option<String> {
    let (_, domain) = email.split_once('@')?;
    let project = domain.strip_suffix(".iam.gserviceaccount.com")?;
    (!project.is_empty()).then(|| project.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticTokenSource::new("ya29.static");
        assert_eq!(source.access_token().await.unwrap(), "ya29.static");
        assert_eq!(source.project_id().await, None);
    }

    #[test]
    fn test_project_from_service_account() {
        assert_eq!(
            project_from_service_account("reader@my-project.iam.gserviceaccount.com"),
            Some("my-project".to_string())
        );
        assert_eq!(project_from_service_account("someone@example.com"), None);
        assert_eq!(project_from_service_account("no-at-sign"), None);
    }

    #[tokio::test]
    async fn test_missing_key_file_is_credentials_error() {
        let result = ProviderTokenSource::from_credentials(
            &CredentialsSource::ServiceAccountFile("/nonexistent/key.json".into()),
            vec![],
        )
        .await;
        assert!(matches!(result, Err(GcpError::Credentials(_))));
    }

    #[tokio::test]
    async fn test_malformed_key_json_is_credentials_error() {
        let result = ProviderTokenSource::from_credentials(
            &CredentialsSource::ServiceAccountJson("{\"type\": \"nope\"}".into()),
            vec![],
        )
        .await;
        assert!(matches!(result, Err(GcpError::Credentials(_))));
    }

    #[tokio::test]
    async fn test_impersonation_exchanges_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/v1/projects/-/serviceAccounts/reader@proj.iam.gserviceaccount.com:generateAccessToken",
            ))
            .and(header("authorization", "Bearer source-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "impersonated-token",
                "expireTime": "2030-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = ImpersonatedTokenSource::new(
            Arc::new(StaticTokenSource::new("source-token")),
            "reader@proj.iam.gserviceaccount.com",
            vec![crate::config::CLOUD_PLATFORM_SCOPE.to_string()],
            reqwest::Client::new(),
        )
        .with_endpoint(server.uri());

        assert_eq!(source.access_token().await.unwrap(), "impersonated-token");
        assert_eq!(source.access_token().await.unwrap(), "impersonated-token");
        assert_eq!(source.project_id().await, Some("proj".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"accessToken": "impersonated-token"}))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = Arc::new(
            ImpersonatedTokenSource::new(
                Arc::new(StaticTokenSource::new("source-token")),
                "reader@proj.iam.gserviceaccount.com",
                vec![],
                reqwest::Client::new(),
            )
            .with_endpoint(server.uri()),
        );

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let source = source.clone();
            tasks.push(tokio::spawn(async move { source.access_token().await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "impersonated-token");
        }
    }

    #[tokio::test]
    async fn test_impersonation_denied_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let source = ImpersonatedTokenSource::new(
            Arc::new(StaticTokenSource::new("source-token")),
            "reader@proj.iam.gserviceaccount.com",
            vec![],
            reqwest::Client::new(),
        )
        .with_endpoint(server.uri());

        match source.access_token().await {
            Err(GcpError::Auth(message)) => assert!(message.contains("403")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
