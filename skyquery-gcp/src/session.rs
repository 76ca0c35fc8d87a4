//! Session configuration.
//!
//! A [`SessionConfigurer`] turns one connection's configuration into the
//! explicit options ([`Session`]) every client constructor receives. Nothing
//! process-wide is touched, so connections with different credentials can
//! construct clients concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::auth::{AccessTokenSource, ImpersonatedTokenSource, ProviderTokenSource, StaticTokenSource};
use crate::config::{CredentialsSource, GcpConnectionConfig};
use crate::services::ServiceKind;
use crate::{GcpError, Result};

/// Options handed to client constructors.
#[derive(Clone)]
pub struct Session {
    tokens: Arc<dyn AccessTokenSource>,
    credentials: CredentialsSource,
    impersonate: Option<String>,
    project: Option<String>,
    quota_project: Option<String>,
    endpoints: HashMap<ServiceKind, String>,
    http: reqwest::Client,
}

impl Session {
    /// Create a session around a token source, with default endpoints and
    /// no project.
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            tokens,
            credentials: CredentialsSource::ApplicationDefault,
            impersonate: None,
            project: None,
            quota_project: None,
            endpoints: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Set the project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Override the endpoint of one API.
    pub fn with_endpoint(mut self, kind: ServiceKind, url: impl Into<String>) -> Self {
        self.endpoints.insert(kind, url.into());
        self
    }

    /// Token source for authenticating requests.
    pub fn tokens(&self) -> Arc<dyn AccessTokenSource> {
        self.tokens.clone()
    }

    /// Resolved credentials source.
    pub fn credentials(&self) -> &CredentialsSource {
        &self.credentials
    }

    /// Impersonated service account, if any.
    pub fn impersonate_service_account(&self) -> Option<&str> {
        self.impersonate.as_deref()
    }

    /// Configured project, if any.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// Project billed for quota, if any.
    pub fn quota_project(&self) -> Option<&str> {
        self.quota_project.as_deref()
    }

    /// Base URL for an API: the override if configured, else the public one.
    pub fn endpoint(&self, kind: ServiceKind) -> &str {
        self.endpoints
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_endpoint())
    }

    /// Shared HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("impersonate", &self.impersonate)
            .field("project", &self.project)
            .field("quota_project", &self.quota_project)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Applies a connection's configuration before client construction.
///
/// The token source is built on the first successful `configure` and shared
/// by every later session, so all clients of a connection reuse one
/// credentials provider.
pub struct SessionConfigurer {
    config: Arc<GcpConnectionConfig>,
    http: reqwest::Client,
    tokens: OnceCell<Arc<dyn AccessTokenSource>>,
}

impl SessionConfigurer {
    /// Create a configurer for a validated configuration.
    pub fn new(config: Arc<GcpConnectionConfig>) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("skyquery-gcp/{}", env!("CARGO_PKG_VERSION")));
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| GcpError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            tokens: OnceCell::new(),
        })
    }

    /// The configuration being applied.
    pub fn config(&self) -> &GcpConnectionConfig {
        &self.config
    }

    /// Build session options from the configuration.
    ///
    /// Idempotent: every call with the same configuration produces an
    /// equivalent session.
    pub async fn configure(&self) -> Result<Session> {
        let credentials = self.config.credentials_source();
        let tokens = self
            .tokens
            .get_or_try_init(|| self.token_source(&credentials))
            .await?
            .clone();

        let endpoints = ServiceKind::ALL
            .iter()
            .filter_map(|kind| {
                self.config
                    .endpoint_for(*kind)
                    .map(|url| (*kind, url.to_string()))
            })
            .collect();

        debug!(
            project = ?self.config.project,
            impersonate = ?self.config.impersonate_service_account,
            "session configured"
        );

        Ok(Session {
            tokens,
            credentials,
            impersonate: self.config.impersonate_service_account.clone(),
            project: self.config.project.clone(),
            quota_project: self.config.quota_project.clone(),
            endpoints,
            http: self.http.clone(),
        })
    }

    async fn token_source(&self, credentials: &CredentialsSource) -> Result<Arc<dyn AccessTokenSource>> {
        let scopes = self.config.effective_scopes();

        let base: Arc<dyn AccessTokenSource> = match credentials {
            CredentialsSource::AccessToken(token) => Arc::new(StaticTokenSource::new(token.clone())),
            other => Arc::new(ProviderTokenSource::from_credentials(other, scopes.clone()).await?),
        };

        Ok(match &self.config.impersonate_service_account {
            Some(target) => Arc::new(ImpersonatedTokenSource::new(
                base,
                target.clone(),
                scopes,
                self.http.clone(),
            )),
            None => base,
        })
    }
}
