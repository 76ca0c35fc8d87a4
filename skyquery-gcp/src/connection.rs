//! Per-connection service resolution.

use async_trait::async_trait;
use regex::Regex;
use skyquery_config::Validate;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::ConnectionCache;
use crate::config::GcpConnectionConfig;
use crate::context::QueryContext;
use crate::services::{
    CloudFunctionsService, CloudResourceManagerService, ComputeBetaService, ComputeService,
    IamService, LoggingService, MonitoringService, PubsubService, RestFactory, RestService,
    ServiceFactory, ServiceUsageService, StorageService,
};
use crate::session::{Session, SessionConfigurer};
use crate::{GcpError, Result};

/// Cache key of the resolved project ID.
pub const PROJECT_CACHE_KEY: &str = "Project";

/// State of one logical connection: its configuration and the clients
/// constructed for it.
///
/// Clients are built on first use and shared afterwards. Dropping the
/// manager discards every cached client.
pub struct ConnectionManager {
    name: String,
    config: Arc<GcpConnectionConfig>,
    configurer: SessionConfigurer,
    cache: ConnectionCache,
    ignore_codes: Vec<Regex>,
}

impl ConnectionManager {
    /// Create a connection from a configuration, validating it first.
    pub fn new(name: impl Into<String>, config: GcpConnectionConfig) -> Result<Self> {
        config.validate()?;
        let ignore_codes = config.ignore_matchers()?;
        let name = name.into();
        let config = Arc::new(config);
        let configurer = SessionConfigurer::new(config.clone())?;

        info!(
            connection = %name,
            project = ?config.project,
            impersonate = ?config.impersonate_service_account,
            "GCP connection configured"
        );

        Ok(Self {
            name,
            config,
            configurer,
            cache: ConnectionCache::new(),
            ignore_codes,
        })
    }

    /// Create a connection from a configuration file.
    pub fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        Self::new(name, GcpConnectionConfig::from_file(path)?)
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection configuration.
    pub fn config(&self) -> &GcpConnectionConfig {
        &self.config
    }

    /// Cached clients of this connection.
    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Return the client built by `factory`, constructing it on first use.
    ///
    /// A cached client is returned without touching the context. On a miss
    /// the session is configured and the client constructed, bounded by the
    /// context's cancellation and deadline. Failures are not cached.
    pub async fn resolve<F: ServiceFactory>(
        &self,
        ctx: &QueryContext,
        factory: &F,
    ) -> Result<Arc<F::Client>> {
        let key = factory.cache_key();
        if let Some(client) = self.cache.get::<F::Client>(key)? {
            debug!(connection = %self.name, service = key, "service cache hit");
            return Ok(client);
        }

        let init = || async {
            debug!(connection = %self.name, service = key, "constructing service client");
            let session = self.configurer.configure().await?;
            let client = factory.construct(&session).await?;
            info!(connection = %self.name, service = key, "GCP service client initialized");
            Ok::<F::Client, GcpError>(client)
        };

        match ctx.run(key, self.cache.get_or_try_init(key, init)).await {
            Ok(client) => Ok(client),
            Err(e) => {
                warn!(connection = %self.name, service = key, error = %e, "service client construction failed");
                Err(GcpError::service_init(key, e))
            }
        }
    }

    /// Resolve any typed REST handle.
    pub async fn service<S: RestService>(&self, ctx: &QueryContext) -> Result<Arc<S>> {
        self.resolve(ctx, &RestFactory::<S>::new()).await
    }

    /// Cloud Resource Manager client.
    pub async fn cloud_resource_manager(
        &self,
        ctx: &QueryContext,
    ) -> Result<Arc<CloudResourceManagerService>> {
        self.service(ctx).await
    }

    /// Compute Engine beta client.
    pub async fn compute_beta(&self, ctx: &QueryContext) -> Result<Arc<ComputeBetaService>> {
        self.service(ctx).await
    }

    /// Compute Engine client.
    pub async fn compute(&self, ctx: &QueryContext) -> Result<Arc<ComputeService>> {
        self.service(ctx).await
    }

    /// Cloud Functions client.
    pub async fn cloud_functions(&self, ctx: &QueryContext) -> Result<Arc<CloudFunctionsService>> {
        self.service(ctx).await
    }

    /// IAM client.
    pub async fn iam(&self, ctx: &QueryContext) -> Result<Arc<IamService>> {
        self.service(ctx).await
    }

    /// Cloud Logging client.
    pub async fn logging(&self, ctx: &QueryContext) -> Result<Arc<LoggingService>> {
        self.service(ctx).await
    }

    /// Cloud Monitoring client.
    pub async fn monitoring(&self, ctx: &QueryContext) -> Result<Arc<MonitoringService>> {
        self.service(ctx).await
    }

    /// Pub/Sub client.
    pub async fn pubsub(&self, ctx: &QueryContext) -> Result<Arc<PubsubService>> {
        self.service(ctx).await
    }

    /// Service Usage client.
    pub async fn service_usage(&self, ctx: &QueryContext) -> Result<Arc<ServiceUsageService>> {
        self.service(ctx).await
    }

    /// Cloud Storage client.
    pub async fn storage(&self, ctx: &QueryContext) -> Result<Arc<StorageService>> {
        self.service(ctx).await
    }

    /// Active project: the configured one, else the credentials' project.
    pub async fn project(&self, ctx: &QueryContext) -> Result<Arc<String>> {
        self.resolve(ctx, &ProjectFactory).await
    }

    /// Check whether an API error matches the connection's `ignore_error_codes`.
    pub fn should_ignore_error(&self, error: &GcpError) -> bool {
        if self.ignore_codes.is_empty() {
            return false;
        }
        let code = error.status_code().map(|c| c.to_string());
        let candidates = code.as_deref().into_iter().chain(error.status());
        candidates
            .into_iter()
            .any(|candidate| self.ignore_codes.iter().any(|re| re.is_match(candidate)))
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

struct ProjectFactory;

#[async_trait]
impl ServiceFactory for ProjectFactory {
    type Client = String;

    fn cache_key(&self) -> &'static str {
        PROJECT_CACHE_KEY
    }

    async fn construct(&self, session: &Session) -> Result<String> {
        if let Some(project) = session.project() {
            return Ok(project.to_string());
        }
        session
            .tokens()
            .project_id()
            .await
            .ok_or(GcpError::ProjectNotSpecified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceKind;

    fn manager(config: GcpConnectionConfig) -> ConnectionManager {
        ConnectionManager::new("test", config).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GcpConnectionConfig::builder()
            .impersonate_service_account("nobody")
            .build();
        let err = ConnectionManager::new("bad", config).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_compute_resolves_and_caches() {
        let conn = manager(GcpConnectionConfig::builder().access_token("ya29.test").build());
        let ctx = QueryContext::new();

        let first = conn.compute(&ctx).await.unwrap();
        let second = conn.compute(&ctx).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kind(), ServiceKind::Compute);
        assert!(conn.cache().contains("ComputeService"));
        assert_eq!(conn.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_endpoint_override_reaches_handle() {
        let conn = manager(
            GcpConnectionConfig::builder()
                .access_token("ya29.test")
                .endpoint(ServiceKind::Storage, "http://localhost:4443/storage/v1")
                .build(),
        );
        let storage = conn.storage(&QueryContext::new()).await.unwrap();
        assert_eq!(storage.base_url(), "http://localhost:4443/storage/v1/");
        assert_eq!(storage.url("b"), "http://localhost:4443/storage/v1/b");
    }

    #[tokio::test]
    async fn test_project_from_config() {
        let conn = manager(
            GcpConnectionConfig::builder()
                .access_token("ya29.test")
                .project("configured")
                .build(),
        );
        let project = conn.project(&QueryContext::new()).await.unwrap();
        assert_eq!(project.as_str(), "configured");
        assert!(conn.cache().contains(PROJECT_CACHE_KEY));
    }

    #[tokio::test]
    async fn test_project_from_impersonated_account() {
        let conn = manager(
            GcpConnectionConfig::builder()
                .access_token("ya29.test")
                .impersonate_service_account("reader@derived.iam.gserviceaccount.com")
                .build(),
        );
        let project = conn.project(&QueryContext::new()).await.unwrap();
        assert_eq!(project.as_str(), "derived");
    }

    #[tokio::test]
    async fn test_project_not_specified() {
        let conn = manager(GcpConnectionConfig::builder().access_token("ya29.test").build());
        let err = conn.project(&QueryContext::new()).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(!conn.cache().contains(PROJECT_CACHE_KEY));
    }

    #[tokio::test]
    async fn test_missing_credentials_names_service() {
        let conn = manager(
            GcpConnectionConfig::builder()
                .credentials("/nonexistent/skyquery/key.json")
                .build(),
        );
        let err = conn.iam(&QueryContext::new()).await.unwrap_err();
        assert_eq!(err.service(), Some("IAMService"));
        assert!(err.is_configuration());
        assert!(conn.cache().is_empty());
    }

    #[test]
    fn test_should_ignore_error() {
        let conn = manager(
            GcpConnectionConfig::builder()
                .ignore_error_code("40*")
                .ignore_error_code("FAILED_PRECONDITION")
                .build(),
        );
        let denied = GcpError::Api {
            service: "ComputeService",
            code: 403,
            status: "PERMISSION_DENIED".into(),
            message: "denied".into(),
        };
        let precondition = GcpError::Api {
            service: "ServiceUsageService",
            code: 500,
            status: "FAILED_PRECONDITION".into(),
            message: "api disabled".into(),
        };
        let unavailable = GcpError::Api {
            service: "ComputeService",
            code: 503,
            status: "UNAVAILABLE".into(),
            message: "try later".into(),
        };
        assert!(conn.should_ignore_error(&denied));
        assert!(conn.should_ignore_error(&precondition));
        assert!(!conn.should_ignore_error(&unavailable));
        assert!(!conn.should_ignore_error(&GcpError::ProjectNotSpecified));
    }
}
