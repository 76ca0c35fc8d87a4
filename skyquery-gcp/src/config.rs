//! GCP connection configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use skyquery_config::{ConfigError, ConfigValidator, EnvLoader, Validate};
use std::collections::HashMap;
use std::path::Path;

use crate::services::ServiceKind;

/// OAuth scope granting access to all Google Cloud APIs.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Credentials source for GCP authentication, resolved from a
/// [`GcpConnectionConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsSource {
    /// Use Application Default Credentials.
    #[default]
    ApplicationDefault,
    /// Use service account JSON file.
    ServiceAccountFile(String),
    /// Use service account JSON content.
    ServiceAccountJson(String),
    /// Use explicit access token.
    AccessToken(String),
}

/// Plugin-level configuration of one GCP connection.
///
/// All fields are optional; an empty configuration means "Application Default
/// Credentials, project from the credentials".
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConnectionConfig {
    /// Project ID override.
    pub project: Option<String>,
    /// Path to a credentials file, or the JSON content itself.
    pub credentials: Option<String>,
    /// Legacy path to a service account key file.
    pub credential_file: Option<String>,
    /// Static OAuth access token.
    pub access_token: Option<String>,
    /// Service account email to impersonate.
    pub impersonate_service_account: Option<String>,
    /// Project billed for quota (`x-goog-user-project`).
    pub quota_project: Option<String>,
    /// OAuth scopes requested for tokens. Defaults to cloud-platform.
    pub scopes: Vec<String>,
    /// Base URL overrides, keyed by API name (`compute`) or cache key (`ComputeService`).
    pub endpoints: HashMap<String, String>,
    /// Wildcard patterns of API error codes that table functions may ignore.
    pub ignore_error_codes: Vec<String>,
    /// User agent sent with every request.
    pub user_agent: Option<String>,
}

impl std::fmt::Debug for GcpConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpConnectionConfig")
            .field("project", &self.project)
            .field("credentials", &self.credentials.as_ref().map(|c| redact_json(c)))
            .field("credential_file", &self.credential_file)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("impersonate_service_account", &self.impersonate_service_account)
            .field("quota_project", &self.quota_project)
            .field("scopes", &self.scopes)
            .field("endpoints", &self.endpoints)
            .field("ignore_error_codes", &self.ignore_error_codes)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn redact_json(value: &str) -> &str {
    if looks_like_json(value) { "<json>" } else { value }
}

fn looks_like_json(value: &str) -> bool {
    value.trim_start().starts_with('{')
}

impl GcpConnectionConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    pub fn builder() -> GcpConnectionConfigBuilder {
        GcpConnectionConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> GcpConnectionConfigBuilder {
        let env = EnvLoader::default();
        let mut builder = GcpConnectionConfigBuilder::new();

        if let Some(project) =
            env.first_var(&["GOOGLE_CLOUD_PROJECT", "CLOUDSDK_CORE_PROJECT", "GCP_PROJECT"])
        {
            builder = builder.project(project);
        }

        if let Some(creds_file) = env.first_var(&["GOOGLE_APPLICATION_CREDENTIALS"]) {
            builder = builder.credentials(creds_file);
        }

        if let Some(quota) = env.first_var(&["GOOGLE_CLOUD_QUOTA_PROJECT"]) {
            builder = builder.quota_project(quota);
        }

        if let Some(target) = env.first_var(&["CLOUDSDK_AUTH_IMPERSONATE_SERVICE_ACCOUNT"]) {
            builder = builder.impersonate_service_account(target);
        }

        builder
    }

    /// Load and validate configuration from a JSON, TOML or `.env` file.
    pub fn from_file(path: impl AsRef<Path>) -> skyquery_config::Result<Self> {
        skyquery_config::load_file(path)
    }

    /// Resolve the credentials source.
    ///
    /// Precedence: static access token, `credentials` (inline JSON when it
    /// starts with `{`, otherwise a path), legacy `credential_file`, ADC.
    pub fn credentials_source(&self) -> CredentialsSource {
        if let Some(token) = &self.access_token {
            return CredentialsSource::AccessToken(token.clone());
        }
        if let Some(creds) = &self.credentials {
            if looks_like_json(creds) {
                return CredentialsSource::ServiceAccountJson(creds.clone());
            }
            return CredentialsSource::ServiceAccountFile(expand_home(creds));
        }
        if let Some(path) = &self.credential_file {
            return CredentialsSource::ServiceAccountFile(expand_home(path));
        }
        CredentialsSource::ApplicationDefault
    }

    /// OAuth scopes to request.
    pub fn effective_scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            vec![CLOUD_PLATFORM_SCOPE.to_string()]
        } else {
            self.scopes.clone()
        }
    }

    /// Configured endpoint override for an API.
    pub fn endpoint_for(&self, kind: ServiceKind) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|(name, _)| ServiceKind::from_name(name) == Some(kind))
            .map(|(_, url)| url.as_str())
    }

    /// Compile `ignore_error_codes` into matchers.
    pub fn ignore_matchers(&self) -> skyquery_config::Result<Vec<Regex>> {
        self.ignore_error_codes
            .iter()
            .map(|pattern| wildcard_regex(pattern))
            .collect()
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

/// Translate a `*`/`?` wildcard pattern into an anchored regex.
pub(crate) fn wildcard_regex(pattern: &str) -> skyquery_config::Result<Regex> {
    let body = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^(?i:{})$", body)).map_err(|e| {
        ConfigError::ValidationError(format!("invalid ignore_error_codes pattern '{}': {}", pattern, e))
    })
}

impl Validate for GcpConnectionConfig {
    fn validate(&self) -> skyquery_config::Result<()> {
        if let Some(project) = &self.project {
            ConfigValidator::not_empty(project, "project")?;
        }
        if let Some(creds) = &self.credentials {
            ConfigValidator::not_empty(creds, "credentials")?;
            if looks_like_json(creds) {
                serde_json::from_str::<serde_json::Value>(creds).map_err(|e| {
                    ConfigError::ValidationError(format!("credentials is not valid JSON: {}", e))
                })?;
            }
        }
        if let Some(path) = &self.credential_file {
            ConfigValidator::not_empty(path, "credential_file")?;
        }
        if let Some(token) = &self.access_token {
            ConfigValidator::not_empty(token, "access_token")?;
        }
        if let Some(target) = &self.impersonate_service_account {
            ConfigValidator::is_email(target, "impersonate_service_account")?;
        }
        if let Some(quota) = &self.quota_project {
            ConfigValidator::not_empty(quota, "quota_project")?;
        }
        for scope in &self.scopes {
            ConfigValidator::is_url(scope, "scopes")?;
        }
        let mut seen: HashMap<ServiceKind, &str> = HashMap::new();
        for (name, url) in &self.endpoints {
            let Some(kind) = ServiceKind::from_name(name) else {
                return Err(ConfigError::ValidationError(format!(
                    "endpoints: unknown API '{}'",
                    name
                )));
            };
            if let Some(other) = seen.insert(kind, name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "endpoints: '{}' and '{}' both configure {}",
                    other, name, kind.cache_key()
                )));
            }
            ConfigValidator::is_url(url, &format!("endpoints.{}", name))?;
        }
        for pattern in &self.ignore_error_codes {
            ConfigValidator::not_empty(pattern, "ignore_error_codes")?;
        }
        self.ignore_matchers()?;
        Ok(())
    }
}

/// Builder for GCP connection configuration.
#[derive(Default)]
pub struct GcpConnectionConfigBuilder {
    config: GcpConnectionConfig,
}

impl GcpConnectionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project ID.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.config.project = Some(project.into());
        self
    }

    /// Set the credentials (file path or JSON content).
    pub fn credentials(mut self, credentials: impl Into<String>) -> Self {
        self.config.credentials = Some(credentials.into());
        self
    }

    /// Use a legacy service account key file.
    pub fn credential_file(mut self, path: impl Into<String>) -> Self {
        self.config.credential_file = Some(path.into());
        self
    }

    /// Use a static access token.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    /// Impersonate a service account.
    pub fn impersonate_service_account(mut self, email: impl Into<String>) -> Self {
        self.config.impersonate_service_account = Some(email.into());
        self
    }

    /// Bill quota to a project.
    pub fn quota_project(mut self, project: impl Into<String>) -> Self {
        self.config.quota_project = Some(project.into());
        self
    }

    /// Request an extra OAuth scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.config.scopes.push(scope.into());
        self
    }

    /// Override the base URL of an API (for emulators and private endpoints).
    pub fn endpoint(mut self, kind: ServiceKind, url: impl Into<String>) -> Self {
        self.config
            .endpoints
            .insert(kind.name().to_string(), url.into());
        self
    }

    /// Ignore API errors whose code matches a wildcard pattern.
    pub fn ignore_error_code(mut self, pattern: impl Into<String>) -> Self {
        self.config.ignore_error_codes.push(pattern.into());
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> GcpConnectionConfig {
        self.config
    }
}
