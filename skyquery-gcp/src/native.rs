//! SDK-native clients resolved through the same connection cache.
//!
//! These wrap the `google-cloud-*` crates instead of the REST handles. They
//! authenticate with Application Default Credentials or a service account key;
//! static tokens and impersonation are rejected.

#[cfg(any(feature = "native-storage", feature = "native-pubsub"))]
use async_trait::async_trait;
#[cfg(any(feature = "native-storage", feature = "native-pubsub"))]
use tracing::info;

#[cfg(any(feature = "native-storage", feature = "native-pubsub", test))]
use crate::{config::CredentialsSource, session::Session, GcpError, Result};
#[cfg(any(feature = "native-storage", feature = "native-pubsub"))]
use crate::services::ServiceFactory;

/// Cache key of the native Cloud Storage client.
pub const STORAGE_NATIVE_CACHE_KEY: &str = "StorageNativeClient";

/// Cache key of the native Pub/Sub client.
pub const PUBSUB_NATIVE_CACHE_KEY: &str = "PubsubNativeClient";

#[cfg(any(feature = "native-storage", feature = "native-pubsub", test))]
fn ensure_supported(session: &Session, service: &'static str) -> Result<()> {
    if session.impersonate_service_account().is_some() {
        return Err(GcpError::Config(format!(
            "{} does not support service account impersonation",
            service
        )));
    }
    if matches!(session.credentials(), CredentialsSource::AccessToken(_)) {
        return Err(GcpError::Config(format!(
            "{} does not support static access tokens",
            service
        )));
    }
    Ok(())
}

/// Builds a `google-cloud-storage` client.
#[cfg(feature = "native-storage")]
pub struct NativeStorageFactory;

#[cfg(feature = "native-storage")]
#[async_trait]
impl ServiceFactory for NativeStorageFactory {
    type Client = google_cloud_storage::client::Client;

    fn cache_key(&self) -> &'static str {
        STORAGE_NATIVE_CACHE_KEY
    }

    async fn construct(&self, session: &Session) -> Result<Self::Client> {
        use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
        use google_cloud_storage::client::{Client, ClientConfig};

        ensure_supported(session, STORAGE_NATIVE_CACHE_KEY)?;

        let config = match session.credentials() {
            CredentialsSource::ServiceAccountFile(path) => {
                let file = CredentialsFile::new_from_file(path.clone())
                    .await
                    .map_err(|e| GcpError::Credentials(e.to_string()))?;
                ClientConfig::default().with_credentials(file).await
            }
            CredentialsSource::ServiceAccountJson(json) => {
                let file = CredentialsFile::new_from_str(json)
                    .await
                    .map_err(|e| GcpError::Credentials(e.to_string()))?;
                ClientConfig::default().with_credentials(file).await
            }
            _ => ClientConfig::default().with_auth().await,
        }
        .map_err(|e| GcpError::Auth(e.to_string()))?;

        info!("Cloud Storage native client initialized");
        Ok(Client::new(config))
    }
}

/// Builds a `google-cloud-pubsub` client.
#[cfg(feature = "native-pubsub")]
pub struct NativePubsubFactory;

#[cfg(feature = "native-pubsub")]
#[async_trait]
impl ServiceFactory for NativePubsubFactory {
    type Client = google_cloud_pubsub::client::Client;

    fn cache_key(&self) -> &'static str {
        PUBSUB_NATIVE_CACHE_KEY
    }

    async fn construct(&self, session: &Session) -> Result<Self::Client> {
        use google_cloud_pubsub::client::google_cloud_auth::credentials::CredentialsFile;
        use google_cloud_pubsub::client::{Client, ClientConfig};

        ensure_supported(session, PUBSUB_NATIVE_CACHE_KEY)?;

        let base = ClientConfig {
            project_id: session.project().map(str::to_string),
            ..Default::default()
        };
        let config = match session.credentials() {
            CredentialsSource::ServiceAccountFile(path) => {
                let file = CredentialsFile::new_from_file(path.clone())
                    .await
                    .map_err(|e| GcpError::Credentials(e.to_string()))?;
                base.with_credentials(file).await
            }
            CredentialsSource::ServiceAccountJson(json) => {
                let file = CredentialsFile::new_from_str(json)
                    .await
                    .map_err(|e| GcpError::Credentials(e.to_string()))?;
                base.with_credentials(file).await
            }
            _ => base.with_auth().await,
        }
        .map_err(|e| GcpError::Auth(e.to_string()))?;

        let client = Client::new(config)
            .await
            .map_err(|e| GcpError::Auth(e.to_string()))?;
        info!(project = ?session.project(), "Pub/Sub native client initialized");
        Ok(client)
    }
}
