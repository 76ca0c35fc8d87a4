//! # Skyquery GCP
//!
//! Per-connection Google Cloud API clients for the skyquery plugin.
//!
//! Every table function asks its connection for the client of one API. The
//! client is constructed on first use, with the connection's credentials
//! applied explicitly, and shared by every later call on that connection.
//! Concurrent first use constructs exactly one client; failures are returned
//! to the caller and never cached.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skyquery_gcp::{ConnectionManager, GcpConnectionConfig, QueryContext};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GcpConnectionConfig::builder()
//!         .project("my-project")
//!         .credentials("~/.config/gcloud/skyquery.json")
//!         .build();
//!     let conn = ConnectionManager::new("gcp", config)?;
//!
//!     let ctx = QueryContext::with_timeout(Duration::from_secs(30));
//!     let compute = conn.compute(&ctx).await?;
//!     let project = conn.project(&ctx).await?;
//!     let zones: Vec<serde_json::Value> = compute
//!         .list_all(&format!("projects/{}/zones", project), &[], "items")
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Supported APIs
//!
//! | Accessor                  | Cache key                     |
//! |---------------------------|-------------------------------|
//! | `cloud_resource_manager`  | `CloudResourceManagerService` |
//! | `compute_beta`            | `ComputeBetaService`          |
//! | `compute`                 | `ComputeService`              |
//! | `cloud_functions`         | `CloudFunctionsService`       |
//! | `iam`                     | `IAMService`                  |
//! | `logging`                 | `LoggingService`              |
//! | `monitoring`              | `MonitoringService`           |
//! | `pubsub`                  | `PubsubService`               |
//! | `service_usage`           | `ServiceUsageService`         |
//! | `storage`                 | `StorageService`              |

mod auth;
mod cache;
mod client;
mod config;
mod connection;
mod context;
mod error;
mod native;
mod registry;
mod services;
mod session;

pub use auth::{
    AccessTokenSource, IAM_CREDENTIALS_ENDPOINT, ImpersonatedTokenSource, ProviderTokenSource,
    StaticTokenSource, project_from_service_account,
};
pub use cache::ConnectionCache;
pub use client::ApiClient;
pub use config::{
    CLOUD_PLATFORM_SCOPE, CredentialsSource, GcpConnectionConfig, GcpConnectionConfigBuilder,
};
pub use connection::{ConnectionManager, PROJECT_CACHE_KEY};
pub use context::QueryContext;
pub use error::{ErrorKind, GcpError, Result};
pub use native::{PUBSUB_NATIVE_CACHE_KEY, STORAGE_NATIVE_CACHE_KEY};
pub use registry::Connections;
pub use services::{
    CloudFunctionsService, CloudResourceManagerService, ComputeBetaService, ComputeService,
    IamService, LoggingService, MonitoringService, PubsubService, RestFactory, RestService,
    ServiceFactory, ServiceKind, ServiceUsageService, StorageService,
};
pub use session::{Session, SessionConfigurer};

#[cfg(feature = "native-storage")]
pub use native::NativeStorageFactory;

#[cfg(feature = "native-pubsub")]
pub use native::NativePubsubFactory;

// Re-export enabled SDK crates
#[cfg(feature = "native-storage")]
pub use google_cloud_storage;

#[cfg(feature = "native-pubsub")]
pub use google_cloud_pubsub;

pub use tokio_util::sync::CancellationToken;
