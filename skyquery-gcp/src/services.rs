//! Registry of supported GCP APIs and their typed client handles.

use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;

use crate::client::ApiClient;
use crate::session::Session;
use crate::Result;

/// Builds one kind of client from a configured [`Session`].
///
/// A factory names the cache slot its client lives in; the connection
/// guarantees `construct` runs at most once per slot unless it fails.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// The client handle produced.
    type Client: Send + Sync + 'static;

    /// Fixed cache key identifying the API.
    fn cache_key(&self) -> &'static str;

    /// Construct a new client.
    async fn construct(&self, session: &Session) -> Result<Self::Client>;
}

/// A typed handle over an [`ApiClient`] for one REST API.
pub trait RestService: Send + Sync + Sized + 'static {
    /// The API this handle talks to.
    const KIND: ServiceKind;

    /// Wrap a client built for [`Self::KIND`].
    fn from_client(client: ApiClient) -> Self;
}

/// Factory for any [`RestService`] handle.
pub struct RestFactory<S>(PhantomData<fn() -> S>);

impl<S: RestService> RestFactory<S> {
    /// Create a factory.
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S: RestService> Default for RestFactory<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: RestService> ServiceFactory for RestFactory<S> {
    type Client = S;

    fn cache_key(&self) -> &'static str {
        S::KIND.cache_key()
    }

    async fn construct(&self, session: &Session) -> Result<S> {
        ApiClient::new(S::KIND, session).map(S::from_client)
    }
}

macro_rules! gcp_services {
    ($(
        $(#[$meta:meta])*
        $kind:ident => $handle:ident {
            key: $key:literal,
            name: $name:literal,
            title: $title:literal,
            endpoint: $endpoint:literal $(,)?
        }
    ),+ $(,)?) => {
        /// A GCP API with a resolver.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ServiceKind {
            $( $(#[$meta])* $kind, )+
        }

        impl ServiceKind {
            /// Every registered API.
            pub const ALL: &'static [ServiceKind] = &[ $( ServiceKind::$kind, )+ ];

            /// Fixed connection-cache key.
            pub const fn cache_key(self) -> &'static str {
                match self { $( ServiceKind::$kind => $key, )+ }
            }

            /// Short configuration name, used for endpoint overrides.
            pub const fn name(self) -> &'static str {
                match self { $( ServiceKind::$kind => $name, )+ }
            }

            /// Human-readable API title.
            pub const fn title(self) -> &'static str {
                match self { $( ServiceKind::$kind => $title, )+ }
            }

            /// Public base URL, including the API version.
            pub const fn default_endpoint(self) -> &'static str {
                match self { $( ServiceKind::$kind => $endpoint, )+ }
            }
        }

        $(
            $(#[$meta])*
            #[derive(Clone)]
            pub struct $handle {
                client: ApiClient,
            }

            impl RestService for $handle {
                const KIND: ServiceKind = ServiceKind::$kind;

                fn from_client(client: ApiClient) -> Self {
                    Self { client }
                }
            }

            impl std::ops::Deref for $handle {
                type Target = ApiClient;

                fn deref(&self) -> &ApiClient {
                    &self.client
                }
            }

            impl fmt::Debug for $handle {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($handle))
                        .field("base_url", &self.client.base_url())
                        .finish()
                }
            }
        )+
    };
}

gcp_services! {
    /// Cloud Resource Manager v1.
    CloudResourceManager => CloudResourceManagerService {
        key: "CloudResourceManagerService",
        name: "cloudresourcemanager",
        title: "Cloud Resource Manager",
        endpoint: "https://cloudresourcemanager.googleapis.com/v1/",
    },
    /// Compute Engine beta.
    ComputeBeta => ComputeBetaService {
        key: "ComputeBetaService",
        name: "compute_beta",
        title: "Compute Engine (beta)",
        endpoint: "https://compute.googleapis.com/compute/beta/",
    },
    /// Compute Engine v1.
    Compute => ComputeService {
        key: "ComputeService",
        name: "compute",
        title: "Compute Engine",
        endpoint: "https://compute.googleapis.com/compute/v1/",
    },
    /// Cloud Functions v1.
    CloudFunctions => CloudFunctionsService {
        key: "CloudFunctionsService",
        name: "cloudfunctions",
        title: "Cloud Functions",
        endpoint: "https://cloudfunctions.googleapis.com/v1/",
    },
    /// Identity and Access Management v1.
    Iam => IamService {
        key: "IAMService",
        name: "iam",
        title: "IAM",
        endpoint: "https://iam.googleapis.com/v1/",
    },
    /// Cloud Logging v2.
    Logging => LoggingService {
        key: "LoggingService",
        name: "logging",
        title: "Cloud Logging",
        endpoint: "https://logging.googleapis.com/v2/",
    },
    /// Cloud Monitoring v3.
    Monitoring => MonitoringService {
        key: "MonitoringService",
        name: "monitoring",
        title: "Cloud Monitoring",
        endpoint: "https://monitoring.googleapis.com/v3/",
    },
    /// Pub/Sub v1.
    Pubsub => PubsubService {
        key: "PubsubService",
        name: "pubsub",
        title: "Pub/Sub",
        endpoint: "https://pubsub.googleapis.com/v1/",
    },
    /// Service Usage v1.
    ServiceUsage => ServiceUsageService {
        key: "ServiceUsageService",
        name: "serviceusage",
        title: "Service Usage",
        endpoint: "https://serviceusage.googleapis.com/v1/",
    },
    /// Cloud Storage JSON API v1.
    Storage => StorageService {
        key: "StorageService",
        name: "storage",
        title: "Cloud Storage",
        endpoint: "https://storage.googleapis.com/storage/v1/",
    },
}

impl ServiceKind {
    /// Look up an API by short name or cache key, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| {
            kind.name().eq_ignore_ascii_case(name) || kind.cache_key().eq_ignore_ascii_case(name)
        })
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}
