// Skyquery - Google Cloud connection layer for a SQL query-engine plugin
//
// Each configured connection lazily builds, caches and shares the API
// clients that table functions query.

// Re-export the connection layer
pub use skyquery_gcp::*;

// Re-export member crates
pub use skyquery_config;
pub use skyquery_gcp;

#[cfg(feature = "log")]
pub use skyquery_log;

#[cfg(feature = "testing")]
pub use skyquery_testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ApiClient,
        CancellationToken,
        // Connections
        ConnectionManager,
        Connections,
        ErrorKind,
        GcpConnectionConfig,
        GcpError,
        QueryContext,
        Result,
        RestService,
        ServiceFactory,
        ServiceKind,
    };

    pub use skyquery_config::Validate;

    #[cfg(feature = "log")]
    pub use skyquery_log::{LogConfig, LogFormat, LogLevel, LogOutput};
}
