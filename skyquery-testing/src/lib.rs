//! Test doubles for skyquery GCP connections.
//!
//! - [`CountingFactory`]: a stub client constructor that counts, fails or stalls on demand
//! - [`MockTokenSource`]: an access token source with a fixed answer
//! - [`MockGcp`]: a local HTTP server standing in for the Google APIs
//!
//! ```no_run
//! use skyquery_gcp::QueryContext;
//! use skyquery_testing::*;
//!
//! # async fn demo() {
//! let conn = test_connection("gcp");
//! let factory = CountingFactory::new("FakeService", |n| format!("client #{}", n));
//!
//! let ctx = QueryContext::new();
//! let a = conn.resolve(&ctx, &factory).await.unwrap();
//! let b = conn.resolve(&ctx, &factory).await.unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//! assert_eq!(factory.call_count(), 1);
//! # }
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::{
    MockGcp, TEST_PRIVATE_KEY, TEST_PROJECT, TEST_TOKEN, service_account_json, test_connection,
    token_config,
};
pub use mock::{CountingFactory, INJECTED_FAILURE, MockTokenSource};
