// Connection fixtures

use serde_json::Value;
use skyquery_gcp::{ConnectionManager, GcpConnectionConfig, GcpConnectionConfigBuilder, ServiceKind};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Token used by every fixture connection.
pub const TEST_TOKEN: &str = "ya29.test-token";

/// Project used by every fixture connection.
pub const TEST_PROJECT: &str = "test-project";

/// PKCS#8 key generated for tests only; it grants nothing.
pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/test-key.pem");

/// Service account key JSON for `project`, signed with [`TEST_PRIVATE_KEY`].
///
/// Enough to construct credentials offline; exchanging it for a token fails.
pub fn service_account_json(project: &str) -> String {
    serde_json::json!({
        "type": "service_account",
        "project_id": project,
        "private_key_id": "0123456789abcdef",
        "private_key": TEST_PRIVATE_KEY,
        "client_email": format!("skyquery-test@{}.iam.gserviceaccount.com", project),
        "client_id": "100000000000000000000",
        "auth_uri": "https://accounts.google.com/o/oauth2/auth",
        "token_uri": "https://oauth2.googleapis.com/token"
    })
    .to_string()
}

/// Config builder with a static token and project, so nothing touches real credentials.
pub fn token_config() -> GcpConnectionConfigBuilder {
    GcpConnectionConfig::builder()
        .access_token(TEST_TOKEN)
        .project(TEST_PROJECT)
}

/// A connection built from [`token_config`].
pub fn test_connection(name: &str) -> ConnectionManager {
    match ConnectionManager::new(name, token_config().build()) {
        Ok(connection) => connection,
        Err(e) => panic!("fixture connection is invalid: {}", e),
    }
}

/// A local stand-in for the Google APIs.
///
/// Each API is served under `/<short name>/`, e.g. `/compute/`.
pub struct MockGcp {
    server: MockServer,
}

impl MockGcp {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Base URL the handle for `kind` is pointed at.
    pub fn endpoint(&self, kind: ServiceKind) -> String {
        format!("{}/{}/", self.server.uri(), kind.name())
    }

    /// [`token_config`] with every API routed to this server.
    pub fn config(&self) -> GcpConnectionConfigBuilder {
        ServiceKind::ALL
            .iter()
            .fold(token_config(), |builder, kind| {
                builder.endpoint(*kind, self.endpoint(*kind))
            })
    }

    /// A connection routed to this server.
    pub fn connection(&self, name: &str) -> ConnectionManager {
        match ConnectionManager::new(name, self.config().build()) {
            Ok(connection) => connection,
            Err(e) => panic!("mock connection is invalid: {}", e),
        }
    }

    /// Answer `GET /<api>/<resource>` with `body`, requiring the test token.
    pub async fn mock_get(&self, kind: ServiceKind, resource: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/{}", kind.name(), resource)))
            .and(header("authorization", format!("Bearer {}", TEST_TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer `GET /<api>/<resource>` with a Google-style error.
    pub async fn mock_error(&self, kind: ServiceKind, resource: &str, code: u16, status: &str) {
        let body = serde_json::json!({
            "error": {"code": code, "status": status, "message": format!("{} from mock", status)}
        });
        Mock::given(method("GET"))
            .and(path(format!("/{}/{}", kind.name(), resource)))
            .respond_with(ResponseTemplate::new(code).set_body_json(body))
            .mount(&self.server)
            .await;
    }
}
