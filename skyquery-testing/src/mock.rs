// Mock factories and token sources

use async_trait::async_trait;
use parking_lot::Mutex;
use skyquery_gcp::{AccessTokenSource, GcpError, Result, ServiceFactory, Session};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Message carried by failures injected with [`CountingFactory::fail_first`].
pub const INJECTED_FAILURE: &str = "injected construction failure";

type Produce<T> = Arc<dyn Fn(usize) -> T + Send + Sync>;

/// A [`ServiceFactory`] that counts constructions.
///
/// Clones share their counters, so a test can hand one clone to the
/// connection and assert on another.
pub struct CountingFactory<T> {
    key: &'static str,
    produce: Produce<T>,
    calls: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    delay: Option<Duration>,
    sessions: Arc<Mutex<Vec<Option<String>>>>,
}

impl<T: Send + Sync + 'static> CountingFactory<T> {
    /// Factory for `key` whose n-th construction (1-based) yields `produce(n)`.
    pub fn new(key: &'static str, produce: impl Fn(usize) -> T + Send + Sync + 'static) -> Self {
        Self {
            key,
            produce: Arc::new(produce),
            calls: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicUsize::new(0)),
            delay: None,
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the first `n` constructions.
    pub fn fail_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every construction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of constructions started.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Project of the session passed to each construction, in order.
    pub fn session_projects(&self) -> Vec<Option<String>> {
        self.sessions.lock().clone()
    }
}

impl<T> Clone for CountingFactory<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            produce: self.produce.clone(),
            calls: self.calls.clone(),
            failures_left: self.failures_left.clone(),
            delay: self.delay,
            sessions: self.sessions.clone(),
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ServiceFactory for CountingFactory<T> {
    type Client = T;

    fn cache_key(&self) -> &'static str {
        self.key
    }

    async fn construct(&self, session: &Session) -> Result<T> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.lock().push(session.project().map(str::to_string));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GcpError::Auth(INJECTED_FAILURE.to_string()));
        }

        Ok((self.produce)(n))
    }
}

/// Token source returning a fixed token, or a fixed error, and counting requests.
pub struct MockTokenSource {
    token: Option<String>,
    project: Option<String>,
    requests: AtomicUsize,
}

impl MockTokenSource {
    /// Always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            project: None,
            requests: AtomicUsize::new(0),
        }
    }

    /// Always fails, as unreachable credentials would.
    pub fn failing() -> Self {
        Self {
            token: None,
            project: None,
            requests: AtomicUsize::new(0),
        }
    }

    /// Report `project` as the credentials' project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Number of tokens requested.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessTokenSource for MockTokenSource {
    async fn access_token(&self) -> Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.token
            .clone()
            .ok_or_else(|| GcpError::Auth("credentials unavailable".to_string()))
    }

    async fn project_id(&self) -> Option<String> {
        self.project.clone()
    }
}
