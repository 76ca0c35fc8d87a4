//! Per-invocation execution context.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{GcpError, Result};

/// Cancellation and deadline supplied by the host for one invocation.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context bound to an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// Set the deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a context cancelled together with this one, keeping its deadline.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check whether the context was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The underlying cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` unless the context is cancelled or its deadline passes first.
    ///
    /// `service` names the API being resolved in the resulting error.
    pub async fn run<T, F>(&self, service: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(GcpError::Cancelled { service });
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GcpError::Cancelled { service }),
            _ = deadline => Err(GcpError::DeadlineExceeded { service }),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = QueryContext::new();
        let value = ctx.run("ComputeService", async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let ctx = QueryContext::new();
        ctx.cancel();
        let err = ctx
            .run("ComputeService", async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, GcpError::Cancelled { service: "ComputeService" }));
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let ctx = QueryContext::new();
        let handle = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let err = ctx
            .run("IAMService", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = QueryContext::with_timeout(Duration::from_secs(5));
        let err = ctx
            .run("StorageService", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GcpError::DeadlineExceeded { service: "StorageService" }));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = QueryContext::with_timeout(Duration::from_secs(1));
        let child = parent.child();
        assert_eq!(child.deadline(), parent.deadline());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
