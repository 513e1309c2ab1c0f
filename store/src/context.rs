//! Per-operation deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use a3s_artifact_core::error::{ArtifactError, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal accepted by every store operation.
///
/// Cloning shares the cancellation token, so cancelling any clone cancels
/// the operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl OpContext {
    /// A context with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Token that fires when [`cancel`](Self::cancel) is called.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail with `Cancelled` if the token fired or the deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ArtifactError::Cancelled("cancelled by caller".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ArtifactError::Cancelled("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }

    /// Drive `fut` until it finishes, the token fires, or the deadline passes.
    ///
    /// On cancellation `fut` is dropped at its current await point.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                Err(ArtifactError::Cancelled("cancelled by caller".to_string()))
            }
            _ = expired => Err(ArtifactError::Cancelled("deadline exceeded".to_string())),
            result = fut => result,
        }
    }
}
