use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{SdkError, SdkResult};

/// Per-call context handed to every client operation.
///
/// Carries the host's cancellation signal and an optional deadline. Cloning
/// shares the same token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast when the host already gave up on this call.
    pub fn check(&self) -> SdkResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SdkError::Cancelled("cancelled by host".into()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SdkError::Cancelled("deadline exceeded".into()));
        }
        Ok(())
    }

    /// Resolves once the host cancels or the deadline passes, whichever is
    /// first, with the matching error.
    pub async fn expired(&self) -> SdkError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => SdkError::Cancelled("cancelled by host".into()),
                _ = tokio::time::sleep_until(deadline) => SdkError::Cancelled("deadline exceeded".into()),
            },
            None => {
                self.cancel.cancelled().await;
                SdkError::Cancelled("cancelled by host".into())
            }
        }
    }

    /// Sleep for `period` unless cancellation or the deadline arrives first.
    pub async fn sleep(&self, period: Duration) -> SdkResult<()> {
        self.check()?;
        let wake = Instant::now() + period;
        let (until, hits_deadline) = match self.deadline {
            Some(deadline) if deadline < wake => (deadline, true),
            _ => (wake, false),
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SdkError::Cancelled("cancelled by host".into())),
            _ = tokio::time::sleep_until(until) => {
                if hits_deadline {
                    Err(SdkError::Cancelled("deadline exceeded".into()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_returns_early_on_cancel() {
        let ctx = OpContext::new();
        let clone = ctx.clone();
        let handle = tokio::spawn(async move { clone.sleep(Duration::from_secs(30)).await });
        ctx.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SdkError::Cancelled(_))));
    }

    #[tokio::test]
    async fn deadline_cuts_sleep_short() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(5));
        let err = ctx.sleep(Duration::from_secs(30)).await.unwrap_err();
        assert_eq!(err, SdkError::Cancelled("deadline exceeded".into()));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn expired_reports_deadline() {
        let ctx = OpContext::new().with_timeout(Duration::from_millis(5));
        let err = tokio::time::timeout(Duration::from_secs(1), ctx.expired())
            .await
            .unwrap();
        assert_eq!(err, SdkError::Cancelled("deadline exceeded".into()));
    }
}
