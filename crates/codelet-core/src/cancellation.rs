//! Cooperative cancellation.
//!
//! A `CancellationSource` owns the signal; every `Cancellation` handed out
//! by it observes the same flag. Once cancelled, a source stays cancelled.

use tokio::sync::watch;

use crate::error::DomainError;

/// The owning side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    /// Creates a source that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self { sender }
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> Cancellation {
        Cancellation {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Signals cancellation to every token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable view of a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    receiver: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A token that is never cancelled.
    #[must_use]
    pub fn none() -> Self {
        Self { receiver: None }
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }

    /// Returns `Err(DomainError::Cancelled)` if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Cancelled` once the source has been cancelled.
    pub fn check(&self) -> Result<(), DomainError> {
        if self.is_cancelled() {
            Err(DomainError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes once cancellation is requested.
    ///
    /// Never completes for `Cancellation::none()` or when the source is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return std::future::pending().await;
        };
        let mut receiver = receiver.clone();
        let signalled = receiver.wait_for(|cancelled| *cancelled).await.is_ok();
        if !signalled {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_token_observes_cancel() {
        // Arrange
        let source = CancellationSource::new();
        let token = source.token();

        // Act
        source.cancel();

        // Assert
        assert!(token.is_cancelled());
        assert!(source.is_cancelled());
        assert_eq!(token.check(), Err(DomainError::Cancelled));
    }

    #[test]
    fn test_none_is_never_cancelled() {
        let token = Cancellation::none();

        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_future_completes_after_cancel() {
        let source = CancellationSource::new();
        let token = source.token();

        let waiter = tokio::spawn(async move { token.cancelled().await });
        source.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() did not complete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_future_pends_without_cancel() {
        let source = CancellationSource::new();
        let token = source.token();

        let result = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;

        assert!(result.is_err());
        drop(source);
    }
}
