//! Shutdown signalling shared by background tasks and admission loops.
//!
//! Shutdown is a `watch` flag flipped to `true` once. Every long-running loop
//! holds its own receiver.

use tokio::sync::watch;

/// Resolve once shutdown has been requested.
///
/// If the sender is dropped without ever requesting shutdown, this never
/// resolves: nobody is left who could ask for it.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolves_after_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
        tx.send(true).expect("receiver alive");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown observed")
            .expect("task completed");
    }

    #[tokio::test]
    async fn test_pending_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), shutdown_requested(&mut rx)).await;
        assert!(outcome.is_err());
    }
}
