use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Cancellation shared by every background driver.
///
/// Backed by a `watch` channel so that a driver subscribing after the trigger
/// still observes it.
#[derive(Clone)]
pub struct Shutdown {
    notify: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn trigger(&self) {
        let changed = self.notify.send_if_modified(|fired| {
            let first = !*fired;
            *fired = true;
            first
        });
        if changed {
            info!("[shutdown] signal triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.notify.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called
    pub async fn wait(&self) {
        let mut rx = self.notify.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::task::yield_now().await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
