//! The `Clock` port: everything time-related that the core needs, so tests
//! can drive fake timeouts instead of waiting on a wall clock.

use std::time::Duration;

#[cfg(any(test, feature = "test-util"))]
use mockall::automock;

#[cfg_attr(any(test, feature = "test-util"), automock)]
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
