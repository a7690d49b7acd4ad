//! Process-wide interrupt flag shared by every runner in a delegation tree.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cooperative cancellation signal.
///
/// Cheap to clone; all clones observe the same flag. The runtime polls it at
/// iteration boundaries and the tool executor races in-flight tools against
/// [`InterruptSignal::cancelled`]. The flag can be reset, so a top-level UI
/// can reuse one signal across runs.
#[derive(Clone, Default)]
pub struct InterruptSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl InterruptSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once the signal fires. Registers for notification before
    /// re-checking the flag so a concurrent `interrupt()` is never missed.
    pub async fn cancelled(&self) {
        loop {
            if self.interrupted() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.interrupted() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for InterruptSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptSignal")
            .field("interrupted", &self.interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let signal = InterruptSignal::new();
        let other = signal.clone();
        assert!(!other.interrupted());
        signal.interrupt();
        assert!(other.interrupted());
        other.reset();
        assert!(!signal.interrupted());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_interrupt() {
        let signal = InterruptSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        signal.interrupt();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_set() {
        let signal = InterruptSignal::new();
        signal.interrupt();
        tokio::time::timeout(std::time::Duration::from_millis(50), signal.cancelled())
            .await
            .expect("already-interrupted signal should resolve at once");
    }
}
