//! Cooperative cancellation, per §5: tripping a token sets an `aborted` flag and
//! stores a reason; long-running work is expected to poll it at natural yield
//! points rather than being torn down forcibly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// A one-shot abort flag plus reason, handed to a Job's work function once it
/// transitions PENDING -> RUNNING. Cheaply cloneable; all clones observe the
/// same underlying state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Trips the token. Idempotent: only the first call's reason is kept, and
    /// `Notify` is only woken once meaningfully, matching `aborted`'s monotonic
    /// false -> true transition.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .aborted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.inner.reason.lock().unwrap() = Some(reason.into());
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap().clone()
    }

    /// Resolves once the token is cancelled. Work functions that want to race
    /// cancellation against an I/O future can `tokio::select!` on this.
    ///
    /// Registers the `Notify` waiter before checking `is_aborted`, since
    /// `cancel` wakes only currently-registered waiters: checking first would
    /// leave a window where a `cancel` between the check and the registration
    /// is missed forever.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_transitions_false_to_true_exactly_once() {
        let token = CancelToken::new();
        assert!(!token.is_aborted());
        token.cancel("first");
        assert!(token.is_aborted());
        token.cancel("second");
        assert_eq!(token.reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel("stop");
        handle.await.unwrap();
    }
}
