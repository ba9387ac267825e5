//! Timeout Guard.
//!
//! [`TimeoutGuard::run`] bounds the wall-clock duration of a future and
//! reports expiry as [`DeadlineExceeded`]. Two backends exist behind the same
//! call:
//!
//! - `Runtime`: the tokio time driver arms the deadline
//! - `Thread`: a dedicated timer thread fires the deadline over a oneshot
//!
//! The backend is chosen once when the guard is built; callers never branch
//! on it. On expiry the body future is dropped, which is what cancels it (for
//! a child process this means `kill_on_drop`). On normal completion the timer
//! is disarmed before `run` returns, so no timer outlives its call.

use crate::errors::DeadlineExceeded;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

/// Timer implementation used by a [`TimeoutGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutBackend {
    /// `Runtime` on unix hosts, `Thread` elsewhere
    #[default]
    Auto,
    Runtime,
    Thread,
}

impl TimeoutBackend {
    /// Resolve `Auto` to a concrete backend for this host.
    pub fn resolve(self) -> Self {
        match self {
            TimeoutBackend::Auto if cfg!(unix) => TimeoutBackend::Runtime,
            TimeoutBackend::Auto => TimeoutBackend::Thread,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutBackend::Auto => "auto",
            TimeoutBackend::Runtime => "runtime",
            TimeoutBackend::Thread => "thread",
        }
    }
}

impl std::fmt::Display for TimeoutBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bounds the duration of phase executions.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    backend: TimeoutBackend,
    armed: Arc<AtomicUsize>,
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(TimeoutBackend::Auto)
    }
}

impl TimeoutGuard {
    pub fn new(backend: TimeoutBackend) -> Self {
        Self {
            backend: backend.resolve(),
            armed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn backend(&self) -> TimeoutBackend {
        self.backend
    }

    /// Number of deadlines currently armed by this guard.
    pub fn armed_timers(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }

    /// Run `body`, failing with [`DeadlineExceeded`] if it outlives `limit`.
    pub async fn run<F, T>(&self, limit: Duration, body: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        let _armed = ArmedTimer::new(&self.armed);
        match self.backend {
            TimeoutBackend::Thread => run_on_timer_thread(limit, body).await,
            _ => tokio::time::timeout(limit, body)
                .await
                .map_err(|_| DeadlineExceeded(limit)),
        }
    }
}

/// Run `body` under a default guard with a deadline in seconds.
pub async fn run_with_timeout<F, T>(timeout_seconds: u64, body: F) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    TimeoutGuard::default()
        .run(Duration::from_secs(timeout_seconds), body)
        .await
}

async fn run_on_timer_thread<F, T>(limit: Duration, body: F) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    let (fire_tx, mut fire_rx) = tokio::sync::oneshot::channel::<()>();
    let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

    let timer = std::thread::Builder::new()
        .name("conductor-timeout".to_string())
        .spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(limit) {
                let _ = fire_tx.send(());
            }
        });

    let timer = match timer {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start timer thread, using runtime timer");
            return tokio::time::timeout(limit, body)
                .await
                .map_err(|_| DeadlineExceeded(limit));
        }
    };

    tokio::pin!(body);
    let result = tokio::select! {
        out = &mut body => Ok(out),
        Ok(()) = &mut fire_rx => Err(DeadlineExceeded(limit)),
    };

    // Disconnecting the cancel channel wakes the timer thread immediately.
    drop(cancel_tx);
    let _ = timer.join();
    result
}

/// Counts an armed deadline for as long as it lives.
struct ArmedTimer<'a>(&'a AtomicUsize);

impl<'a> ArmedTimer<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ArmedTimer<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_auto_resolves_to_concrete_backend() {
        let resolved = TimeoutBackend::Auto.resolve();
        assert_ne!(resolved, TimeoutBackend::Auto);
        assert_eq!(TimeoutBackend::Thread.resolve(), TimeoutBackend::Thread);
        assert_eq!(TimeoutGuard::new(TimeoutBackend::Runtime).backend(), TimeoutBackend::Runtime);
    }

    #[tokio::test]
    async fn test_runtime_backend_fires_within_deadline() {
        let guard = TimeoutGuard::new(TimeoutBackend::Runtime);
        let start = Instant::now();
        let result = guard
            .run(
                Duration::from_secs(1),
                tokio::time::sleep(Duration::from_secs(10)),
            )
            .await;
        assert_eq!(result, Err(DeadlineExceeded(Duration::from_secs(1))));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(guard.armed_timers(), 0);
    }

    #[tokio::test]
    async fn test_later_call_is_unaffected_by_earlier_timeout() {
        let guard = TimeoutGuard::new(TimeoutBackend::Runtime);
        let _ = guard
            .run(
                Duration::from_millis(100),
                tokio::time::sleep(Duration::from_secs(10)),
            )
            .await;

        let value = guard
            .run(Duration::from_secs(5), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                42
            })
            .await;
        assert_eq!(value, Ok(42));
        assert_eq!(guard.armed_timers(), 0);
    }

    #[tokio::test]
    async fn test_thread_backend_fires_and_disarms() {
        let guard = TimeoutGuard::new(TimeoutBackend::Thread);
        let start = Instant::now();
        let result = guard
            .run(
                Duration::from_millis(300),
                tokio::time::sleep(Duration::from_secs(10)),
            )
            .await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(3));

        let ok = guard
            .run(Duration::from_secs(5), async { "done" })
            .await;
        assert_eq!(ok, Ok("done"));
        assert_eq!(guard.armed_timers(), 0);
    }

    #[tokio::test]
    async fn test_run_with_timeout_helper() {
        assert_eq!(run_with_timeout(5, async { 7 }).await, Ok(7));
        assert!(
            run_with_timeout(0, tokio::time::sleep(Duration::from_secs(5)))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_backend_deserializes_lowercase() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            backend: TimeoutBackend,
        }
        let w: Wrapper = toml::from_str("backend = \"thread\"").unwrap();
        assert_eq!(w.backend, TimeoutBackend::Thread);
    }
}
