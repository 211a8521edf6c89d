//! Graceful shutdown coordination for the GAVID runtime.
//!
//! Predictions hold a [`ShutdownGuard`] while they run. Shutdown stops new
//! admissions, waits for the guards to drop (bounded by a timeout), and only
//! then lets the runtime release the telemetry backend.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::telemetry::metrics::record_in_flight;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: usize },
}

#[derive(Debug)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

/// Coordinates admission and draining of in-flight predictions.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: AtomicU8,
    in_flight: Arc<InFlight>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running.as_u8()),
            in_flight: Arc::new(InFlight {
                count: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Admit one request. Returns None once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        if !self.is_accepting() {
            return None;
        }
        let guard = ShutdownGuard {
            in_flight: self.in_flight.clone(),
        };
        let count = self.in_flight.count.fetch_add(1, Ordering::SeqCst) + 1;
        // A drain that started between the check and the increment must not
        // miss this request, so re-check and back out.
        if !self.is_accepting() {
            drop(guard);
            return None;
        }
        record_in_flight(count);
        Some(guard)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Stop admitting requests and wait up to `timeout` for the in-flight
    /// ones to finish. Later calls after the first return immediately.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        let previous = self
            .state
            .swap(ShutdownState::Draining.as_u8(), Ordering::SeqCst);
        if ShutdownState::from_u8(previous) == ShutdownState::Stopped {
            self.state
                .store(ShutdownState::Stopped.as_u8(), Ordering::SeqCst);
            return ShutdownResult::Complete;
        }

        tracing::info!(in_flight = self.in_flight_count(), "Draining in-flight requests");
        let result = self.wait_for_drain(timeout).await;

        self.state
            .store(ShutdownState::Stopped.as_u8(), Ordering::SeqCst);
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let now = tokio::time::Instant::now();
        // Unrepresentable deadlines wait for a year instead of overflowing.
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600));

        loop {
            let notified = self.in_flight.drained.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.in_flight_count();
                if remaining == 0 {
                    return ShutdownResult::Complete;
                }
                tracing::warn!(remaining, "Shutdown drain timed out");
                return ShutdownResult::Timeout { remaining };
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker for one admitted request.
#[derive(Debug)]
pub struct ShutdownGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let remaining = self.in_flight.count.fetch_sub(1, Ordering::SeqCst) - 1;
        record_in_flight(remaining);
        self.in_flight.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_running() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(), ShutdownState::Running);
        assert!(coordinator.is_accepting());
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[test]
    fn test_guard_counts() {
        let coordinator = ShutdownCoordinator::new();
        let a = coordinator.track();
        let b = coordinator.track();
        assert_eq!(coordinator.in_flight_count(), 2);
        drop(a);
        assert_eq!(coordinator.in_flight_count(), 1);
        drop(b);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_shutdown_completes() {
        let coordinator = ShutdownCoordinator::new();
        let result = coordinator.initiate(Duration::from_millis(50)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert!(coordinator.track().is_none());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let coordinator = ShutdownCoordinator::new();
        let result = coordinator.initiate(Duration::MAX).await;
        assert_eq!(result, ShutdownResult::Complete);
    }

    #[tokio::test]
    async fn test_timeout_reports_remaining() {
        let coordinator = ShutdownCoordinator::new();
        let _held = coordinator.track();
        let result = coordinator.initiate(Duration::from_millis(20)).await;
        assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    }

    #[tokio::test]
    async fn test_second_initiate_is_noop() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate(Duration::from_millis(10)).await;
        let again = coordinator.initiate(Duration::from_millis(10)).await;
        assert_eq!(again, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }
}
