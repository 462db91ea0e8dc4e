//! Graceful shutdown for a flight server.
//!
//! Termination is requested by sending a [`ControlSignal`] on the server's
//! control channel (the `shutdown` action, or `FlightServer::stop`). The serve
//! loop consumes the signal, stops admitting calls, and drains the ones in
//! flight before returning.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};

use crate::telemetry::{self, SecurityEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Requested through the `shutdown` action by this user.
    Shutdown { requested_by: String },
    /// Requested by the embedding process.
    Stop,
}

/// Sending half of the control channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: mpsc::UnboundedSender<ControlSignal>,
}

impl ControlHandle {
    pub fn request_shutdown(&self, requested_by: &str) {
        telemetry::log_security_event(
            SecurityEvent::ShutdownRequested,
            "Shutdown requested",
            &[("user", requested_by)],
        );
        self.send(ControlSignal::Shutdown {
            requested_by: requested_by.to_string(),
        });
    }

    pub fn stop(&self) {
        self.send(ControlSignal::Stop);
    }

    fn send(&self, signal: ControlSignal) {
        // Closed once the serve loop has already shut down; nothing left to stop.
        if self.sender.send(signal).is_err() {
            tracing::debug!("control signal after shutdown ignored");
        }
    }
}

pub fn control_channel() -> (ControlHandle, mpsc::UnboundedReceiver<ControlSignal>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ControlHandle { sender }, receiver)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

/// Admission control plus in-flight call counting.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Admit one call. `None` once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = ShutdownGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        };
        // Counted before the state check so a concurrent drain cannot miss it.
        if self.is_accepting() {
            Some(guard)
        } else {
            None
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting calls and wait up to `timeout` for the rest to finish.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        *self.state.write() = ShutdownState::Draining;
        let result = self.wait_for_drain(timeout).await;
        *self.state.write() = ShutdownState::Stopped;
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return match self.in_flight_count() {
                        0 => ShutdownResult::Complete,
                        remaining => ShutdownResult::Timeout { remaining },
                    };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the lifetime of one call, including its response stream.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
