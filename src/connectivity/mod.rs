//! Connectivity state machine and the one-shot ready signal.
//!
//! ```text
//! INIT ──► CONNECTING ──► UP ◄──► DOWN
//!               │                  ▲
//!               └──────────────────┘
//! ```
//!
//! The current state is published on a `watch` channel. The first entry into
//! `UP` flips the ready flag exactly once; later `DOWN → UP` recoveries do not
//! fire it again.

pub mod monitor;

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

pub use monitor::HealthMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    Init,
    Connecting,
    Up,
    Down,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Connecting => "CONNECTING",
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed {
        from: ConnectivityState,
        to: ConnectivityState,
        /// True only for the first ever entry into `UP`.
        first_up: bool,
    },
    Unchanged(ConnectivityState),
}

impl Transition {
    pub fn is_first_up(&self) -> bool {
        matches!(self, Self::Changed { first_up: true, .. })
    }
}

struct Inner {
    ready_fired: bool,
    last_success: Option<Instant>,
}

/// Process-wide connectivity tracker. Share it behind an `Arc`.
pub struct ConnectivityStateMachine {
    state_tx: watch::Sender<ConnectivityState>,
    ready_tx: watch::Sender<bool>,
    inner: Mutex<Inner>,
}

impl Default for ConnectivityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityStateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Init);
        let (ready_tx, _) = watch::channel(false);
        Self {
            state_tx,
            ready_tx,
            inner: Mutex::new(Inner {
                ready_fired: false,
                last_success: None,
            }),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Resolves once the machine has reached `UP` for the first time.
    /// Returns immediately if that already happened.
    pub async fn ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we
        // hold the borrow.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn move_to(&self, inner: &mut Inner, to: ConnectivityState) -> Transition {
        let from = self.state();
        if from == to {
            return Transition::Unchanged(from);
        }

        let first_up = to == ConnectivityState::Up && !inner.ready_fired;
        self.state_tx.send_replace(to);
        tracing::info!(from = %from, to = %to, "Connectivity state changed");

        if first_up {
            inner.ready_fired = true;
            self.ready_tx.send_replace(true);
            tracing::info!("Connector ready");
        }

        Transition::Changed { from, to, first_up }
    }

    /// INIT → CONNECTING. No-op in any other state.
    pub fn begin_connecting(&self) -> Transition {
        let mut inner = self.lock();
        match self.state() {
            ConnectivityState::Init => self.move_to(&mut inner, ConnectivityState::Connecting),
            other => Transition::Unchanged(other),
        }
    }

    /// CONNECTING → UP, DOWN → UP. Records the heartbeat.
    pub fn check_succeeded(&self) -> Transition {
        let mut inner = self.lock();
        match self.state() {
            ConnectivityState::Init => {
                tracing::warn!("Health check result before connecting, ignored");
                Transition::Unchanged(ConnectivityState::Init)
            }
            _ => {
                inner.last_success = Some(Instant::now());
                self.move_to(&mut inner, ConnectivityState::Up)
            }
        }
    }

    /// UP → DOWN, CONNECTING → DOWN.
    pub fn check_failed(&self) -> Transition {
        let mut inner = self.lock();
        match self.state() {
            ConnectivityState::Init => {
                tracing::warn!("Health check result before connecting, ignored");
                Transition::Unchanged(ConnectivityState::Init)
            }
            _ => self.move_to(&mut inner, ConnectivityState::Down),
        }
    }

    /// UP → DOWN when no health check has succeeded within `timeout`.
    pub fn check_heartbeat(&self, timeout: Duration) -> Transition {
        let mut inner = self.lock();
        let state = self.state();
        if state != ConnectivityState::Up {
            return Transition::Unchanged(state);
        }
        let lapsed = inner
            .last_success
            .map(|t| t.elapsed() > timeout)
            .unwrap_or(true);
        if lapsed {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Heartbeat lapsed"
            );
            self.move_to(&mut inner, ConnectivityState::Down)
        } else {
            Transition::Unchanged(state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_in_init() {
        let machine = ConnectivityStateMachine::new();
        assert_eq!(machine.state(), ConnectivityState::Init);
        assert!(!machine.is_ready());
    }

    #[test]
    fn test_happy_path_fires_ready_once() {
        let machine = ConnectivityStateMachine::new();

        assert!(matches!(
            machine.begin_connecting(),
            Transition::Changed {
                to: ConnectivityState::Connecting,
                ..
            }
        ));
        assert!(machine.check_succeeded().is_first_up());
        assert!(machine.is_ready());

        assert_eq!(
            machine.check_failed(),
            Transition::Changed {
                from: ConnectivityState::Up,
                to: ConnectivityState::Down,
                first_up: false
            }
        );
        let recovered = machine.check_succeeded();
        assert!(matches!(
            recovered,
            Transition::Changed {
                to: ConnectivityState::Up,
                ..
            }
        ));
        assert!(!recovered.is_first_up());
    }

    #[test]
    fn test_first_up_after_failed_connect_still_fires() {
        let machine = ConnectivityStateMachine::new();
        machine.begin_connecting();
        machine.check_failed();
        assert_eq!(machine.state(), ConnectivityState::Down);
        assert!(!machine.is_ready());

        assert!(machine.check_succeeded().is_first_up());
    }

    #[test]
    fn test_begin_connecting_only_from_init() {
        let machine = ConnectivityStateMachine::new();
        machine.begin_connecting();
        machine.check_succeeded();
        assert_eq!(
            machine.begin_connecting(),
            Transition::Unchanged(ConnectivityState::Up)
        );
    }

    #[test]
    fn test_check_before_connecting_is_ignored() {
        let machine = ConnectivityStateMachine::new();
        assert_eq!(
            machine.check_succeeded(),
            Transition::Unchanged(ConnectivityState::Init)
        );
        assert!(!machine.is_ready());
    }

    #[test]
    fn test_repeated_success_is_unchanged() {
        let machine = ConnectivityStateMachine::new();
        machine.begin_connecting();
        machine.check_succeeded();
        assert_eq!(
            machine.check_succeeded(),
            Transition::Unchanged(ConnectivityState::Up)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_lapse_moves_down() {
        let machine = ConnectivityStateMachine::new();
        machine.begin_connecting();
        machine.check_succeeded();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            machine.check_heartbeat(Duration::from_secs(10)),
            Transition::Unchanged(ConnectivityState::Up)
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(matches!(
            machine.check_heartbeat(Duration::from_secs(10)),
            Transition::Changed {
                to: ConnectivityState::Down,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_ready_resolves_for_late_waiters() {
        let machine = Arc::new(ConnectivityStateMachine::new());

        let waiter = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move { machine.ready().await })
        };

        machine.begin_connecting();
        machine.check_succeeded();
        waiter.await.unwrap();

        // Already ready: returns immediately.
        machine.ready().await;
    }

    #[tokio::test]
    async fn test_state_subscribers_see_changes() {
        let machine = ConnectivityStateMachine::new();
        let mut rx = machine.subscribe();

        machine.begin_connecting();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectivityState::Connecting);
    }
}
