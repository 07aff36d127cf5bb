//! One-shot readiness gate for a resource opened in the background.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

/// Lifecycle of a gated resource.
#[derive(Debug)]
pub enum GateState<T> {
    /// Still opening.
    Starting,
    /// Opened; the handle is published together with the transition.
    Ready(Arc<T>),
    /// Opening failed or was never attempted.
    Unavailable,
}

impl<T> GateState<T> {
    /// Returns true once the gate can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Starting)
    }

    fn handle(&self) -> Option<Arc<T>> {
        match self {
            Self::Ready(value) => Some(Arc::clone(value)),
            Self::Starting | Self::Unavailable => None,
        }
    }
}

impl<T> Clone for GateState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Starting => Self::Starting,
            Self::Ready(value) => Self::Ready(Arc::clone(value)),
            Self::Unavailable => Self::Unavailable,
        }
    }
}

/// Single-writer, many-waiter gate resolved exactly once.
///
/// Waiters suspend until the writer resolves the gate; after that every check
/// returns immediately.
#[derive(Debug)]
pub struct InitGate<T> {
    state: watch::Sender<GateState<T>>,
}

impl<T> Default for InitGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InitGate<T> {
    /// Creates a gate in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Starting);
        Self { state }
    }

    /// Creates a gate that is already `Ready`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (state, _) = watch::channel(GateState::Ready(Arc::new(value)));
        Self { state }
    }

    /// Creates a gate that is already `Unavailable`.
    #[must_use]
    pub fn unavailable() -> Self {
        let (state, _) = watch::channel(GateState::Unavailable);
        Self { state }
    }

    /// Moves the gate to `Ready(value)` or, for `None`, to `Unavailable`.
    ///
    /// Returns false if the gate was already resolved; the earlier outcome stands.
    pub fn resolve(&self, outcome: Option<T>) -> bool {
        let mut outcome = Some(outcome);
        let resolved = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = match outcome.take().flatten() {
                Some(value) => GateState::Ready(Arc::new(value)),
                None => GateState::Unavailable,
            };
            true
        });
        if !resolved {
            warn!("Init gate already resolved, ignoring second outcome");
        }
        resolved
    }

    /// Current state without waiting.
    #[must_use]
    pub fn state(&self) -> GateState<T> {
        self.state.borrow().clone()
    }

    /// Returns true once the gate is resolved.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Waits for the gate to resolve and returns the handle if it became `Ready`.
    pub async fn wait(&self) -> Option<Arc<T>> {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let state = rx.wait_for(GateState::is_terminal).await.ok()?;
        state.handle()
    }
}
