//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first SIGINT or SIGTERM the shared cancellation flag is set: a
//! poll loop stops before its next send and a running script is terminated
//! by the executor. A second signal exits immediately with code 130.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::executor::ScriptExecutor;

/// How often the shutdown watch checks for a pending signal.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit code for interrupted runs
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Signal handler state
#[derive(Debug)]
pub struct SignalState {
    /// Shared with the poll client and script executor
    cancelled: Arc<AtomicBool>,
    /// Second signal received
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::with_flag(Arc::new(AtomicBool::new(false)))
    }

    /// Create a state that sets an existing cancellation flag.
    pub fn with_flag(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            immediate_exit: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
        }
    }

    /// The cancellation flag set by the first signal.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    ///
    /// Returns the appropriate action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancelled.store(true, Ordering::SeqCst);
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel the poll and any running script
    InitiateCancellation,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process signal handler around a [`SignalState`].
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::with_state(Arc::new(SignalState::new()))
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the signal handlers
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                warn!("received interrupt signal, cancelling");
            }
            SignalAction::ImmediateExit => {
                warn!("received second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Block until a signal was received and `executor` has no script running.
///
/// The executor observes the same flag, so a running script is already
/// being terminated by the time this starts waiting on it.
pub fn wait_for_shutdown(state: &SignalState, executor: &ScriptExecutor) {
    while !state.is_cancel_requested() {
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }
    while executor.is_running() {
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }
}

/// Exit with [`EXIT_CODE_INTERRUPTED`] once [`wait_for_shutdown`] returns.
///
/// For servers whose main thread may be blocked reading input.
pub fn spawn_shutdown_watch(state: Arc<SignalState>, executor: Arc<ScriptExecutor>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        wait_for_shutdown(&state, &executor);
        info!("shutting down after interrupt");
        std::process::exit(EXIT_CODE_INTERRUPTED);
    })
}
