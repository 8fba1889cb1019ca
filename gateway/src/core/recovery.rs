//! Failure classification and bounded, single-flight recovery.
//!
//! Every collaborator error maps onto a [`FailureKind`]. Only a small, fixed set of
//! network-shaped kinds is considered retryable; everything else is fatal and is
//! surfaced to the client immediately.
//!
//! [`RecoveryCoordinator::handle_recovery`] drives a recovery action at most
//! `max_attempts` times with a fixed delay between attempts, reporting progress
//! through a [`RecoveryObserver`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default ceiling on recovery attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before each recovery attempt
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(2000);

/// Code reported to the client when recovery gives up
pub const MAX_ATTEMPTS_CODE: &str = "MAX_RECONNECT_ATTEMPTS";

/// Category of a failure, used to decide between recovery and teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConnectionReset,
    Timeout,
    ConnectionRefused,
    Network,
    Stream,
    Authentication,
    InvalidRequest,
    NotFound,
    Provider,
    Internal,
}

/// Failure kinds that trigger a recovery attempt
pub const RETRYABLE_FAILURES: [FailureKind; 5] = [
    FailureKind::ConnectionReset,
    FailureKind::Timeout,
    FailureKind::ConnectionRefused,
    FailureKind::Network,
    FailureKind::Stream,
];

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        RETRYABLE_FAILURES.contains(&self)
    }

    /// Stable code for logs and error details
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::ConnectionReset => "ECONNRESET",
            FailureKind::Timeout => "ETIMEDOUT",
            FailureKind::ConnectionRefused => "ECONNREFUSED",
            FailureKind::Network => "NETWORK_ERROR",
            FailureKind::Stream => "STREAM_ERROR",
            FailureKind::Authentication => "AUTHENTICATION_ERROR",
            FailureKind::InvalidRequest => "INVALID_REQUEST",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::Provider => "PROVIDER_ERROR",
            FailureKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Classify an I/O error by its kind
    pub fn from_io(error: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                FailureKind::ConnectionReset
            }
            ErrorKind::TimedOut => FailureKind::Timeout,
            ErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
            _ => FailureKind::Network,
        }
    }

    /// Classify a transport error reported by reqwest
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            FailureKind::Timeout
        } else if error.is_connect() {
            FailureKind::ConnectionRefused
        } else if error.is_body() || error.is_decode() {
            FailureKind::Stream
        } else if error.is_request() {
            FailureKind::Network
        } else {
            FailureKind::Provider
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors that know their own failure category
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;

    fn is_retryable(&self) -> bool {
        self.failure_kind().is_retryable()
    }
}

/// Receives recovery progress notifications
#[async_trait]
pub trait RecoveryObserver: Send + Sync {
    /// Called before each attempt, `attempt` starts at 1
    async fn on_attempt(&self, attempt: u32, max_attempts: u32);

    async fn on_recovered(&self);

    async fn on_exhausted(&self, message: &str, code: &str);
}

/// Result of a [`RecoveryCoordinator::handle_recovery`] call
#[derive(Debug)]
pub enum RecoveryOutcome<T> {
    /// The action succeeded and produced a value
    Recovered(T),
    /// Every permitted attempt failed
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    /// Another recovery was already running; nothing was done
    InProgress,
    /// The surrounding session was torn down mid-recovery
    Cancelled,
}

impl<T> RecoveryOutcome<T> {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered(_))
    }
}

/// Recovery tuning
#[derive(Debug, Clone, Copy)]
pub struct RecoverySettings {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RECOVERY_DELAY,
        }
    }
}

/// Drives bounded retry of a recovery action.
///
/// The attempt counter survives exhaustion: once `max_attempts` actions have failed,
/// later calls report exhaustion without invoking the action until [`reset`] is called.
///
/// [`reset`]: RecoveryCoordinator::reset
#[derive(Debug)]
pub struct RecoveryCoordinator {
    settings: RecoverySettings,
    attempts: AtomicU32,
    in_progress: AtomicBool,
}

/// Clears the reentrancy flag when a recovery run ends, including on cancellation
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RecoveryCoordinator {
    pub fn new(settings: RecoverySettings) -> Self {
        Self {
            settings,
            attempts: AtomicU32::new(0),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> RecoverySettings {
        self.settings
    }

    /// Whether `error` belongs to the retryable failure set
    pub fn should_attempt<E: Classify + ?Sized>(&self, error: &E) -> bool {
        error.is_retryable()
    }

    pub fn is_recovering(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn current_attempt(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Release);
        self.in_progress.store(false, Ordering::Release);
    }

    /// Run `action` until it succeeds or the attempt budget is spent.
    ///
    /// Each attempt emits [`RecoveryObserver::on_attempt`], waits the configured delay,
    /// then awaits `action(attempt)`. Cancelling `cancel` aborts the run between or
    /// during attempts.
    pub async fn handle_recovery<T, E, F, Fut>(
        &self,
        observer: &dyn RecoveryObserver,
        cancel: &CancellationToken,
        mut action: F,
    ) -> RecoveryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return RecoveryOutcome::InProgress;
        }
        let _guard = InProgressGuard(&self.in_progress);

        let max_attempts = self.settings.max_attempts;
        let mut last_error = None;

        while self.attempts.load(Ordering::Acquire) < max_attempts {
            let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
            info!(attempt, max_attempts, "Starting recovery attempt");
            observer.on_attempt(attempt, max_attempts).await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return RecoveryOutcome::Cancelled,
                _ = tokio::time::sleep(self.settings.delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RecoveryOutcome::Cancelled,
                result = action(attempt) => result,
            };

            match result {
                Ok(value) => {
                    self.attempts.store(0, Ordering::Release);
                    info!(attempt, "Recovery succeeded");
                    observer.on_recovered().await;
                    return RecoveryOutcome::Recovered(value);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Recovery attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(max_attempts, "Recovery exhausted");
        observer
            .on_exhausted("Maximum reconnection attempts reached", MAX_ATTEMPTS_CODE)
            .await;

        RecoveryOutcome::Exhausted {
            attempts: max_attempts,
            last_error,
        }
    }
}

impl Default for RecoveryCoordinator {
    fn default() -> Self {
        Self::new(RecoverySettings::default())
    }
}
