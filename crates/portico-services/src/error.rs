//! Failure taxonomy for gateway operations.
//!
//! Everything here is returned to the immediate caller as a declined result.
//! Nothing in this crate retries automatically — retry policy belongs to the
//! layer above.

use crate::task::TaskStatus;

/// Outcomes of a remote call made through a session.
///
/// `UnreachablePeer` and `Timeout` are deliberately distinct: the first means
/// the request never left, the second that no matching response arrived in
/// time. The front end maps them to different user-visible failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("destination '{0}' is not visible on the network")]
    UnreachablePeer(String),

    #[error("no response arrived within {0} seconds")]
    Timeout(u64),
}

/// Why the registry could not establish a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstablishError {
    #[error("credentials for '{0}' were not accepted")]
    Unauthorized(String),

    #[error("could not open a connection for '{0}'")]
    ConnectFailed(String),
}

/// Declined task operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("no such task: {0}")]
    UnknownTask(String),

    #[error("no task is running")]
    NoRunningTask,

    #[error("task is {current:?}, cannot {attempted}")]
    InvalidTransition {
        current: TaskStatus,
        attempted: &'static str,
    },

    #[error("device adapter declined with code {code}")]
    AdapterDeclined {
        code: u16,
        reason: Option<String>,
    },

    #[error("device adapter failed: {0}")]
    AdapterFailure(String),
}

/// Declined event-channel operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event channel {owner}:{event} is not active")]
    InactiveChannel { owner: String, event: String },
}
