//! Error taxonomy for routing and retried execution.

use thiserror::Error;

use crate::domain::request::RequestType;

/// Why a request could not be routed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No service pool is configured for the request type. Retrying cannot help.
    #[error("no service is configured for request type {0}")]
    NoCompatibleService(RequestType),
    /// Every node in the eligible pools is currently unavailable.
    #[error("no available node for request type {0}")]
    NoAvailableNode(RequestType),
}

/// Why a retried execution gave up.
///
/// `E` is the error type of the caller-supplied operation.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// Routing failed; the retry loop stops immediately.
    #[error(transparent)]
    Route(#[from] RouteError),
    /// Every attempt failed.
    #[error("all {attempts} attempts failed, last error: {last_error}")]
    AllRetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        last_error: E,
    },
    /// The caller's overall deadline would pass before the next attempt could start.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error returned by the latest attempt, if any ran.
        last_error: Option<E>,
    },
}

impl<E> ExecuteError<E> {
    /// The operation's latest error, when the failure came from the operation.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            ExecuteError::Route(_) => None,
            ExecuteError::AllRetriesExhausted { last_error, .. } => Some(last_error),
            ExecuteError::DeadlineExceeded { last_error, .. } => last_error.as_ref(),
        }
    }

    /// Attempts that reached the operation.
    pub fn attempts(&self) -> u32 {
        match self {
            ExecuteError::Route(_) => 0,
            ExecuteError::AllRetriesExhausted { attempts, .. }
            | ExecuteError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }
}
