//! Shared error and result types
//!
//! One typed error enum for the whole crate. The supervisor inspects the
//! error kind to choose a retry budget, and the REST layer maps kinds to
//! HTTP status codes, so variants are deliberately coarse.

use thiserror::Error;

/// Errors surfaced by the AWL client and the layers above it
#[derive(Debug, Error)]
pub enum AwlError {
    /// Socket/network failure, unexpected closure, send on a closed socket
    #[error("AWL connection error: {0}")]
    Connection(String),

    /// HTTP auth rejected, endpoint discovery failed, login sequence failure
    #[error("AWL login error: {0}")]
    Login(String),

    /// The server answered a request with an explicit error field
    #[error("AWL transaction error: {0}")]
    Transaction(String),

    /// No response for a transaction within its configured window
    #[error("AWL transaction timed out")]
    TransactionTimeout,

    /// More than 255 transactions in flight at once
    #[error("maximum 255 transactions in progress")]
    Capacity,

    /// Operation attempted without an active, logged-in session
    #[error("not connected to AWL; call connect() before making requests")]
    NotConnected,

    /// Invariant violation inside the gateway itself
    #[error("internal error: {0}")]
    Internal(String),
}

/// Which retry budget a failed session-establish attempt draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Transport-level failures: retried under the connection window
    Connection,
    /// Everything else that can fail during login: retried under the login window
    Login,
}

impl AwlError {
    /// Classify an establish-phase failure for the reconnect supervisor.
    ///
    /// Transport failures get the connection budget; every other failure
    /// during connect (HTTP rejection, discovery, the login transaction
    /// itself) counts against the login budget.
    pub fn retry_kind(&self) -> RetryKind {
        match self {
            AwlError::Connection(_) => RetryKind::Connection,
            _ => RetryKind::Login,
        }
    }
}

pub type Result<T> = std::result::Result<T, AwlError>;
