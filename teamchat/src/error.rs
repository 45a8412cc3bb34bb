//! Typed errors surfaced to callers of the session store.
//!
//! Internal I/O helpers propagate `anyhow`; anything a user can act on is
//! one of these variants.

/// Errors returned by session store operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// No session is focused; create or pick one first.
    #[error("No active session. Create or select a session first.")]
    NoActiveSession,

    /// The backend health check is failing.
    #[error("Not connected to the backend service.")]
    NotConnected,

    /// The message id does not exist in the current session.
    #[error("Message '{message_id}' not found in the current session.")]
    MessageNotFound { message_id: String },

    /// Only failed messages can be resent.
    #[error("Message '{message_id}' is {status} and cannot be retried.")]
    NotRetryable { message_id: String, status: String },

    /// The backend rejected or never answered the request.
    #[error("Sending message '{message_id}' failed: {reason}")]
    Request { message_id: String, reason: String },
}

pub type ChatResult<T> = Result<T, ChatError>;
