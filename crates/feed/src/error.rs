use thiserror::Error;

/// Transport-level errors raised by the feed session.
///
/// Everything except [`FeedError::MaxAttempts`] is recoverable: the session
/// manager reconnects with exponential backoff.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed authorization failed: {0}")]
    Auth(String),

    #[error("failed to connect to feed endpoint: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("max reconnect attempts ({0}) reached")]
    MaxAttempts(u32),
}
