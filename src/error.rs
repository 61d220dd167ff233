use thiserror::Error;

/// Fatal errors raised by the transfer engine.
///
/// Every kind except [`EngineError::Input`] is fatal to the connection that
/// raised it: the error propagates to the event entry point and the
/// connection list converts it into a teardown. `Input` is returned to the
/// caller when user-supplied data (such as an extra tracker URL) cannot be
/// used.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An engine invariant was violated.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// The peer sent malformed data.
    #[error("network error: {0}")]
    Network(String),

    /// The peer requested something it was not entitled to.
    #[error("communication error: {0}")]
    Communication(&'static str),

    /// The chunk store could not satisfy a lease.
    #[error("storage error: {0}")]
    Storage(String),

    /// Caller-supplied input could not be parsed.
    #[error("input error: {0}")]
    Input(String),

    /// Socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
