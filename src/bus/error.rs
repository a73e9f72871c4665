//! Bus error types.

use thiserror::Error;

use crate::net::NetError;

use super::envelope::Channel;

/// Errors raised by the bus or a satellite handler.
#[derive(Debug, Error)]
pub enum BusError {
    /// The queue towards `0` is closed; its consumer has stopped.
    #[error("{0} queue closed")]
    QueueClosed(Channel),

    /// The bus has stopped and accepts no more envelopes.
    #[error("bus stopped")]
    Stopped,

    /// An envelope lacks a required argument.
    #[error("{kind} is missing argument `{arg}`")]
    MissingArgument {
        /// Envelope kind.
        kind: &'static str,
        /// Argument name.
        arg: &'static str,
    },

    /// A network operation failed.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;
