//! Error types for the client endpoint and the server container.

use std::io;

use thiserror::Error;

use crate::codec::CodecError;

/// Protocol-level violations detected while talking to a peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peer acked a different character count.
    #[error("ack mismatch: expected {expected}, got {got:?}")]
    AckMismatch {
        /// Character count of the message that was sent.
        expected: usize,
        /// Raw reply received instead.
        got: String,
    },

    /// The peer answered with something that is not an ack.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The server refused the request.
    #[error("connection refused by server")]
    Refused,

    /// No record exists for this UID.
    #[error("unknown uid: {0}")]
    UnknownUid(String),

    /// The client never advertised a reverse listen address.
    #[error("no read address known for {0}")]
    MissingReadAddress(String),

    /// An envelope argument is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures surfaced by network operations.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket or OS level failure, classified by [`crate::classify`].
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request could not be framed or reassembled.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer did not answer in time.
    #[error("timed out")]
    Timeout,

    /// The peer broke the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Lifecycle request that does not apply to the current state.
    #[error("lifecycle: {0}")]
    Lifecycle(String),
}

impl From<tokio::time::error::Elapsed> for NetError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        NetError::Timeout
    }
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;
