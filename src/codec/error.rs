//! Error types for block encoding and request reassembly.

use thiserror::Error;

/// Failures produced while framing or reassembling requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The message handed to the encoder is not valid UTF-8.
    #[error("message is not valid UTF-8 and cannot be encoded")]
    EncodeType,

    /// The buffer size cannot hold a header, both sentinels and one scalar.
    #[error("buffer of {buffer_size} bytes is too small for a {needed} byte block")]
    BufferTooSmall {
        /// Configured buffer size.
        buffer_size: usize,
        /// Smallest block the message needs.
        needed: usize,
    },

    /// A block header or framing is malformed.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The stream ended before every block of the request arrived.
    #[error("incomplete request: received {received} of {expected} blocks")]
    IncompleteRequest {
        /// Blocks received so far.
        received: usize,
        /// Blocks announced by the header (0 when no header was parsed).
        expected: usize,
    },

    /// Boundaries in a buffer could not be matched into whole blocks.
    #[error("cannot reconstruct blocks from mixed boundaries: {0}")]
    UnreconstructibleMixed(String),

    /// A block payload is not valid UTF-8; the block was dropped.
    #[error("block is not valid UTF-8: {0}")]
    Utf8Decode(String),
}
