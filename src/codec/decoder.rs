//! Incremental request decoder.
//!
//! Socket reads are fed as they arrive (at most one buffer of
//! `buffer_size` bytes each). The decoder scans them for block sentinels and
//! handles every shape a read can take:
//!
//! - a whole block, one prefix at the start and one suffix at the end
//! - an interior continuation of the block currently in flight
//! - mixed boundaries: the tail of one block, whole blocks, and the head of
//!   the next
//!
//! At most one partial block is held across reads. A second prefix opening
//! before the pending block is terminated is invalid data.
//!
//! Once the first block reveals the count `n`, the request is complete when
//! `n` distinct blocks have arrived. [`RequestDecoder::finish`] then orders
//! the blocks, concatenates the payloads and splits off the command envelope
//! and the MSGUID tag.

use std::collections::BTreeMap;

use crate::constants::{BLOCK_PREFIX, BLOCK_SUFFIX};

use super::block::parse_block;
use super::command::{split_cmd_and_msg, CommandArgs, CommandCode};
use super::error::CodecError;
use super::msguid::strip_msguid;

/// A fully reassembled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    /// Sender UID from the block headers (`None` for the literal `None`).
    pub sender_uid: Option<String>,
    /// The reassembled message, envelope and tag included.
    pub raw: String,
    /// Character count of `raw`, the value acked back to the sender.
    pub total_chars: usize,
    /// Command code of the envelope, as written.
    pub code: Option<String>,
    /// Command arguments (empty without envelope).
    pub args: CommandArgs,
    /// Message text without envelope and MSGUID tag.
    pub message: String,
    /// MSGUID of the request, if tagged.
    pub msguid: Option<String>,
}

impl DecodedRequest {
    /// Build a request view from a reassembled message.
    pub fn from_raw(raw: String, sender_uid: Option<String>) -> Self {
        let (untagged, msguid) = strip_msguid(&raw);
        let (command, tail) = split_cmd_and_msg(&untagged);
        let (code, args) = match command {
            Some(cmd) => (Some(cmd.code), cmd.args),
            None => (None, CommandArgs::new()),
        };
        let message = tail.to_string();
        Self {
            sender_uid,
            total_chars: raw.chars().count(),
            raw,
            code,
            args,
            message,
            msguid,
        }
    }

    /// The command code if it belongs to the known vocabulary.
    pub fn command(&self) -> Option<CommandCode> {
        self.code.as_deref().and_then(|c| c.parse().ok())
    }

    /// Whether this request is an ack carrying `expected_chars`.
    pub fn is_ack_for(&self, expected_chars: usize) -> bool {
        self.command() == Some(CommandCode::ConfirmReception)
            && self.message.trim().parse::<usize>() == Ok(expected_chars)
    }
}

/// Reassembles the blocks of one request from a byte stream.
#[derive(Debug)]
pub struct RequestDecoder {
    buffer_size: usize,
    /// Unconsumed bytes: empty, or the head of one partial block.
    pending: Vec<u8>,
    blocks: BTreeMap<usize, String>,
    expected: Option<usize>,
    sender_uid: Option<String>,
    total_bytes: Option<usize>,
}

impl RequestDecoder {
    /// Create a decoder for blocks of at most `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            pending: Vec::new(),
            blocks: BTreeMap::new(),
            expected: None,
            sender_uid: None,
            total_bytes: None,
        }
    }

    /// Feed one socket read.
    ///
    /// On error the offending data is dropped; the decoder keeps the blocks
    /// it already accepted.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.pending.extend_from_slice(bytes);
        let prefix = BLOCK_PREFIX.as_bytes();
        let suffix = BLOCK_SUFFIX.as_bytes();

        loop {
            if self.pending.is_empty() {
                return Ok(());
            }

            if !self.pending.starts_with(prefix) {
                // A read may stop in the middle of the opening sentinel.
                if prefix.starts_with(&self.pending) {
                    return Ok(());
                }
                let orphan = self.pending.len();
                self.pending.clear();
                return Err(CodecError::UnreconstructibleMixed(format!(
                    "{orphan} bytes outside of any block"
                )));
            }

            let body = &self.pending[prefix.len()..];
            let next_suffix = find(body, suffix);
            let next_prefix = find(body, prefix);

            if let Some(opened) = next_prefix {
                if next_suffix.is_none_or(|end| opened < end) {
                    self.pending.clear();
                    return Err(CodecError::InvalidBlock(
                        "second block opened before the pending one was closed".to_string(),
                    ));
                }
            }

            let Some(end) = next_suffix else {
                if self.pending.len() > self.buffer_size {
                    self.pending.clear();
                    return Err(CodecError::InvalidBlock(format!(
                        "unterminated block exceeds {} bytes",
                        self.buffer_size
                    )));
                }
                return Ok(());
            };

            let inner = body[..end].to_vec();
            self.pending.drain(..prefix.len() + end + suffix.len());
            self.accept_block(&inner)?;
        }
    }

    fn accept_block(&mut self, inner: &[u8]) -> Result<(), CodecError> {
        let text = std::str::from_utf8(inner).map_err(|e| CodecError::Utf8Decode(e.to_string()))?;
        let (header, payload) = parse_block(text)?;

        match self.expected {
            None => {
                self.expected = Some(header.count);
                self.sender_uid.clone_from(&header.sender_uid);
                self.total_bytes = Some(header.total_bytes);
            }
            Some(count) => {
                if header.count != count
                    || header.sender_uid != self.sender_uid
                    || Some(header.total_bytes) != self.total_bytes
                {
                    return Err(CodecError::InvalidBlock(format!(
                        "block {}/{} does not belong to the current request",
                        header.index, header.count
                    )));
                }
            }
        }

        log::trace!(
            "[Codec] block {}/{} from {:?} ({} bytes)",
            header.index,
            header.count,
            header.sender_uid,
            payload.len()
        );
        self.blocks.insert(header.index, payload.to_string());
        Ok(())
    }

    /// Whether every announced block has arrived.
    pub fn is_complete(&self) -> bool {
        self.expected == Some(self.blocks.len())
    }

    /// Whether a block is partially buffered.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of blocks accepted so far.
    pub fn received(&self) -> usize {
        self.blocks.len()
    }

    /// Reassemble the request.
    pub fn finish(self) -> Result<DecodedRequest, CodecError> {
        if !self.is_complete() {
            return Err(CodecError::IncompleteRequest {
                received: self.blocks.len(),
                expected: self.expected.unwrap_or(0),
            });
        }
        let raw: String = self.blocks.into_values().collect();
        if Some(raw.len()) != self.total_bytes {
            return Err(CodecError::InvalidBlock(format!(
                "reassembled {} bytes, header announced {}",
                raw.len(),
                self.total_bytes.unwrap_or(0)
            )));
        }
        Ok(DecodedRequest::from_raw(raw, self.sender_uid))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode a complete request from a sequence of buffers.
pub fn decode_buffers<'a, I>(buffers: I, buffer_size: usize) -> Result<DecodedRequest, CodecError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut decoder = RequestDecoder::new(buffer_size);
    for buffer in buffers {
        decoder.feed(buffer)?;
        if decoder.is_complete() {
            break;
        }
    }
    decoder.finish()
}
