//! Block framing: splitting messages into self-framed wire units.
//!
//! ```text
//! <#bp#>|<i>/<n>|<sender_uid>|<byte_len>|<payload_slice><#bs#>
//! ```
//!
//! - `i/n`: 1-based index and total block count
//! - `sender_uid`: sending endpoint, or `None`
//! - `byte_len`: UTF-8 byte length of the whole message
//! - `payload_slice`: consecutive slice of the message bytes, cut on a
//!   scalar boundary so every block is valid UTF-8 on its own
//!
//! Every block is at most `buffer_size` bytes once serialized.

use crate::constants::{BLOCK_PREFIX, BLOCK_SUFFIX, NULL_UID};

use super::error::CodecError;

/// Widest UTF-8 scalar, the minimum payload room a block must offer.
const MAX_SCALAR_WIDTH: usize = 4;

/// Result of encoding one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Character count of the message, the value a receiver acks.
    pub total_chars: usize,
    /// UTF-8 byte length of the message, as written in every header.
    pub total_bytes: usize,
    /// Serialized blocks in transmission order.
    pub blocks: Vec<String>,
}

impl EncodedMessage {
    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the message produced no block (never true for a valid encode).
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Header of a parsed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// 1-based block index.
    pub index: usize,
    /// Total number of blocks in the request.
    pub count: usize,
    /// Sender UID, `None` for the literal `None`.
    pub sender_uid: Option<String>,
    /// UTF-8 byte length of the reassembled message.
    pub total_bytes: usize,
}

/// Encode `message` into blocks of at most `buffer_size` bytes.
pub fn encode(
    message: &str,
    sender_uid: Option<&str>,
    buffer_size: usize,
) -> Result<EncodedMessage, CodecError> {
    let uid = sender_uid.unwrap_or(NULL_UID);
    let total_bytes = message.len();
    let sentinels = BLOCK_PREFIX.len() + BLOCK_SUFFIX.len();

    let smallest = format_header(1, 1, uid, total_bytes).len() + sentinels + MAX_SCALAR_WIDTH;
    if buffer_size < smallest {
        return Err(CodecError::BufferTooSmall {
            buffer_size,
            needed: smallest,
        });
    }

    let mut count = total_bytes.div_ceil(buffer_size).max(1);
    loop {
        let headers: Vec<String> = (1..=count)
            .map(|i| format_header(i, count, uid, total_bytes))
            .collect();

        let widest = headers.iter().map(String::len).max().unwrap_or(0) + sentinels;
        if widest + MAX_SCALAR_WIDTH > buffer_size {
            return Err(CodecError::BufferTooSmall {
                buffer_size,
                needed: widest + MAX_SCALAR_WIDTH,
            });
        }

        let overhead: usize = headers.iter().map(String::len).sum::<usize>() + count * sentinels;
        if overhead + total_bytes > count * buffer_size {
            count += 1;
            continue;
        }

        match slice_message(message, &headers, buffer_size - sentinels) {
            Some(slices) => {
                let blocks = headers
                    .iter()
                    .zip(slices)
                    .map(|(header, slice)| {
                        let mut block =
                            String::with_capacity(sentinels + header.len() + slice.len());
                        block.push_str(BLOCK_PREFIX);
                        block.push_str(header);
                        block.push_str(slice);
                        block.push_str(BLOCK_SUFFIX);
                        block
                    })
                    .collect();
                return Ok(EncodedMessage {
                    total_chars: message.chars().count(),
                    total_bytes,
                    blocks,
                });
            }
            // Snapping to scalar boundaries left bytes over; one more block.
            None => count += 1,
        }
    }
}

/// Encode a raw byte message, rejecting anything that is not UTF-8.
pub fn encode_bytes(
    message: &[u8],
    sender_uid: Option<&str>,
    buffer_size: usize,
) -> Result<EncodedMessage, CodecError> {
    let text = std::str::from_utf8(message).map_err(|_| CodecError::EncodeType)?;
    encode(text, sender_uid, buffer_size)
}

/// Split the message into one slice per header, or `None` if it does not fit.
fn slice_message<'a>(message: &'a str, headers: &[String], room: usize) -> Option<Vec<&'a str>> {
    let mut slices = Vec::with_capacity(headers.len());
    let mut start = 0;
    for header in headers {
        let mut end = (start + room - header.len()).min(message.len());
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        slices.push(&message[start..end]);
        start = end;
    }
    (start == message.len()).then_some(slices)
}

fn format_header(index: usize, count: usize, uid: &str, total_bytes: usize) -> String {
    format!("|{index}/{count}|{uid}|{total_bytes}|")
}

/// Parse the inside of a block (between the sentinels) into header + payload.
pub fn parse_block(inner: &str) -> Result<(BlockHeader, &str), CodecError> {
    let body = inner
        .strip_prefix('|')
        .ok_or_else(|| CodecError::InvalidBlock("header must start with '|'".to_string()))?;

    let mut parts = body.splitn(4, '|');
    let (Some(position), Some(uid), Some(len), Some(payload)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CodecError::InvalidBlock(format!(
            "header has too few fields: {}",
            truncate(inner)
        )));
    };

    let (index, count) = position
        .split_once('/')
        .ok_or_else(|| CodecError::InvalidBlock(format!("bad block position: {position}")))?;
    let index = parse_positive(index, "block index")?;
    let count = parse_positive(count, "block count")?;
    if index > count {
        return Err(CodecError::InvalidBlock(format!(
            "block index {index} exceeds count {count}"
        )));
    }
    // A zero-length message still travels as one block.
    let total_bytes = len.parse::<usize>().map_err(|_| {
        CodecError::InvalidBlock(format!("bad message length: {len}"))
    })?;

    if uid.is_empty() || !uid.is_ascii() {
        return Err(CodecError::InvalidBlock(format!("bad sender uid: {uid}")));
    }
    let sender_uid = (uid != NULL_UID).then(|| uid.to_string());

    Ok((
        BlockHeader {
            index,
            count,
            sender_uid,
            total_bytes,
        },
        payload,
    ))
}

fn parse_positive(raw: &str, what: &str) -> Result<usize, CodecError> {
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 && raw.bytes().all(|b| b.is_ascii_digit()) => Ok(n),
        _ => Err(CodecError::InvalidBlock(format!("bad {what}: {raw}"))),
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(40) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
