//! Wire codec: block framing, command envelopes and MSGUID tags.
//!
//! ```text
//! message ──► [cmd:CODE|k=v&]tail<MSGUID=id> ──► encode ──► <#bp#>|i/n|uid|L|slice<#bs#> ...
//!                                                                    │
//!    DecodedRequest ◄── finish ◄── RequestDecoder::feed ◄────────────┘
//! ```

pub mod block;
pub mod command;
pub mod decoder;
pub mod error;
pub mod msguid;

pub use block::{encode, encode_bytes, parse_block, BlockHeader, EncodedMessage};
pub use command::{add_cmd, format_cmd, leading_code, split_cmd_and_msg, Command, CommandArgs, CommandCode};
pub use decoder::{decode_buffers, DecodedRequest, RequestDecoder};
pub use error::CodecError;
pub use msguid::{extract_msguid, mark_msg_as_unique, next_msguid, strip_msguid};
