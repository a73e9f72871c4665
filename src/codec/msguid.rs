//! Per-message unique identifiers.
//!
//! A MSGUID tag `<MSGUID=id>` is appended to a message before it is sent.
//! The id is `<uid>_<n>` where `n` comes from a process-wide counter seeded
//! randomly at startup, or `CRH_AUTOADD_<n>` when the tagging endpoint has
//! no UID yet. Receivers use the id to deduplicate retransmissions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use crate::constants::MSGUID_AUTO_PREFIX;

const TAG_OPEN: &str = "<MSGUID=";
const TAG_CLOSE: char = '>';

/// Process-wide MSGUID counter.
///
/// Seeded in the lower half of the `u32` range so the suffix stays short
/// while still differing between process restarts.
static MSGUID_INCREMENT: LazyLock<AtomicU64> =
    LazyLock::new(|| AtomicU64::new(u64::from(rand::random::<u32>() >> 1)));

/// Generate the next MSGUID for an endpoint.
pub fn next_msguid(uid: Option<&str>) -> String {
    let n = MSGUID_INCREMENT.fetch_add(1, Ordering::Relaxed);
    match uid {
        Some(uid) if !uid.is_empty() => format!("{uid}_{n}"),
        _ => format!("{MSGUID_AUTO_PREFIX}_{n}"),
    }
}

/// Append a fresh MSGUID tag to `message`.
///
/// Messages that already carry a tag are returned unchanged.
pub fn mark_msg_as_unique(message: &str, uid: Option<&str>) -> String {
    if find_tag(message).is_some() {
        return message.to_string();
    }
    format!("{message}{TAG_OPEN}{}{TAG_CLOSE}", next_msguid(uid))
}

/// Extract the MSGUID from a message, if tagged.
pub fn extract_msguid(message: &str) -> Option<&str> {
    find_tag(message).map(|(start, end)| &message[start + TAG_OPEN.len()..end - 1])
}

/// Split a message into its untagged text and its MSGUID.
pub fn strip_msguid(message: &str) -> (String, Option<String>) {
    match find_tag(message) {
        Some((start, end)) => {
            let id = message[start + TAG_OPEN.len()..end - 1].to_string();
            let mut text = String::with_capacity(message.len() - (end - start));
            text.push_str(&message[..start]);
            text.push_str(&message[end..]);
            (text, Some(id))
        }
        None => (message.to_string(), None),
    }
}

/// Byte range `[start, end)` of the last well-formed tag.
fn find_tag(message: &str) -> Option<(usize, usize)> {
    let mut search_end = message.len();
    while let Some(start) = message[..search_end].rfind(TAG_OPEN) {
        let id_start = start + TAG_OPEN.len();
        if let Some(rel_close) = message[id_start..].find(TAG_CLOSE) {
            let id = &message[id_start..id_start + rel_close];
            if !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                return Some((start, id_start + rel_close + 1));
            }
        }
        search_end = start;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msguid_uses_uid_prefix() {
        let id = next_msguid(Some("uid3"));
        assert!(id.starts_with("uid3_"), "got {id}");
        let id = next_msguid(None);
        assert!(id.starts_with("CRH_AUTOADD_"), "got {id}");
    }

    #[test]
    fn test_msguids_increase() {
        let a = next_msguid(None);
        let b = next_msguid(None);
        let parse = |s: &str| s.rsplit('_').next().unwrap().parse::<u64>().unwrap();
        assert!(parse(&b) > parse(&a));
    }

    #[test]
    fn test_mark_is_idempotent() {
        let once = mark_msg_as_unique("hello", Some("uid0"));
        let twice = mark_msg_as_unique(&once, Some("uid0"));
        assert_eq!(once, twice);
        assert!(once.starts_with("hello<MSGUID=uid0_"));
        assert!(once.ends_with('>'));
    }

    #[test]
    fn test_extract_and_strip() {
        let tagged = "[cmd:PING|]<MSGUID=gen_svr_id_42>";
        assert_eq!(extract_msguid(tagged), Some("gen_svr_id_42"));
        let (text, id) = strip_msguid(tagged);
        assert_eq!(text, "[cmd:PING|]");
        assert_eq!(id.as_deref(), Some("gen_svr_id_42"));
    }

    #[test]
    fn test_malformed_tags_are_ignored() {
        assert_eq!(extract_msguid("<MSGUID=>"), None);
        assert_eq!(extract_msguid("<MSGUID=a b>"), None);
        assert_eq!(extract_msguid("<MSGUID=abc"), None);
        let (text, id) = strip_msguid("plain");
        assert_eq!(text, "plain");
        assert!(id.is_none());
    }
}
