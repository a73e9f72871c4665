//! Command envelopes prepended to messages.
//!
//! A message may start with a single command envelope:
//!
//! ```text
//! [cmd:CODE|k1=v1&k2=v2&]tail
//! ```
//!
//! Codes and keys use `[A-Za-z0-9_]`, values additionally allow `.`. Every
//! argument is written with a trailing `&`, and the parser accepts the
//! separator with or without it. Strings that do not match the grammar are
//! treated as plain messages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opening of a command envelope.
const CMD_OPEN: &str = "[cmd:";

/// Parsed command arguments, ordered by key.
pub type CommandArgs = BTreeMap<String, String>;

/// Closed vocabulary of command codes understood by both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Client asks the server to mint a UID.
    AskForUid,
    /// Client advertises its reverse listen address (`host`, `port`).
    SetClientReadInfos,
    /// Ack reply; the tail is the character count of the acked message.
    ConfirmReception,
    /// Plain message that requires an ack.
    NeedConfirmation,
    /// Liveness probe that requires an ack.
    Ping,
    /// Server announces it is accepting again.
    ServerConnected,
    /// Server announces it stopped accepting.
    ServerDisconnected,
    /// Server announces it is going away.
    ServerShutdown,
    /// Client announces it is reachable again.
    ClientConnected,
    /// Client announces it stopped listening.
    ClientDisconnected,
    /// Client announces it is going away.
    ClientShutdown,
    /// Server refuses the request (unknown UID or closed registrations).
    ConnectionRefused,
}

impl CommandCode {
    /// All codes, in declaration order.
    pub const ALL: [CommandCode; 12] = [
        CommandCode::AskForUid,
        CommandCode::SetClientReadInfos,
        CommandCode::ConfirmReception,
        CommandCode::NeedConfirmation,
        CommandCode::Ping,
        CommandCode::ServerConnected,
        CommandCode::ServerDisconnected,
        CommandCode::ServerShutdown,
        CommandCode::ClientConnected,
        CommandCode::ClientDisconnected,
        CommandCode::ClientShutdown,
        CommandCode::ConnectionRefused,
    ];

    /// Wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandCode::AskForUid => "ASK_FOR_UID",
            CommandCode::SetClientReadInfos => "SET_CLIENT_READ_INFOS",
            CommandCode::ConfirmReception => "CONFIRM_RECEPTION",
            CommandCode::NeedConfirmation => "NEED_CONFIRMATION",
            CommandCode::Ping => "PING",
            CommandCode::ServerConnected => "SERVER_CONNECTED",
            CommandCode::ServerDisconnected => "SERVER_DISCONNECTED",
            CommandCode::ServerShutdown => "SERVER_SHUTDOWN",
            CommandCode::ClientConnected => "CLIENT_CONNECTED",
            CommandCode::ClientDisconnected => "CLIENT_DISCONNECTED",
            CommandCode::ClientShutdown => "CLIENT_SHUTDOWN",
            CommandCode::ConnectionRefused => "CONNECTION_REFUSED",
        }
    }

    /// Codes the server acknowledges when it receives them.
    pub fn server_acks(self) -> bool {
        matches!(
            self,
            CommandCode::NeedConfirmation
                | CommandCode::SetClientReadInfos
                | CommandCode::ClientConnected
                | CommandCode::ClientDisconnected
                | CommandCode::ClientShutdown
        )
    }

    /// Codes the client acknowledges when the server pushes them.
    pub fn client_acks(self) -> bool {
        matches!(
            self,
            CommandCode::NeedConfirmation
                | CommandCode::ServerConnected
                | CommandCode::ServerDisconnected
                | CommandCode::ServerShutdown
                | CommandCode::Ping
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown command code: {s}"))
    }
}

/// A parsed command envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Raw code as written on the wire.
    pub code: String,
    /// Arguments in key order.
    pub args: CommandArgs,
}

impl Command {
    /// The code, if it belongs to the known vocabulary.
    pub fn known_code(&self) -> Option<CommandCode> {
        self.code.parse().ok()
    }
}

/// Build the `[cmd:CODE|k=v&...]` envelope for `code` and `args`.
pub fn format_cmd<'a, I>(code: CommandCode, args: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::from(CMD_OPEN);
    out.push_str(code.as_str());
    out.push('|');
    for (key, value) in args {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('&');
    }
    out.push(']');
    out
}

/// Prefix `message` with a command envelope.
pub fn add_cmd<'a, I>(code: CommandCode, args: I, message: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = format_cmd(code, args);
    out.push_str(message);
    out
}

/// Split a leading command envelope from the rest of the message.
///
/// Returns `(Some(command), tail)` when `message` starts with a valid
/// envelope, `(None, message)` otherwise.
pub fn split_cmd_and_msg(message: &str) -> (Option<Command>, &str) {
    match parse_envelope(message) {
        Some((command, consumed)) => (Some(command), &message[consumed..]),
        None => (None, message),
    }
}

/// The known code of the leading envelope, if any.
pub fn leading_code(message: &str) -> Option<CommandCode> {
    split_cmd_and_msg(message).0.and_then(|cmd| cmd.known_code())
}

fn parse_envelope(message: &str) -> Option<(Command, usize)> {
    let rest = message.strip_prefix(CMD_OPEN)?;
    let bar = rest.find('|')?;
    let code = &rest[..bar];
    if code.is_empty() || !code.bytes().all(is_word_byte) {
        return None;
    }

    let after_bar = &rest[bar + 1..];
    let close = after_bar.find(']')?;
    let args = parse_args(&after_bar[..close])?;

    let consumed = CMD_OPEN.len() + bar + 1 + close + 1;
    Some((
        Command {
            code: code.to_string(),
            args,
        },
        consumed,
    ))
}

fn parse_args(raw: &str) -> Option<CommandArgs> {
    let mut args = CommandArgs::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=')?;
        let key_ok = !key.is_empty() && key.bytes().all(is_word_byte);
        let value_ok = !value.is_empty() && value.bytes().all(|b| is_word_byte(b) || b == b'.');
        if !key_ok || !value_ok {
            return None;
        }
        args.insert(key.to_string(), value.to_string());
    }
    // Reject separators that do not follow a pair, e.g. `[cmd:X|&]`.
    if raw.starts_with('&') || raw.contains("&&") {
        return None;
    }
    Some(args)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
