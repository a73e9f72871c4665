//! Typed envelopes exchanged between satellites.
//!
//! An envelope is a `kind`, an optional destination channel, the channel it
//! came from (stamped by the bus), and a flat JSON object of arguments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A satellite slot on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Network endpoint (client or server).
    Network,
    /// Application logic.
    Business,
    /// User-facing surface.
    Interface,
}

impl Channel {
    /// Every channel, in switchboard polling order.
    pub const ALL: [Channel; 3] = [Channel::Network, Channel::Business, Channel::Interface];

    /// Lowercase channel name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Business => "business",
            Self::Interface => "interface",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "business" => Ok(Self::Business),
            "interface" => Ok(Self::Interface),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

macro_rules! kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Envelope kind.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum Kind {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl Kind {
            /// Wire-style name of the kind.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for Kind {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!("unknown envelope kind: {other}")),
                }
            }
        }
    };
}

kinds! {
    // Network
    Send => "SEND",
    Receive => "RECEIVE",
    SetAddress => "SET_ADDRESS",
    Connect => "CONNECT",
    Disconnect => "DISCONNECT",
    NetShutdown => "NET_SHUTDOWN",
    CheckConn => "CHECK_CONN",
    SetNetInfo => "SET_NET_INFO",
    GetNetInfo => "GET_NET_INFO",
    NetError => "NET_ERROR",
    NetStatus => "NET_STATUS",
    SendError => "SEND_ERROR",
    // Interface
    GuiReady => "GUI_READY",
    AskUserChoice => "ASK_USER_CHOICE",
    ReturnUserChoice => "RETURN_USER_CHOICE",
    ShowContent => "SHOW_CONTENT",
    SendUserCommand => "SEND_USER_COMMAND",
    SetGuiInfo => "SET_GUI_INFO",
    GetGuiInfo => "GET_GUI_INFO",
    SetBusInfo => "SET_BUS_INFO",
    GetBusInfo => "GET_BUS_INFO",
    // Lifecycle
    Shutdown => "SHUTDOWN",
    CloseApp => "CLOSE_APP",
    GetSatInfo => "GET_SAT_INFO",
    SetSatInfo => "SET_SAT_INFO",
    GetAppInfo => "GET_APP_INFO",
    SetAppInfo => "SET_APP_INFO",
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message routed by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What the envelope asks for or reports.
    pub kind: Kind,
    /// Explicit destination, for kinds routed to a named channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Channel>,
    /// Emitting channel. Set by the bus when the envelope is posted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Channel>,
    /// Named arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Envelope {
    /// Envelope of `kind` with no arguments.
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            target: None,
            source: None,
            args: Map::new(),
        }
    }

    /// Address the envelope to `channel`.
    #[must_use]
    pub fn to(mut self, channel: Channel) -> Self {
        self.target = Some(channel);
        self
    }

    /// Add the argument `key`.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// Argument `key`, if present.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// String argument `key`.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Boolean argument `key`.
    pub fn bool_arg(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(Value::as_bool)
    }

    /// Unsigned integer argument `key`; numeric strings are accepted.
    pub fn u64_arg(&self, key: &str) -> Option<u64> {
        match self.args.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// List of strings under `key`.
    ///
    /// Accepts a JSON array of strings or a single comma separated string.
    pub fn str_list_arg(&self, key: &str) -> Option<Vec<String>> {
        match self.args.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(source) = self.source {
            write!(f, " from {source}")?;
        }
        if let Some(target) = self.target {
            write!(f, " to {target}")?;
        }
        Ok(())
    }
}
