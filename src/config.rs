//! Configuration loading.
//!
//! The endpoint address comes from, in increasing priority:
//!
//! 1. built-in defaults (`localhost:10000`)
//! 2. the optional address file, a flat `host=...&port=...` string
//! 3. `BLOCKNET_HOST` / `BLOCKNET_PORT` environment variables
//! 4. command-line flags (applied by the binary)
//!
//! The reliability policy lives in [`NetConfig`], whose defaults are the
//! values in [`crate::constants`].

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::constants::{
    ACCEPT_POOL_SIZE, ACK_TIMEOUT, BUFFER_SIZE, CONNECTION_MAX_COUNT, DEDUP_CAPACITY,
    DEFAULT_HOST, DEFAULT_PORT, INACTIVE_COUNT, QUEUE_CAPACITY, READ_INFOS_SEND_FACTOR,
    RECONNECTION_DELAY, RECONNECTION_TIMEOUT, RESEND_DELAY, SELECT_TIMEOUT, SEND_MAX_COUNT,
};

/// Environment variable overriding the host.
pub const HOST_ENV: &str = "BLOCKNET_HOST";

/// Environment variable overriding the port.
pub const PORT_ENV: &str = "BLOCKNET_PORT";

/// Reliability and sizing policy shared by the client and the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    /// Maximum serialized block size.
    pub buffer_size: usize,
    /// Maximum network attempts per send.
    pub send_max_count: u32,
    /// Multiplier applied to `send_max_count` for `SET_CLIENT_READ_INFOS`.
    pub read_infos_send_factor: u32,
    /// Maximum attempts per connect or bind.
    pub connection_max_count: u32,
    /// Delay between connect attempts.
    pub reconnection_delay: Duration,
    /// Socket timeout towards uncertain peers.
    pub reconnection_timeout: Duration,
    /// Delay between send attempts.
    pub resend_delay: Duration,
    /// Poll granularity of listener loops.
    pub select_timeout: Duration,
    /// Failure streak after which a peer is considered wild-disconnected.
    pub inactive_count: u32,
    /// Time allowed for an ack from a certain peer.
    pub ack_timeout: Duration,
    /// Concurrent inbound sockets handled by the server.
    pub accept_pool_size: usize,
    /// MSGUIDs remembered for deduplication.
    pub dedup_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            send_max_count: SEND_MAX_COUNT,
            read_infos_send_factor: READ_INFOS_SEND_FACTOR,
            connection_max_count: CONNECTION_MAX_COUNT,
            reconnection_delay: RECONNECTION_DELAY,
            reconnection_timeout: RECONNECTION_TIMEOUT,
            resend_delay: RESEND_DELAY,
            select_timeout: SELECT_TIMEOUT,
            inactive_count: INACTIVE_COUNT,
            ack_timeout: ACK_TIMEOUT,
            accept_pool_size: ACCEPT_POOL_SIZE,
            dedup_capacity: DEDUP_CAPACITY,
        }
    }
}

impl NetConfig {
    /// Retry bound for `SET_CLIENT_READ_INFOS`.
    pub fn read_infos_send_max(&self) -> u32 {
        self.send_max_count.saturating_mul(self.read_infos_send_factor)
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server host (listen host for the server, target for the client).
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Reliability policy.
    pub net: NetConfig,
    /// Capacity of each bus queue.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            net: NetConfig::default(),
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Load the configuration, then apply environment overrides.
    ///
    /// A missing or malformed address file falls back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(path)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("[Config] {} not found, using defaults", path.display());
                return Ok(());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        match parse_address_config(&content) {
            Some((host, port)) => {
                self.host = host;
                self.port = port;
            }
            None => log::warn!(
                "[Config] {} is malformed, using {}:{}",
                path.display(),
                self.host,
                self.port
            ),
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }
        if let Some(raw) = lookup(PORT_ENV) {
            match parse_port(&raw) {
                Some(port) => self.port = port,
                None => log::warn!("[Config] ignoring invalid {PORT_ENV}={raw}"),
            }
        }
    }

    /// Override the address with explicit values (command-line flags).
    pub fn with_address(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}

/// Parse a `host=...&port=...` address string.
///
/// Both keys are required; unknown keys are ignored. Returns `None` when the
/// string is malformed or the port is outside `1..=65535`.
pub fn parse_address_config(raw: &str) -> Option<(String, u16)> {
    let mut host = None;
    let mut port = None;
    for pair in raw.trim().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=')?;
        match key.trim() {
            "host" => host = Some(value.trim().to_string()),
            "port" => port = Some(parse_port(value)?),
            _ => {}
        }
    }
    Some((host?, port?))
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|p| *p >= 1)
}
