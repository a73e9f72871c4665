//! Socket primitives shared by the client endpoint and the server container.
//!
//! Every exchange uses a fresh TCP connection:
//!
//! ```text
//! connect (≤ connection_max_count tries, SO_REUSEADDR)
//!    │
//!    ├─ write block 1..n sequentially
//!    │
//!    └─ read one request back (ack or reply), bounded by a timeout
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};

use crate::classify;
use crate::codec::{encode, CodecError, DecodedRequest, EncodedMessage, RequestDecoder};
use crate::config::NetConfig;
use crate::constants::DISCOVERY_PROBE_ADDR;

use super::error::{NetError, NetResult};

/// Whether `host` designates this machine.
pub fn is_local_host(host: &str) -> bool {
    match host {
        "" | "localhost" => true,
        other => other.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback()),
    }
}

/// Resolve `host:port`, mapping the empty host to the loopback address.
pub async fn resolve(host: &str, port: u16) -> NetResult<SocketAddr> {
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    // Prefer IPv4 so "localhost" matches listeners bound on 0.0.0.0.
    let all: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    all.iter()
        .find(|a| a.is_ipv4())
        .or_else(|| all.first())
        .copied()
        .ok_or_else(|| {
            NetError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {host}"),
            ))
        })
}

/// Local interface IP used to advertise a reverse address.
///
/// Connecting a UDP socket sends no traffic; it only selects the outgoing
/// interface. Falls back to `127.0.0.1` on any failure.
pub async fn local_ip() -> IpAddr {
    let probe = async {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(DISCOVERY_PROBE_ADDR).await?;
        socket.local_addr()
    };
    match probe.await {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            log::debug!("[Net] local ip discovery failed: {e}");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Open one connection with `SO_REUSEADDR`, bounded by `limit` if set.
pub async fn connect(addr: SocketAddr, limit: Option<Duration>) -> NetResult<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    let stream = match limit {
        Some(limit) => tokio::time::timeout(limit, socket.connect(addr)).await??,
        None => socket.connect(addr).await?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Outcome of [`connect_with_retry`].
#[derive(Debug)]
pub struct Connected {
    /// The open stream.
    pub stream: TcpStream,
    /// Attempts it took, first try included.
    pub attempts: u32,
}

/// Connect to `addr`, retrying transient failures.
///
/// Makes at most `connection_max_count` attempts spaced by
/// `reconnection_delay`. A fatal classification aborts immediately.
pub async fn connect_with_retry(
    addr: SocketAddr,
    cfg: &NetConfig,
    limit: Option<Duration>,
) -> NetResult<Connected> {
    let max = cfg.connection_max_count.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect(addr, limit).await {
            Ok(stream) => {
                return Ok(Connected {
                    stream,
                    attempts: attempt,
                })
            }
            Err(e) => {
                let class = classify::classify(&e);
                if class.fatal || attempt >= max {
                    log::debug!(
                        "[Net] connect to {addr} failed after {attempt} attempt(s) ({} {}): {e}",
                        class.kind,
                        class.name.unwrap_or("-")
                    );
                    return Err(e);
                }
                log::trace!("[Net] connect to {addr} attempt {attempt} failed: {e}");
                tokio::time::sleep(cfg.reconnection_delay).await;
            }
        }
    }
}

/// Write every block of `encoded` on `stream`, in order.
pub async fn write_blocks(stream: &mut TcpStream, encoded: &EncodedMessage) -> NetResult<()> {
    for block in &encoded.blocks {
        stream.write_all(block.as_bytes()).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Encode `message` and write it on `stream`.
pub async fn write_message(
    stream: &mut TcpStream,
    message: &str,
    sender_uid: Option<&str>,
    buffer_size: usize,
) -> NetResult<usize> {
    let encoded = encode(message, sender_uid, buffer_size)?;
    write_blocks(stream, &encoded).await?;
    Ok(encoded.total_chars)
}

/// Read one complete request from `stream`.
///
/// Reads at most `buffer_size` bytes at a time. The peer closing the
/// connection before the last block is an [`CodecError::IncompleteRequest`].
pub async fn read_request(stream: &mut TcpStream, buffer_size: usize) -> NetResult<DecodedRequest> {
    let mut decoder = RequestDecoder::new(buffer_size);
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(CodecError::IncompleteRequest {
                received: decoder.received(),
                expected: 0,
            }
            .into());
        }
        decoder.feed(&buf[..n])?;
        if decoder.is_complete() {
            return Ok(decoder.finish()?);
        }
    }
}

/// [`read_request`] bounded by `limit`.
pub async fn read_request_within(
    stream: &mut TcpStream,
    buffer_size: usize,
    limit: Duration,
) -> NetResult<DecodedRequest> {
    tokio::time::timeout(limit, read_request(stream, buffer_size)).await?
}
