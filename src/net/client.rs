//! Client endpoint.
//!
//! A client talks to the server over two kinds of sockets:
//!
//! ```text
//!            write socket (fresh per send)
//!   Client ─────────────────────────────────────────► Server
//!     ▲      blocks ──►            ◄── ack / uid reply
//!     │
//!     │      read socket (long-lived listener)
//!     └───────────────────────────────────────────── Server pushes
//!            blocks ──►            ◄── ack
//! ```
//!
//! `connect` acquires a UID with `ASK_FOR_UID`, binds the read listener and
//! advertises it with `SET_CLIENT_READ_INFOS`. Every later `send` opens a
//! new write socket, retries transient failures, and checks the ack.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::classify;
use crate::codec::{
    add_cmd, encode, format_cmd, mark_msg_as_unique, split_cmd_and_msg, CommandCode,
    DecodedRequest, EncodedMessage,
};
use crate::config::NetConfig;
use crate::constants::{FAILED_ACK_BODY, LOCAL_PORT_SLICE, REMOTE_PORT_RANGE};

use super::error::{NetError, NetResult, ProtocolError};
use super::events::{emit, NetEvent, NetEventSender, NetInfo};
use super::reliability::{evaluate_peer_status, max_attempts, retry, DedupCache};
use super::status::{ClientNetInfo, ConnectionStatus, NetCounters};
use super::transport::{
    connect, connect_with_retry, is_local_host, local_ip, read_request_within, resolve, write_blocks,
    write_message,
};

/// Backlog of the reverse-channel listener.
const LISTEN_BACKLOG: u32 = 5;

#[derive(Debug)]
struct ClientState {
    host: String,
    port: u16,
    uid: Option<String>,
    read_host: Option<String>,
    read_port: Option<u16>,
    status: ConnectionStatus,
    server_status: ConnectionStatus,
    last_connect_error: Option<String>,
    last_send_error: Option<String>,
    last_receive_error: Option<String>,
    counters: NetCounters,
}

impl ClientState {
    fn snapshot(&self) -> ClientNetInfo {
        ClientNetInfo {
            uid: self.uid.clone(),
            host: self.host.clone(),
            port: self.port,
            read_host: self.read_host.clone(),
            read_port: self.read_port,
            status: self.status,
            server_status: self.server_status,
            last_connect_error: self.last_connect_error.clone(),
            last_send_error: self.last_send_error.clone(),
            last_receive_error: self.last_receive_error.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Re-run the wild-disconnect heuristic on the server status.
    fn refresh_server_status(&mut self, inactive_count: u32) {
        let failing = self.last_send_error.is_some() || self.last_connect_error.is_some();
        self.server_status =
            evaluate_peer_status(self.server_status, &self.counters, failing, inactive_count);
    }
}

/// State shared between the endpoint and its read loop.
#[derive(Debug)]
struct ClientShared {
    cfg: NetConfig,
    state: Mutex<ClientState>,
    dedup: DedupCache,
    events: NetEventSender,
}

impl ClientShared {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_info(&self) {
        let info = self.state().snapshot();
        emit(&self.events, NetEvent::Info(NetInfo::Client(info)));
    }

    fn publish_status(&self, peer: Option<&str>, status: ConnectionStatus, message: &str) {
        emit(
            &self.events,
            NetEvent::Status {
                peer: peer.map(str::to_string),
                status,
                message: message.to_string(),
            },
        );
    }

    fn publish_error(&self, status: ConnectionStatus, message: String) {
        emit(
            &self.events,
            NetEvent::Error {
                peer: None,
                status,
                message,
            },
        );
    }
}

#[derive(Debug)]
struct ReadLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client side of the protocol.
#[derive(Debug)]
pub struct ClientEndpoint {
    shared: Arc<ClientShared>,
    read_loop: Option<ReadLoop>,
}

/// Options of a single send.
#[derive(Debug, Clone, Copy)]
struct SendPlan {
    expect_ack: bool,
    max_attempts: u32,
    uncertain: bool,
}

impl ClientEndpoint {
    /// Create a disconnected client targeting `host:port`.
    pub fn new(cfg: NetConfig, host: impl Into<String>, port: u16, events: NetEventSender) -> Self {
        let dedup = DedupCache::new(cfg.dedup_capacity);
        Self {
            shared: Arc::new(ClientShared {
                cfg,
                state: Mutex::new(ClientState {
                    host: host.into(),
                    port,
                    uid: None,
                    read_host: None,
                    read_port: None,
                    status: ConnectionStatus::Disconnected,
                    server_status: ConnectionStatus::Undefined,
                    last_connect_error: None,
                    last_send_error: None,
                    last_receive_error: None,
                    counters: NetCounters::default(),
                }),
                dedup,
                events,
            }),
            read_loop: None,
        }
    }

    /// UID assigned by the server.
    pub fn uid(&self) -> Option<String> {
        self.shared.state().uid.clone()
    }

    /// Status of the client.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state().status
    }

    /// Inferred status of the server.
    pub fn server_status(&self) -> ConnectionStatus {
        self.shared.state().server_status
    }

    /// Snapshot of the endpoint.
    pub fn info(&self) -> ClientNetInfo {
        self.shared.state().snapshot()
    }

    /// Emit a `SET_NET_INFO` snapshot.
    pub fn publish_info(&self) {
        self.shared.publish_info();
    }

    /// Bound reverse-channel port, once connected.
    pub fn read_port(&self) -> Option<u16> {
        self.shared.state().read_port
    }

    fn read_loop_running(&self) -> bool {
        self.read_loop
            .as_ref()
            .is_some_and(|l| !l.token.is_cancelled() && !l.handle.is_finished())
    }

    /// Change the server address used by the next `connect`.
    pub fn set_address(&mut self, host: Option<String>, port: Option<u16>) {
        let mut state = self.shared.state();
        if let Some(host) = host {
            state.host = host;
        }
        if let Some(port) = port {
            state.port = port;
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect to the server, acquire a UID and publish the read address.
    ///
    /// Connecting an already connected client is a no-op.
    pub async fn connect(&mut self, host: Option<String>, port: Option<u16>) -> NetResult<()> {
        if self.status() == ConnectionStatus::Connected && self.read_loop_running() {
            log::debug!("[Client] connect ignored, already connected");
            return Ok(());
        }
        if self.status() == ConnectionStatus::Rejected {
            return Err(NetError::Protocol(ProtocolError::Refused));
        }
        self.set_address(host, port);

        let had_uid = self.uid().is_some();
        let mut result = self.establish().await;
        if had_uid && matches!(result, Err(NetError::Protocol(ProtocolError::Refused))) {
            // The server lost its records (restart without SERVER_SHUTDOWN).
            log::info!("[Client] server does not know our uid, registering again");
            self.stop_read_loop().await;
            self.forget_registration();
            result = self.establish().await;
        }
        if let Err(e) = &result {
            self.stop_read_loop().await;
            let mut state = self.shared.state();
            if state.status != ConnectionStatus::Rejected {
                state.status = if classify::is_fatal(e) {
                    ConnectionStatus::ErrorConnection
                } else {
                    ConnectionStatus::Disconnected
                };
            }
            let status = state.status;
            drop(state);
            log::warn!("[Client] connect failed: {e}");
            self.shared.publish_error(status, format!("connect failed: {e}"));
            self.shared.publish_status(None, status, &e.to_string());
        }
        self.shared.publish_info();
        result
    }

    /// Drop the UID and the MSGUIDs seen from the previous server.
    fn forget_registration(&self) {
        {
            let mut state = self.shared.state();
            state.uid = None;
            state.status = ConnectionStatus::Disconnected;
            state.server_status = ConnectionStatus::Connected;
            state.counters.send_errors = 0;
        }
        self.shared.dedup.clear();
    }

    async fn establish(&mut self) -> NetResult<()> {
        let (host, port) = {
            let state = self.shared.state();
            (state.host.clone(), state.port)
        };

        if self.uid().is_none() {
            let uid = self.ask_for_uid(&host, port).await?;
            log::info!("[Client] assigned uid {uid}");
            self.shared.state().uid = Some(uid);
        }

        let (read_host, listener) = self.bind_read_socket(&host, port).await?;
        let read_port = listener.local_addr()?.port();
        {
            let mut state = self.shared.state();
            state.read_host = Some(read_host.clone());
            state.read_port = Some(read_port);
        }
        self.start_read_loop(listener);

        let read_port_str = read_port.to_string();
        let mut args: Vec<(&str, &str)> = Vec::with_capacity(2);
        if !read_host.is_empty() {
            args.push(("host", read_host.as_str()));
        }
        args.push(("port", read_port_str.as_str()));
        let infos = format_cmd(CommandCode::SetClientReadInfos, args);
        self.send_inner(&infos, true).await?;

        {
            let mut state = self.shared.state();
            state.status = ConnectionStatus::Connected;
            state.server_status = ConnectionStatus::Connected;
        }
        log::info!("[Client] connected to {host}:{port}, reading on port {read_port}");
        self.shared
            .publish_status(None, ConnectionStatus::Connected, "connected");
        Ok(())
    }

    /// Open the write socket and ask the server for a UID on it.
    async fn ask_for_uid(&self, host: &str, port: u16) -> NetResult<String> {
        let cfg = &self.shared.cfg;
        let addr = resolve(host, port).await?;
        let connected = connect_with_retry(addr, cfg, None).await;
        let mut stream = match connected {
            Ok(c) => {
                self.shared.state().counters.record_connect(true);
                c.stream
            }
            Err(e) => {
                let mut state = self.shared.state();
                state.counters.record_connect(false);
                state.last_connect_error = Some(e.to_string());
                return Err(e);
            }
        };
        {
            let mut state = self.shared.state();
            state.last_connect_error = None;
            state.status = ConnectionStatus::Connected;
        }

        let ask = format_cmd(CommandCode::AskForUid, []);
        write_message(&mut stream, &ask, None, cfg.buffer_size).await?;
        let reply = read_request_within(&mut stream, cfg.buffer_size, cfg.ack_timeout).await?;

        if reply.command() == Some(CommandCode::ConnectionRefused) {
            self.shared.state().status = ConnectionStatus::Rejected;
            log::warn!("[Client] server refused the connection");
            self.shared
                .publish_status(None, ConnectionStatus::Rejected, "connection refused");
            return Err(NetError::Protocol(ProtocolError::Refused));
        }

        let uid = reply.message.trim();
        let valid = !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if reply.code.is_some() || !valid {
            return Err(NetError::Protocol(ProtocolError::UnexpectedReply(reply.raw)));
        }
        Ok(uid.to_string())
    }

    /// Bind the reverse-channel listener and pick the advertised host.
    async fn bind_read_socket(&self, host: &str, port: u16) -> NetResult<(String, TcpListener)> {
        let uid = self.uid();
        let (read_host, first_port) = if is_local_host(host) {
            (String::new(), local_read_port(port, uid.as_deref()))
        } else {
            (
                local_ip().await.to_string(),
                rand::random_range(REMOTE_PORT_RANGE),
            )
        };

        let tries = self.shared.cfg.connection_max_count.max(1);
        let mut last_error = None;
        for offset in 0..tries {
            let Some(candidate) = first_port.checked_add(offset as u16) else {
                break;
            };
            match bind_listener(candidate) {
                Ok(listener) => return Ok((read_host, listener)),
                Err(e) => {
                    log::debug!("[Client] read port {candidate} unavailable: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map_or_else(
            || NetError::Lifecycle("no read port available".to_string()),
            std::convert::identity,
        ))
    }

    fn start_read_loop(&mut self, listener: TcpListener) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(read_loop(self.shared.clone(), listener, token.clone()));
        self.read_loop = Some(ReadLoop { token, handle });
    }

    async fn stop_read_loop(&mut self) {
        if let Some(ReadLoop { token, handle }) = self.read_loop.take() {
            token.cancel();
            if let Err(e) = handle.await {
                log::warn!("[Client] read loop ended abnormally: {e}");
            }
        }
    }

    /// Announce `CLIENT_DISCONNECTED` and stop listening.
    pub async fn disconnect(&mut self) -> NetResult<()> {
        self.leave(CommandCode::ClientDisconnected, ConnectionStatus::Disconnected)
            .await
    }

    /// Announce `CLIENT_SHUTDOWN` and stop listening for good.
    pub async fn shutdown(&mut self) -> NetResult<()> {
        self.leave(CommandCode::ClientShutdown, ConnectionStatus::Shutdown)
            .await
    }

    async fn leave(&mut self, code: CommandCode, target: ConnectionStatus) -> NetResult<()> {
        let (current, has_uid) = {
            let state = self.shared.state();
            (state.status, state.uid.is_some())
        };
        if current == target {
            log::debug!("[Client] already {target}");
            return Ok(());
        }

        let mut result = Ok(());
        if has_uid && current == ConnectionStatus::Connected {
            let announce = format_cmd(code, []);
            result = self.send_inner(&announce, true).await;
            if let Err(e) = &result {
                log::warn!("[Client] could not announce {code}: {e}");
            }
        }
        self.stop_read_loop().await;

        self.shared.state().status = target;
        log::info!("[Client] {target}");
        self.shared.publish_status(None, target, code.as_str());
        self.shared.publish_info();
        result
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send `msg` to the server.
    ///
    /// When `confirm` is set and `msg` carries no command code, it is
    /// wrapped in `NEED_CONFIRMATION`. Emits `SEND_ERROR` when every attempt
    /// failed.
    pub async fn send(&mut self, msg: &str, confirm: bool) -> NetResult<()> {
        let status = self.status();
        if matches!(
            status,
            ConnectionStatus::Shutdown | ConnectionStatus::Rejected
        ) {
            return Err(NetError::Lifecycle(format!("cannot send while {status}")));
        }
        self.send_inner(msg, confirm).await
    }

    /// Re-evaluate the server status and publish it.
    pub fn check_conn(&self) {
        let (status, server_status) = {
            let mut state = self.shared.state();
            state.refresh_server_status(self.shared.cfg.inactive_count);
            (state.status, state.server_status)
        };
        self.shared
            .publish_status(Some("server"), server_status, "server status refreshed");
        self.shared.publish_status(None, status, "client status");
        self.shared.publish_info();
    }

    async fn send_inner(&self, msg: &str, confirm: bool) -> NetResult<()> {
        let cfg = &self.shared.cfg;
        let (uid, host, port, uncertain) = {
            let state = self.shared.state();
            (
                state.uid.clone(),
                state.host.clone(),
                state.port,
                state.server_status == ConnectionStatus::Undefined
                    && state.counters.send_errors > 0,
            )
        };

        let tagged = mark_msg_as_unique(msg, uid.as_deref());
        let (command, _) = split_cmd_and_msg(&tagged);
        let body = match (&command, confirm) {
            (None, true) => add_cmd(CommandCode::NeedConfirmation, [], &tagged),
            _ => tagged.clone(),
        };
        let code = match command {
            Some(cmd) => cmd.known_code(),
            None if confirm => Some(CommandCode::NeedConfirmation),
            None => None,
        };

        let plan = SendPlan {
            expect_ack: code.is_some_and(CommandCode::server_acks),
            max_attempts: if uncertain { 1 } else { max_attempts(cfg, code) },
            uncertain,
        };

        let encoded = encode(&body, uid.as_deref(), cfg.buffer_size)?;
        let addr = resolve(&host, port).await?;

        let shared = &*self.shared;
        let encoded_ref = &encoded;
        let outcome = retry(plan.max_attempts, cfg.resend_delay, move |attempt| async move {
            log::trace!("[Client] send attempt {attempt}/{}", plan.max_attempts);
            attempt_send(shared, addr, encoded_ref, plan).await
        })
        .await;

        let ok = outcome.result.is_ok();
        let (status, server_status) = {
            let mut state = self.shared.state();
            state
                .counters
                .record_send(ok, outcome.attempts, plan.expect_ack);
            match &outcome.result {
                Ok(()) => {
                    state.last_send_error = None;
                    if !state.status.is_closed() && state.status != ConnectionStatus::Rejected {
                        state.status = ConnectionStatus::Connected;
                    }
                    if !state.server_status.is_closed() {
                        state.server_status = ConnectionStatus::Connected;
                    }
                }
                Err(e) => {
                    state.last_send_error = Some(e.to_string());
                    if classify::is_fatal(e) {
                        state.status = ConnectionStatus::ErrorConnection;
                        state.server_status = ConnectionStatus::ErrorConnection;
                    } else if matches!(e, NetError::Protocol(ProtocolError::Refused)) {
                        state.status = ConnectionStatus::Rejected;
                    } else {
                        state.refresh_server_status(cfg.inactive_count);
                    }
                }
            }
            (state.status, state.server_status)
        };

        if let Err(e) = &outcome.result {
            log::error!(
                "[Client] send failed after {} attempt(s): {e} (server {server_status})",
                outcome.attempts
            );
            self.shared
                .publish_error(status, format!("send failed: {e}"));
            emit(
                &self.shared.events,
                NetEvent::SendError {
                    msg: msg.to_string(),
                    confirm,
                    clients: Vec::new(),
                },
            );
        }
        self.shared.publish_info();
        outcome.result
    }
}

/// One network attempt: fresh socket, all blocks, then the ack if needed.
async fn attempt_send(
    shared: &ClientShared,
    addr: SocketAddr,
    encoded: &EncodedMessage,
    plan: SendPlan,
) -> NetResult<()> {
    let cfg = &shared.cfg;
    let limit = plan.uncertain.then_some(cfg.reconnection_timeout);
    let mut stream = match connect(addr, limit).await {
        Ok(stream) => {
            let mut state = shared.state();
            state.counters.record_connect(true);
            state.last_connect_error = None;
            stream
        }
        Err(e) => {
            let mut state = shared.state();
            state.counters.record_connect(false);
            state.last_connect_error = Some(e.to_string());
            return Err(e);
        }
    };

    write_blocks(&mut stream, encoded).await?;
    if !plan.expect_ack {
        return Ok(());
    }

    let wait = if plan.uncertain {
        cfg.reconnection_timeout
    } else {
        cfg.ack_timeout
    };
    let reply = read_request_within(&mut stream, cfg.buffer_size, wait).await?;
    check_ack(&reply, encoded.total_chars)
}

/// Verify that `reply` acks `expected_chars`.
pub(crate) fn check_ack(reply: &DecodedRequest, expected_chars: usize) -> NetResult<()> {
    match reply.command() {
        Some(CommandCode::ConfirmReception) if reply.is_ack_for(expected_chars) => Ok(()),
        Some(CommandCode::ConfirmReception) => Err(ProtocolError::AckMismatch {
            expected: expected_chars,
            got: reply.message.clone(),
        }
        .into()),
        Some(CommandCode::ConnectionRefused) => Err(ProtocolError::Refused.into()),
        _ => Err(ProtocolError::UnexpectedReply(reply.raw.clone()).into()),
    }
}

/// Reverse port of a local client: a 200-port slice per UID.
///
/// Falls back to a random port when the slice would overflow.
pub fn local_read_port(server_port: u16, uid: Option<&str>) -> u16 {
    let index = uid.map_or(0, uid_index);
    let port = u64::from(server_port) + u64::from(LOCAL_PORT_SLICE) * (index + 1);
    u16::try_from(port).unwrap_or_else(|_| rand::random_range(REMOTE_PORT_RANGE))
}

/// Numeric suffix of a UID (`uid12` → 12), 0 when absent.
fn uid_index(uid: &str) -> u64 {
    let digits: String = uid
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

fn bind_listener(port: u16) -> NetResult<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

// ============================================================================
// Read loop
// ============================================================================

/// Accept server pushes until cancelled.
async fn read_loop(shared: Arc<ClientShared>, listener: TcpListener, token: CancellationToken) {
    log::debug!("[Client] read loop started");
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::trace!("[Client] push from {peer}");
                    let shared = shared.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            () = token.cancelled() => {
                                log::debug!("[Client] push from {peer} dropped, read loop stopped");
                            }
                            () = handle_push(&shared, stream, &token) => {}
                        }
                    });
                }
                Err(e) => {
                    log::warn!("[Client] accept failed: {e}");
                    shared.state().last_receive_error = Some(e.to_string());
                    tokio::time::sleep(shared.cfg.select_timeout).await;
                }
            }
        }
    }
    log::debug!("[Client] read loop stopped");
}

/// Handle one server push: decode, ack, dedup, dispatch.
async fn handle_push(shared: &ClientShared, mut stream: TcpStream, token: &CancellationToken) {
    let cfg = &shared.cfg;
    let uid = shared.state().uid.clone();

    let request =
        match read_request_within(&mut stream, cfg.buffer_size, cfg.reconnection_timeout).await {
            Ok(request) => request,
            Err(e) => {
                log::warn!("[Client] undecodable push: {e}");
                shared.state().last_receive_error = Some(e.to_string());
                let nack = add_cmd(CommandCode::ConfirmReception, [], FAILED_ACK_BODY);
                if let Err(e) = write_message(&mut stream, &nack, uid.as_deref(), cfg.buffer_size).await {
                    log::debug!("[Client] could not send failed ack: {e}");
                }
                return;
            }
        };

    let code = request.command();
    if code.is_some_and(CommandCode::client_acks) {
        let body = match request.msguid {
            Some(_) => request.total_chars.to_string(),
            None => FAILED_ACK_BODY.to_string(),
        };
        let ack = add_cmd(CommandCode::ConfirmReception, [], &body);
        if let Err(e) = write_message(&mut stream, &ack, uid.as_deref(), cfg.buffer_size).await {
            log::warn!("[Client] ack failed: {e}");
            shared.state().last_send_error = Some(e.to_string());
        }
    }

    let Some(msguid) = request.msguid.as_deref() else {
        log::warn!("[Client] push without MSGUID dropped");
        shared.state().last_receive_error = Some("missing MSGUID".to_string());
        return;
    };
    if !shared.dedup.insert(msguid) {
        log::debug!("[Client] duplicate {msguid} acked, not dispatched");
        return;
    }

    let server_status = match code {
        Some(CommandCode::ServerConnected) => Some(ConnectionStatus::Connected),
        Some(CommandCode::ServerDisconnected) => Some(ConnectionStatus::Disconnected),
        Some(CommandCode::ServerShutdown) => Some(ConnectionStatus::Shutdown),
        _ => None,
    };
    {
        let mut state = shared.state();
        state.counters.receives += 1;
        state.counters.send_errors = 0;
        state.counters.connect_errors = 0;
        state.last_receive_error = None;
        state.server_status = server_status.unwrap_or(ConnectionStatus::Connected);
        if code == Some(CommandCode::ServerShutdown) {
            // The server forgets every client on shutdown.
            state.status = ConnectionStatus::Disconnected;
            state.uid = None;
        }
    }
    if code == Some(CommandCode::ServerShutdown) {
        shared.dedup.clear();
    }

    emit(
        &shared.events,
        NetEvent::Receive {
            uid: request.sender_uid.clone(),
            netcode: request.code.clone(),
            args: request.args.clone(),
            msg: request.message.clone(),
            msguid: request.msguid.clone(),
        },
    );
    if let Some(status) = server_status {
        log::info!("[Client] server is {status}");
        shared.publish_status(Some("server"), status, code.map_or("", CommandCode::as_str));
    }
    if code == Some(CommandCode::ServerShutdown) {
        shared.publish_status(None, ConnectionStatus::Disconnected, "server shutdown");
        token.cancel();
    }
    shared.publish_info();
}
