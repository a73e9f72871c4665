//! Server container.
//!
//! Accepts client requests on one listener and pushes requests back through
//! each client's advertised reverse address.
//!
//! ```text
//!                ┌──────────── accept loop ────────────┐
//!  client ──────►│ permit (accept pool) ─► spawn worker │─► RECEIVE / SET_NET_INFO
//!                └──────────────────────────────────────┘
//!                      │ decode, refuse unknown UID,
//!                      │ ack, apply side effects
//!                      ▼
//!               records: uid ─► ClientRecord
//!                      ▲
//!  business ── send ───┘ per-client push ─► client read socket (ack back)
//! ```
//!
//! Inbound workers and outbound sends touch a record only inside short
//! critical sections; the lock is never held across socket I/O.

// Rust guideline compliant 2026-02

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::join_all;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{
    add_cmd, encode, format_cmd, mark_msg_as_unique, split_cmd_and_msg, CommandCode,
    DecodedRequest, EncodedMessage,
};
use crate::config::NetConfig;
use crate::constants::{CONNECTION_REFUSED_BODY, FAILED_ACK_BODY, SERVER_UID};

use super::client::check_ack;
use super::error::{NetError, NetResult, ProtocolError};
use super::events::{emit, NetEvent, NetEventSender, NetInfo};
use super::reliability::{max_attempts, retry, status_after_failure, DedupCache};
use super::status::{ClientRecordInfo, ConnectionStatus, NetCounters, ServerNetInfo};
use super::transport::{connect, read_request_within, resolve, write_blocks, write_message};

/// Listen backlog of the server socket.
const SERVER_BACKLOG: u32 = 1024;

/// Peer addresses remembered per client.
const ADDRESS_HISTORY: usize = 8;

// ============================================================================
// Records
// ============================================================================

/// Server-side state of one client.
#[derive(Debug)]
struct ClientRecord {
    uid: String,
    addresses: Vec<String>,
    read_host: Option<String>,
    read_port: Option<u16>,
    /// Resolved reverse address, dropped after a failed push.
    read_addr: Option<SocketAddr>,
    status: ConnectionStatus,
    last_connect_error: Option<String>,
    last_send_error: Option<String>,
    last_receive_error: Option<String>,
    counters: NetCounters,
}

impl ClientRecord {
    fn new(uid: String, peer: SocketAddr) -> Self {
        Self {
            uid,
            addresses: vec![peer.to_string()],
            read_host: None,
            read_port: None,
            read_addr: None,
            status: ConnectionStatus::Undefined,
            last_connect_error: None,
            last_send_error: None,
            last_receive_error: None,
            counters: NetCounters::default(),
        }
    }

    fn seen_from(&mut self, peer: SocketAddr) {
        let peer = peer.to_string();
        if self.addresses.last() != Some(&peer) {
            self.addresses.push(peer);
            if self.addresses.len() > ADDRESS_HISTORY {
                self.addresses.remove(0);
            }
        }
    }

    fn invalidate_outbound(&mut self) {
        self.read_addr = None;
    }

    fn info(&self) -> ClientRecordInfo {
        ClientRecordInfo {
            uid: self.uid.clone(),
            addresses: self.addresses.clone(),
            read_host: self.read_host.clone(),
            read_port: self.read_port,
            status: self.status,
            last_connect_error: self.last_connect_error.clone(),
            last_send_error: self.last_send_error.clone(),
            last_receive_error: self.last_receive_error.clone(),
            counters: self.counters.clone(),
        }
    }
}

#[derive(Debug)]
struct ServerState {
    host: String,
    port: u16,
    status: ConnectionStatus,
    accept_new_connections: bool,
    minted: u64,
    local_addr: Option<SocketAddr>,
}

/// Outcome of a server send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Clients that received (and acked, when required) the message.
    pub delivered: Vec<String>,
    /// Clients for which every attempt failed.
    pub failed: Vec<String>,
    /// Clients skipped because they are closed or unknown.
    pub skipped: Vec<String>,
}

/// State shared by the container, its accept loop and its workers.
#[derive(Debug)]
struct ServerShared {
    cfg: NetConfig,
    state: Mutex<ServerState>,
    records: Mutex<BTreeMap<String, ClientRecord>>,
    dedup: DedupCache,
    events: NetEventSender,
    pool: Arc<Semaphore>,
}

#[derive(Debug)]
struct ServeTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ServeTask {
    fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            log::warn!("[Server] accept loop ended abnormally: {e}");
        }
    }
}

/// Server side of the protocol.
#[derive(Debug)]
pub struct ServerContainer {
    shared: Arc<ServerShared>,
    serve: Option<ServeTask>,
}

impl ServerContainer {
    /// Create a stopped server that will listen on `host:port`.
    ///
    /// Port 0 picks a free port; see [`ServerContainer::local_addr`].
    pub fn new(cfg: NetConfig, host: impl Into<String>, port: u16, events: NetEventSender) -> Self {
        let dedup = DedupCache::new(cfg.dedup_capacity);
        let pool = Arc::new(Semaphore::new(cfg.accept_pool_size.max(1)));
        Self {
            shared: Arc::new(ServerShared {
                cfg,
                state: Mutex::new(ServerState {
                    host: host.into(),
                    port,
                    status: ConnectionStatus::Disconnected,
                    accept_new_connections: true,
                    minted: 0,
                    local_addr: None,
                }),
                records: Mutex::new(BTreeMap::new()),
                dedup,
                events,
                pool,
            }),
            serve: None,
        }
    }

    /// Address the listener is bound to, while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.state().local_addr
    }

    /// Current server status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state().status
    }

    /// Whether the accept loop is running.
    pub fn is_serving(&self) -> bool {
        self.serve.as_ref().is_some_and(ServeTask::is_running)
    }

    /// Snapshot of the server and every record.
    pub fn info(&self) -> ServerNetInfo {
        self.shared.snapshot()
    }

    /// Emit a `SET_NET_INFO` snapshot.
    pub fn publish_info(&self) {
        self.shared.publish_info();
    }

    /// Snapshot of one record.
    pub fn client_info(&self, uid: &str) -> Option<ClientRecordInfo> {
        self.shared.records().get(uid).map(ClientRecord::info)
    }

    /// Allow or forbid minting new UIDs.
    pub fn set_accept_connections(&self, accept: bool) {
        self.shared.state().accept_new_connections = accept;
        log::info!("[Server] accept new connections: {accept}");
    }

    /// Change the listen address used by the next `connect`.
    pub fn set_address(&self, host: Option<String>, port: Option<u16>) {
        let mut state = self.shared.state();
        if let Some(host) = host {
            state.host = host;
        }
        if let Some(port) = port {
            state.port = port;
        }
        if self.is_serving() {
            log::info!("[Server] new address applies after reconnect");
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind and serve, then announce `SERVER_CONNECTED` to known clients.
    ///
    /// Connecting a serving server returns its address unchanged.
    pub async fn connect(&mut self) -> NetResult<SocketAddr> {
        if self.is_serving() {
            log::debug!("[Server] connect ignored, already serving");
            return self
                .local_addr()
                .ok_or_else(|| NetError::Lifecycle("serving without address".to_string()));
        }

        let (host, port) = {
            let state = self.shared.state();
            (state.host.clone(), state.port)
        };
        let listener = match bind_server(&host, port).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("[Server] bind {host}:{port} failed: {e}");
                self.shared.state().status = ConnectionStatus::ErrorConnection;
                self.shared.publish_error(None, ConnectionStatus::ErrorConnection, format!("bind failed: {e}"));
                self.shared.publish_info();
                return Err(e);
            }
        };
        let addr = listener.local_addr()?;
        {
            let mut state = self.shared.state();
            state.local_addr = Some(addr);
            state.status = ConnectionStatus::Connected;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(self.shared.clone(), listener, token.clone()));
        self.serve = Some(ServeTask { token, handle });

        log::info!("[Server] listening on {addr}");
        self.shared
            .publish_status(None, ConnectionStatus::Connected, "server listening");
        self.shared.publish_info();

        if self.shared.has_open_records() {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                let announce = format_cmd(CommandCode::ServerConnected, []);
                shared.send(None, &announce, true).await;
            });
        }
        Ok(addr)
    }

    /// Announce `SERVER_DISCONNECTED` and stop accepting; records are kept.
    pub async fn disconnect(&mut self) -> NetResult<()> {
        let serve = self.serve.take();
        self.shared.disconnect(serve).await;
        Ok(())
    }

    /// [`ServerContainer::disconnect`] on a background task.
    ///
    /// The listener is detached from the container right away; the
    /// announcement and the stop run on the returned task.
    pub fn spawn_disconnect(&mut self) -> JoinHandle<()> {
        let serve = self.serve.take();
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.disconnect(serve).await })
    }

    /// Announce `SERVER_SHUTDOWN`, stop, and forget every client.
    pub async fn shutdown(&mut self) -> NetResult<()> {
        let serve = self.serve.take();
        self.shared.shutdown(serve).await;
        Ok(())
    }

    /// [`ServerContainer::shutdown`] on a background task.
    pub fn spawn_shutdown(&mut self) -> JoinHandle<()> {
        let serve = self.serve.take();
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.shutdown(serve).await })
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Push `msg` to `uids` (every known client when `None`).
    pub async fn send(&self, uids: Option<Vec<String>>, msg: &str, confirm: bool) -> SendReport {
        self.shared.send(uids, msg, confirm).await
    }

    /// [`ServerContainer::send`] on a background task.
    pub fn spawn_send(
        &self,
        uids: Option<Vec<String>>,
        msg: String,
        confirm: bool,
    ) -> JoinHandle<SendReport> {
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.send(uids, &msg, confirm).await })
    }

    /// Ping `uids` (every known client when `None`).
    pub fn check_conn(&self, uids: Option<Vec<String>>) -> JoinHandle<SendReport> {
        self.spawn_send(uids, format_cmd(CommandCode::Ping, []), true)
    }
}

impl Drop for ServerContainer {
    fn drop(&mut self) {
        if let Some(serve) = &self.serve {
            serve.token.cancel();
        }
    }
}

impl ServerShared {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, ClientRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_open_records(&self) -> bool {
        self.records().values().any(|r| !r.status.is_closed())
    }

    fn snapshot(&self) -> ServerNetInfo {
        let clients = self.records().values().map(ClientRecord::info).collect();
        let state = self.state();
        ServerNetInfo {
            host: state.host.clone(),
            port: state.local_addr.map_or(state.port, |a| a.port()),
            status: state.status,
            accept_new_connections: state.accept_new_connections,
            minted: state.minted,
            clients,
        }
    }

    fn publish_info(&self) {
        emit(&self.events, NetEvent::Info(NetInfo::Server(self.snapshot())));
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

    fn publish_error(&self, peer: Option<&str>, status: ConnectionStatus, message: String) {
        emit(
            &self.events,
            NetEvent::Error {
                peer: peer.map(str::to_string),
                status,
                message,
            },
        );
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn disconnect(&self, serve: Option<ServeTask>) {
        let Some(serve) = serve.filter(ServeTask::is_running) else {
            log::debug!("[Server] disconnect ignored, not serving");
            return;
        };
        let announce = format_cmd(CommandCode::ServerDisconnected, []);
        self.send(None, &announce, true).await;
        serve.stop().await;
        self.state().status = ConnectionStatus::Disconnected;
        log::info!("[Server] disconnected");
        self.publish_status(None, ConnectionStatus::Disconnected, "server disconnected");
        self.publish_info();
    }

    async fn shutdown(&self, serve: Option<ServeTask>) {
        if self.state().status == ConnectionStatus::Shutdown {
            return;
        }
        if self.has_open_records() {
            let announce = format_cmd(CommandCode::ServerShutdown, []);
            self.send(None, &announce, true).await;
        }
        if let Some(serve) = serve {
            serve.stop().await;
        }
        self.records().clear();
        self.dedup.clear();
        {
            let mut state = self.state();
            state.status = ConnectionStatus::Shutdown;
            state.local_addr = None;
        }
        log::info!("[Server] shut down");
        self.publish_status(None, ConnectionStatus::Shutdown, "server shutdown");
        self.publish_info();
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Handle one accepted socket: one request, at most one reply.
    async fn handle_inbound(&self, mut stream: TcpStream, peer: SocketAddr) {
        let cfg = &self.cfg;
        let request =
            match read_request_within(&mut stream, cfg.buffer_size, cfg.reconnection_timeout).await {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("[Server] undecodable request from {peer}: {e}");
                    let nack = add_cmd(CommandCode::ConfirmReception, [], FAILED_ACK_BODY);
                    self.reply(&mut stream, &nack).await;
                    return;
                }
            };

        if let Some(uid) = request.sender_uid.as_deref() {
            if !self.records().contains_key(uid) {
                log::warn!("[Server] refusing unknown uid {uid} from {peer}");
                self.refuse(&mut stream).await;
                return;
            }
        }

        let code = request.command();
        if code.is_some_and(CommandCode::server_acks) {
            let ack = add_cmd(
                CommandCode::ConfirmReception,
                [],
                &request.total_chars.to_string(),
            );
            self.reply(&mut stream, &ack).await;
        }

        if let Some(msguid) = request.msguid.as_deref() {
            if !self.dedup.insert(msguid) {
                log::debug!("[Server] duplicate {msguid} acked, not dispatched");
                return;
            }
        }

        let mut sender = request.sender_uid.clone();
        if code == Some(CommandCode::AskForUid) {
            match self.mint_uid(peer) {
                Some(uid) => {
                    log::info!("[Server] new client {uid} from {peer}");
                    self.reply(&mut stream, &uid).await;
                    sender = Some(uid);
                }
                None => {
                    log::info!("[Server] registrations closed, refusing {peer}");
                    self.refuse(&mut stream).await;
                    return;
                }
            }
        } else if let Some(uid) = sender.as_deref() {
            self.apply_side_effects(uid, peer, code, &request).await;
        }

        self.publish_info();
        emit(
            &self.events,
            NetEvent::Receive {
                uid: sender,
                netcode: request.code.clone(),
                args: request.args.clone(),
                msg: request.message.clone(),
                msguid: request.msguid.clone(),
            },
        );
    }

    fn mint_uid(&self, peer: SocketAddr) -> Option<String> {
        let uid = {
            let mut state = self.state();
            if !state.accept_new_connections {
                return None;
            }
            let uid = format!("uid{}", state.minted);
            state.minted += 1;
            uid
        };
        self.records()
            .insert(uid.clone(), ClientRecord::new(uid.clone(), peer));
        Some(uid)
    }

    async fn apply_side_effects(
        &self,
        uid: &str,
        peer: SocketAddr,
        code: Option<CommandCode>,
        request: &DecodedRequest,
    ) {
        let read_infos = if code == Some(CommandCode::SetClientReadInfos) {
            Some(parse_read_infos(request, peer).await)
        } else {
            None
        };

        let mut records = self.records();
        let Some(record) = records.get_mut(uid) else {
            return;
        };
        record.seen_from(peer);
        record.counters.receives += 1;
        record.last_receive_error = None;

        let previous = record.status;
        match code {
            Some(CommandCode::SetClientReadInfos) => match read_infos {
                Some(Ok((host, port, addr))) => {
                    record.read_host = Some(host);
                    record.read_port = Some(port);
                    record.read_addr = Some(addr);
                    record.status = ConnectionStatus::Connected;
                }
                Some(Err(e)) => {
                    log::warn!("[Server] bad read infos from {uid}: {e}");
                    record.last_receive_error = Some(e.to_string());
                }
                None => {}
            },
            Some(CommandCode::ClientConnected) => record.status = ConnectionStatus::Connected,
            Some(CommandCode::ClientDisconnected) => {
                record.status = ConnectionStatus::Disconnected;
                record.invalidate_outbound();
            }
            Some(CommandCode::ClientShutdown) => {
                record.status = ConnectionStatus::Shutdown;
                record.invalidate_outbound();
            }
            _ => {
                if matches!(
                    record.status,
                    ConnectionStatus::Undefined | ConnectionStatus::ErrorConnection
                ) {
                    record.status = ConnectionStatus::Connected;
                }
            }
        }

        let current = record.status;
        drop(records);
        if current != previous {
            log::info!("[Server] {uid}: {previous} -> {current}");
            self.publish_status(Some(uid), current, code.map_or("request", CommandCode::as_str));
        }
    }

    async fn reply(&self, stream: &mut TcpStream, message: &str) {
        if let Err(e) = write_message(stream, message, Some(SERVER_UID), self.cfg.buffer_size).await {
            log::warn!("[Server] reply failed: {e}");
        }
    }

    async fn refuse(&self, stream: &mut TcpStream) {
        let refused = add_cmd(CommandCode::ConnectionRefused, [], CONNECTION_REFUSED_BODY);
        self.reply(stream, &refused).await;
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    async fn send(&self, uids: Option<Vec<String>>, msg: &str, confirm: bool) -> SendReport {
        let tagged = mark_msg_as_unique(msg, Some(SERVER_UID));
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
        let expect_ack = code.is_some_and(CommandCode::client_acks);

        let encoded = match encode(&body, Some(SERVER_UID), self.cfg.buffer_size) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("[Server] cannot encode message: {e}");
                let clients = uids.unwrap_or_else(|| self.records().keys().cloned().collect());
                emit(
                    &self.events,
                    NetEvent::SendError {
                        msg: msg.to_string(),
                        confirm,
                        clients: clients.clone(),
                    },
                );
                return SendReport {
                    failed: clients,
                    ..SendReport::default()
                };
            }
        };

        let targets = uids.unwrap_or_else(|| self.records().keys().cloned().collect());
        let max = max_attempts(&self.cfg, code);
        let outcomes = join_all(
            targets
                .iter()
                .map(|uid| self.send_to_client(uid, &encoded, expect_ack, max)),
        )
        .await;

        let mut report = SendReport::default();
        let mut unexplained_failures = Vec::new();
        for (uid, outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                ClientSend::Delivered => report.delivered.push(uid),
                ClientSend::Failed { unexplained } => {
                    if unexplained {
                        unexplained_failures.push(uid.clone());
                    }
                    report.failed.push(uid);
                }
                ClientSend::Skipped => report.skipped.push(uid),
            }
        }

        if !report.failed.is_empty() {
            log::error!("[Server] send failed for {:?}", report.failed);
        }
        if !unexplained_failures.is_empty() {
            emit(
                &self.events,
                NetEvent::SendError {
                    msg: msg.to_string(),
                    confirm,
                    clients: unexplained_failures,
                },
            );
        }
        self.publish_info();
        report
    }

    async fn send_to_client(
        &self,
        uid: &str,
        encoded: &EncodedMessage,
        expect_ack: bool,
        max: u32,
    ) -> ClientSend {
        let target = {
            let records = self.records();
            match records.get(uid) {
                None => Err(NetError::Protocol(ProtocolError::UnknownUid(uid.to_string()))),
                Some(r) if r.status.is_closed() => {
                    log::debug!("[Server] skipping {uid} ({})", r.status);
                    return ClientSend::Skipped;
                }
                Some(r) => Ok((
                    r.read_addr,
                    r.read_host.clone(),
                    r.read_port,
                    r.addresses.last().cloned(),
                    r.status == ConnectionStatus::Undefined,
                )),
            }
        };
        let (cached, read_host, read_port, last_peer, uncertain) = match target {
            Ok(target) => target,
            Err(e) => {
                log::warn!("[Server] {e}");
                return ClientSend::Skipped;
            }
        };

        let addr = match cached {
            Some(addr) => Ok(addr),
            None => resolve_read_addr(uid, read_host, read_port, last_peer).await,
        };
        let addr = match addr {
            Ok(addr) => addr,
            Err(e) => {
                let unexplained = self.record_failure(uid, &e);
                return ClientSend::Failed { unexplained };
            }
        };

        let cfg = &self.cfg;
        let limit = uncertain.then_some(cfg.reconnection_timeout);
        let wait = limit.unwrap_or(cfg.ack_timeout);
        let outcome = retry(max, cfg.resend_delay, move |attempt| async move {
            log::trace!("[Server] push to {uid} attempt {attempt}/{max}");
            let mut stream = connect(addr, limit).await?;
            write_blocks(&mut stream, encoded).await?;
            if expect_ack {
                let reply = read_request_within(&mut stream, cfg.buffer_size, wait).await?;
                check_ack(&reply, encoded.total_chars)?;
            }
            Ok(())
        })
        .await;

        let mut records = self.records();
        let Some(record) = records.get_mut(uid) else {
            return ClientSend::Skipped;
        };
        record
            .counters
            .record_send(outcome.result.is_ok(), outcome.attempts, expect_ack);
        match outcome.result {
            Ok(()) => {
                record.read_addr = Some(addr);
                record.last_send_error = None;
                ClientSend::Delivered
            }
            Err(e) => {
                drop(records);
                let unexplained = self.record_failure(uid, &e);
                ClientSend::Failed { unexplained }
            }
        }
    }

    /// Apply a failed push to the record and report it.
    ///
    /// Returns whether the failure is unexplained: the record was neither
    /// forgotten nor closed while the push was in flight. Only those
    /// failures go into `SEND_ERROR`.
    fn record_failure(&self, uid: &str, error: &NetError) -> bool {
        let (status, unexplained) = {
            let mut records = self.records();
            let Some(record) = records.get_mut(uid) else {
                return false;
            };
            record.last_send_error = Some(error.to_string());
            if matches!(error, NetError::Io(_) | NetError::Timeout) {
                record.last_connect_error = Some(error.to_string());
            }
            record.invalidate_outbound();
            // A client that announced its departure meanwhile keeps that status.
            let unexplained = !record.status.is_closed();
            if unexplained {
                record.status = status_after_failure(record.status, error);
            }
            (record.status, unexplained)
        };
        log::warn!("[Server] push to {uid} failed ({status}): {error}");
        self.publish_error(Some(uid), status, error.to_string());
        self.publish_status(Some(uid), status, "send failed");
        unexplained
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientSend {
    Delivered,
    Failed { unexplained: bool },
    Skipped,
}

/// Parse `SET_CLIENT_READ_INFOS` arguments into a reverse address.
///
/// A missing or empty host means "same host the request came from".
async fn parse_read_infos(
    request: &DecodedRequest,
    peer: SocketAddr,
) -> NetResult<(String, u16, SocketAddr)> {
    let port = request
        .args
        .get("port")
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| ProtocolError::InvalidArgument("port".to_string()))?;
    let host = request.args.get("host").cloned().unwrap_or_default();
    let addr = if host.is_empty() {
        SocketAddr::new(peer.ip(), port)
    } else {
        resolve(&host, port).await?
    };
    Ok((host, port, addr))
}

/// Resolve a reverse address that is not cached.
async fn resolve_read_addr(
    uid: &str,
    read_host: Option<String>,
    read_port: Option<u16>,
    last_peer: Option<String>,
) -> NetResult<SocketAddr> {
    let port = read_port.ok_or_else(|| ProtocolError::MissingReadAddress(uid.to_string()))?;
    match read_host.as_deref() {
        Some(host) if !host.is_empty() => resolve(host, port).await,
        _ => {
            let ip = last_peer
                .and_then(|p| p.parse::<SocketAddr>().ok())
                .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |a| a.ip());
            Ok(SocketAddr::new(ip, port))
        }
    }
}

async fn bind_server(host: &str, port: u16) -> NetResult<TcpListener> {
    let addr = if host.is_empty() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
    } else {
        resolve(host, port).await?
    };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(SERVER_BACKLOG)?)
}

/// Accept connections until cancelled, one pooled worker per socket.
async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener, token: CancellationToken) {
    loop {
        let permit = tokio::select! {
            () = token.cancelled() => break,
            permit = shared.pool.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::trace!("[Server] connection from {peer}");
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        shared.handle_inbound(stream, peer).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    log::warn!("[Server] accept failed: {e}");
                    drop(permit);
                    tokio::time::sleep(shared.cfg.select_timeout).await;
                }
            }
        }
    }
    log::debug!("[Server] accept loop stopped");
}
