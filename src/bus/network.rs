//! Network satellites: a [`ClientEndpoint`] or a [`ServerContainer`] on the
//! bus.
//!
//! Envelopes from the business channel drive the endpoint. Everything the
//! endpoint reports through its [`NetEvent`] channel is forwarded as an
//! envelope by a child task:
//!
//! | event            | envelope       |
//! |------------------|----------------|
//! | `Receive`        | `RECEIVE`      |
//! | `Status`         | `NET_STATUS`   |
//! | `Error`          | `NET_ERROR`    |
//! | `SendError`      | `SEND_ERROR`   |
//! | `Info`           | `SET_NET_INFO` |

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::NetConfig;
use crate::net::{ClientEndpoint, NetError, NetEvent, ProtocolError, ServerContainer};

use super::envelope::{Channel, Envelope, Kind};
use super::error::{BusError, BusResult};
use super::satellite::{Satellite, SatelliteContext};

// ============================================================================
// Event forwarding
// ============================================================================

/// Envelope reporting `event` to the business channel.
pub fn event_envelope(event: NetEvent) -> Envelope {
    match event {
        NetEvent::Receive {
            uid,
            netcode,
            args,
            msg,
            msguid,
        } => {
            let args: Map<String, Value> = args
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            Envelope::new(Kind::Receive)
                .with("uid", uid)
                .with("netcode", netcode)
                .with("args", Value::Object(args))
                .with("msg", msg)
                .with("msguid", msguid)
        }
        NetEvent::Status {
            peer,
            status,
            message,
        } => Envelope::new(Kind::NetStatus)
            .with("peer", peer)
            .with("status", status.as_str())
            .with("message", message),
        NetEvent::Error {
            peer,
            status,
            message,
        } => Envelope::new(Kind::NetError)
            .with("peer", peer)
            .with("status", status.as_str())
            .with("message", message),
        NetEvent::SendError {
            msg,
            confirm,
            clients,
        } => Envelope::new(Kind::SendError)
            .with("msg", msg)
            .with("confirm", confirm)
            .with("clients", clients),
        NetEvent::Info(info) => {
            let info = serde_json::to_value(&info).unwrap_or_else(|e| {
                log::warn!("[Net] could not serialize net info: {e}");
                Value::Null
            });
            Envelope::new(Kind::SetNetInfo).with("info", info)
        }
    }
}

fn spawn_forwarder(ctx: SatelliteContext, mut events: mpsc::UnboundedReceiver<NetEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = ctx.emit(event_envelope(event)).await {
                log::debug!("[Net] event forwarding stopped: {e}");
                break;
            }
        }
    })
}

fn required_str<'a>(envelope: &'a Envelope, arg: &'static str) -> BusResult<&'a str> {
    envelope.str_arg(arg).ok_or(BusError::MissingArgument {
        kind: envelope.kind.as_str(),
        arg,
    })
}

fn optional_port(envelope: &Envelope) -> BusResult<Option<u16>> {
    if envelope.arg("port").is_none() {
        return Ok(None);
    }
    envelope
        .u64_arg("port")
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
        .map(Some)
        .ok_or_else(|| {
            NetError::from(ProtocolError::InvalidArgument("port".to_string())).into()
        })
}

fn optional_host(envelope: &Envelope) -> Option<String> {
    envelope.str_arg("host").map(str::to_string)
}

// ============================================================================
// Server satellite
// ============================================================================

/// Network satellite hosting a [`ServerContainer`].
#[derive(Debug)]
pub struct ServerSatellite {
    server: ServerContainer,
    events: Option<mpsc::UnboundedReceiver<NetEvent>>,
    forwarder: Option<JoinHandle<()>>,
    /// Pending `DISCONNECT` or `NET_SHUTDOWN` worker.
    lifecycle: Option<JoinHandle<()>>,
    connect_on_start: bool,
}

impl ServerSatellite {
    /// Server that will listen on `host:port` once connected.
    pub fn new(cfg: NetConfig, host: impl Into<String>, port: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            server: ServerContainer::new(cfg, host, port, tx),
            events: Some(rx),
            forwarder: None,
            lifecycle: None,
            connect_on_start: false,
        }
    }

    /// Start serving as soon as every satellite is ready.
    #[must_use]
    pub fn connect_on_start(mut self, connect: bool) -> Self {
        self.connect_on_start = connect;
        self
    }

    /// Wait for a pending lifecycle worker so operations stay ordered.
    async fn settle_lifecycle(&mut self) {
        if let Some(worker) = self.lifecycle.take() {
            if let Err(e) = worker.await {
                log::warn!("[Server] lifecycle worker failed: {e}");
            }
        }
    }
}

#[async_trait]
impl Satellite for ServerSatellite {
    fn channel(&self) -> Channel {
        Channel::Network
    }

    async fn on_start(&mut self, ctx: &SatelliteContext) -> BusResult<()> {
        if let Some(events) = self.events.take() {
            self.forwarder = Some(spawn_forwarder(ctx.clone(), events));
        }
        Ok(())
    }

    async fn on_threads_started(&mut self, _ctx: &SatelliteContext) -> BusResult<()> {
        if self.connect_on_start {
            self.server.connect().await?;
        }
        Ok(())
    }

    async fn handle(&mut self, envelope: Envelope, _ctx: &SatelliteContext) -> BusResult<()> {
        match envelope.kind {
            Kind::Connect => {
                self.settle_lifecycle().await;
                self.server.connect().await?;
            }
            Kind::Disconnect => {
                self.settle_lifecycle().await;
                self.lifecycle = Some(self.server.spawn_disconnect());
            }
            Kind::NetShutdown => {
                self.settle_lifecycle().await;
                self.lifecycle = Some(self.server.spawn_shutdown());
            }
            Kind::SetAddress => {
                let port = optional_port(&envelope)?;
                self.server.set_address(optional_host(&envelope), port);
            }
            Kind::Send => {
                let msg = required_str(&envelope, "msg")?.to_string();
                let confirm = envelope.bool_arg("confirm").unwrap_or(true);
                let clients = envelope.str_list_arg("clients");
                // Detached: failures surface as SEND_ERROR.
                drop(self.server.spawn_send(clients, msg, confirm));
            }
            Kind::CheckConn => {
                drop(self.server.check_conn(envelope.str_list_arg("clients")));
            }
            Kind::GetNetInfo => self.server.publish_info(),
            Kind::SetBusInfo => {
                if let Some(accept) = envelope.bool_arg("accept_connections") {
                    self.server.set_accept_connections(accept);
                    self.server.publish_info();
                }
            }
            other => log::debug!("[Server] ignored {other}"),
        }
        Ok(())
    }

    async fn on_shutdown(&mut self, _ctx: &SatelliteContext) {
        self.settle_lifecycle().await;
        if let Err(e) = self.server.shutdown().await {
            log::warn!("[Server] shutdown failed: {e}");
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    fn describe(&self) -> Value {
        serde_json::to_value(self.server.info()).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Client satellite
// ============================================================================

/// Network satellite hosting a [`ClientEndpoint`].
#[derive(Debug)]
pub struct ClientSatellite {
    client: ClientEndpoint,
    events: Option<mpsc::UnboundedReceiver<NetEvent>>,
    forwarder: Option<JoinHandle<()>>,
    connect_on_start: bool,
}

impl ClientSatellite {
    /// Client targeting the server at `host:port`.
    pub fn new(cfg: NetConfig, host: impl Into<String>, port: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client: ClientEndpoint::new(cfg, host, port, tx),
            events: Some(rx),
            forwarder: None,
            connect_on_start: false,
        }
    }

    /// Connect as soon as every satellite is ready.
    #[must_use]
    pub fn connect_on_start(mut self, connect: bool) -> Self {
        self.connect_on_start = connect;
        self
    }
}

#[async_trait]
impl Satellite for ClientSatellite {
    fn channel(&self) -> Channel {
        Channel::Network
    }

    async fn on_start(&mut self, ctx: &SatelliteContext) -> BusResult<()> {
        if let Some(events) = self.events.take() {
            self.forwarder = Some(spawn_forwarder(ctx.clone(), events));
        }
        Ok(())
    }

    async fn on_threads_started(&mut self, _ctx: &SatelliteContext) -> BusResult<()> {
        if self.connect_on_start {
            self.client.connect(None, None).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, envelope: Envelope, _ctx: &SatelliteContext) -> BusResult<()> {
        match envelope.kind {
            Kind::Connect => {
                let port = optional_port(&envelope)?;
                self.client.connect(optional_host(&envelope), port).await?;
            }
            Kind::Disconnect => self.client.disconnect().await?,
            Kind::NetShutdown => self.client.shutdown().await?,
            Kind::SetAddress => {
                let port = optional_port(&envelope)?;
                self.client.set_address(optional_host(&envelope), port);
            }
            Kind::Send => {
                let msg = required_str(&envelope, "msg")?;
                let confirm = envelope.bool_arg("confirm").unwrap_or(true);
                self.client.send(msg, confirm).await?;
            }
            Kind::CheckConn => self.client.check_conn(),
            Kind::GetNetInfo => self.client.publish_info(),
            other => log::debug!("[Client] ignored {other}"),
        }
        Ok(())
    }

    async fn on_shutdown(&mut self, _ctx: &SatelliteContext) {
        if let Err(e) = self.client.shutdown().await {
            log::warn!("[Client] shutdown failed: {e}");
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    fn describe(&self) -> Value {
        serde_json::to_value(self.client.info()).unwrap_or(Value::Null)
    }
}
