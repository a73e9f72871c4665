//! The switchboard: bounded queues and the routing worker.
//!
//! ```text
//! Network   ──sat→app──┐                         ┌──app→sat──► Network
//! Business  ──sat→app──┤  round-robin ─► route ──┼──app→sat──► Business
//! Interface ──sat→app──┤                         └──app→sat──► Interface
//! BusHandle ──control──┘   CLOSE_APP, GET_APP_INFO, SET_SAT_INFO: bus
//! ```
//!
//! Every queue is a bounded `tokio::sync::mpsc` channel of
//! `queue_capacity` envelopes, so each direction is FIFO.

use std::collections::{BTreeMap, BTreeSet};
use std::future::poll_fn;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::QUEUE_CAPACITY;

use super::envelope::{Channel, Envelope, Kind};
use super::error::{BusError, BusResult};
use super::routing::{route, Route};
use super::satellite::{run_satellite, Satellite, SatelliteContext, THREADS_READY, THREADS_STARTED};

/// Collects satellites before the bus starts.
pub struct BusBuilder {
    satellites: BTreeMap<Channel, Box<dyn Satellite>>,
    queue_capacity: usize,
}

impl std::fmt::Debug for BusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBuilder")
            .field("channels", &self.satellites.keys().collect::<Vec<_>>())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBuilder {
    /// Empty builder with the default queue capacity.
    pub fn new() -> Self {
        Self {
            satellites: BTreeMap::new(),
            queue_capacity: QUEUE_CAPACITY,
        }
    }

    /// Attach `satellite` on its channel, replacing any earlier one.
    #[must_use]
    pub fn attach(mut self, satellite: impl Satellite) -> Self {
        let channel = satellite.channel();
        if self.satellites.insert(channel, Box::new(satellite)).is_some() {
            log::warn!("[Bus] replaced satellite on {channel}");
        }
        self
    }

    /// Capacity of every queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Spawn the satellite loops and the switchboard.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> BusHandle {
        let capacity = self.queue_capacity;
        let (control_tx, control_rx) = mpsc::channel(capacity);

        let mut inbound = BTreeMap::new();
        let mut outbound = Vec::with_capacity(self.satellites.len() + 1);
        let mut tasks = Vec::with_capacity(self.satellites.len());
        for (channel, satellite) in self.satellites {
            let (in_tx, in_rx) = mpsc::channel(capacity);
            let (out_tx, out_rx) = mpsc::channel(capacity);
            let ctx = SatelliteContext::new(channel, out_tx, in_tx.clone());
            tasks.push(tokio::spawn(run_satellite(satellite, ctx, in_rx)));
            inbound.insert(channel, in_tx);
            outbound.push(out_rx);
        }
        outbound.push(control_rx);

        let channels: Vec<Channel> = inbound.keys().copied().collect();
        log::info!("[Bus] starting with {channels:?}");

        let switchboard = Switchboard {
            inbound,
            ready: BTreeSet::new(),
            started: false,
        };
        let handle = tokio::spawn(switchboard.run(outbound));

        BusHandle {
            poster: BusPoster { control: control_tx },
            switchboard: handle,
            satellites: tasks,
        }
    }
}

/// Cloneable handle for posting envelopes from outside the satellites.
#[derive(Debug, Clone)]
pub struct BusPoster {
    control: mpsc::Sender<Envelope>,
}

impl BusPoster {
    /// Post `envelope` as if `from` had emitted it.
    pub async fn post(&self, from: Channel, mut envelope: Envelope) -> BusResult<()> {
        envelope.source = Some(from);
        self.control
            .send(envelope)
            .await
            .map_err(|_| BusError::Stopped)
    }

    /// Start the global shutdown.
    pub async fn close(&self, from: Channel) -> BusResult<()> {
        self.post(from, Envelope::new(Kind::CloseApp)).await
    }
}

/// A running bus.
#[derive(Debug)]
pub struct BusHandle {
    poster: BusPoster,
    switchboard: JoinHandle<()>,
    satellites: Vec<JoinHandle<()>>,
}

impl BusHandle {
    /// Posting handle usable from other tasks.
    pub fn poster(&self) -> BusPoster {
        self.poster.clone()
    }

    /// See [`BusPoster::post`].
    pub async fn post(&self, from: Channel, envelope: Envelope) -> BusResult<()> {
        self.poster.post(from, envelope).await
    }

    /// Post `CLOSE_APP`.
    pub async fn shutdown(&self) -> BusResult<()> {
        self.poster.close(Channel::Business).await
    }

    /// Wait for the switchboard and every satellite loop to end.
    pub async fn join(self) {
        if let Err(e) = self.switchboard.await {
            log::error!("[Bus] switchboard ended abnormally: {e}");
        }
        for task in self.satellites {
            if let Err(e) = task.await {
                log::error!("[Bus] satellite ended abnormally: {e}");
            }
        }
        log::info!("[Bus] stopped");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Switchboard {
    inbound: BTreeMap<Channel, mpsc::Sender<Envelope>>,
    ready: BTreeSet<Channel>,
    started: bool,
}

impl Switchboard {
    async fn run(mut self, mut outbound: Vec<mpsc::Receiver<Envelope>>) {
        let mut closed = vec![false; outbound.len()];
        let mut next = 0;
        loop {
            let polled = poll_fn(|cx| poll_round_robin(cx, &mut outbound, &mut closed, &mut next)).await;
            let Some(envelope) = polled else {
                log::debug!("[Bus] every queue closed");
                break;
            };
            if self.dispatch(envelope).await == Flow::Stop {
                break;
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Flow {
        let Some(source) = envelope.source else {
            log::warn!("[Bus] dropped {envelope}: unknown source");
            return Flow::Continue;
        };
        log::trace!("[Bus] routing {envelope}");
        match route(source, &envelope) {
            Route::Deliver(targets) => {
                for target in targets {
                    self.deliver(target, envelope.clone()).await;
                }
                Flow::Continue
            }
            Route::Bus => self.handle_local(source, envelope).await,
            Route::Drop(reason) => {
                log::warn!("[Bus] dropped {envelope}: {reason}");
                Flow::Continue
            }
        }
    }

    async fn deliver(&self, target: Channel, envelope: Envelope) {
        let Some(tx) = self.inbound.get(&target) else {
            log::debug!("[Bus] no satellite on {target} for {envelope}");
            return;
        };
        if tx.send(envelope).await.is_err() {
            log::warn!("[Bus] {}", BusError::QueueClosed(target));
        }
    }

    async fn handle_local(&mut self, source: Channel, envelope: Envelope) -> Flow {
        match envelope.kind {
            Kind::CloseApp => {
                log::info!("[Bus] CLOSE_APP from {source}, shutting down");
                for (channel, tx) in &self.inbound {
                    if tx.send(Envelope::new(Kind::Shutdown)).await.is_err() {
                        log::debug!("[Bus] {channel} already stopped");
                    }
                }
                Flow::Stop
            }
            Kind::GetAppInfo => {
                let reply = Envelope::new(Kind::SetAppInfo)
                    .with("channels", channel_names(self.inbound.keys()))
                    .with("ready", channel_names(self.ready.iter()))
                    .with("started", self.started);
                self.deliver(source, reply).await;
                Flow::Continue
            }
            Kind::SetSatInfo => {
                if envelope.bool_arg(THREADS_READY) == Some(true) {
                    self.mark_ready(source).await;
                } else {
                    log::debug!("[Bus] {source} info: {:?}", envelope.args);
                }
                Flow::Continue
            }
            _ => {
                log::warn!("[Bus] dropped {envelope}: not a bus envelope");
                Flow::Continue
            }
        }
    }

    async fn mark_ready(&mut self, channel: Channel) {
        self.ready.insert(channel);
        log::debug!("[Bus] {channel} ready ({}/{})", self.ready.len(), self.inbound.len());
        if self.started || !self.inbound.keys().all(|c| self.ready.contains(c)) {
            return;
        }
        self.started = true;
        log::info!("[Bus] every satellite ready");
        let targets: Vec<Channel> = self.inbound.keys().copied().collect();
        for target in targets {
            let broadcast = Envelope::new(Kind::SetAppInfo).with(THREADS_STARTED, true);
            self.deliver(target, broadcast).await;
        }
    }
}

fn channel_names<'a>(channels: impl Iterator<Item = &'a Channel>) -> Value {
    Value::Array(
        channels
            .map(|c| Value::String(c.as_str().to_string()))
            .collect(),
    )
}

/// Poll `receivers` starting after the last one served.
fn poll_round_robin(
    cx: &mut Context<'_>,
    receivers: &mut [mpsc::Receiver<Envelope>],
    closed: &mut [bool],
    next: &mut usize,
) -> Poll<Option<Envelope>> {
    let count = receivers.len();
    for offset in 0..count {
        let idx = (*next + offset) % count;
        if closed[idx] {
            continue;
        }
        match receivers[idx].poll_recv(cx) {
            Poll::Ready(Some(envelope)) => {
                *next = (idx + 1) % count;
                return Poll::Ready(Some(envelope));
            }
            Poll::Ready(None) => closed[idx] = true,
            Poll::Pending => {}
        }
    }
    if closed.iter().all(|c| *c) {
        Poll::Ready(None)
    } else {
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Satellite forwarding everything it handles to a test channel.
    struct Recorder {
        channel: Channel,
        seen: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl Satellite for Recorder {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn on_threads_started(&mut self, _ctx: &SatelliteContext) -> BusResult<()> {
            let _ = self.seen.send(Envelope::new(Kind::SetAppInfo).with(THREADS_STARTED, true));
            Ok(())
        }

        async fn handle(&mut self, envelope: Envelope, ctx: &SatelliteContext) -> BusResult<()> {
            // Echo SEND_USER_COMMAND lines as SEND so routing can be observed.
            if envelope.kind == Kind::SendUserCommand {
                ctx.emit(Envelope::new(Kind::Send).with("msg", envelope.str_arg("line").unwrap_or("")))
                    .await?;
            }
            let _ = self.seen.send(envelope);
            Ok(())
        }
    }

    fn recorder(channel: Channel) -> (Recorder, mpsc::UnboundedReceiver<Envelope>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (Recorder { channel, seen }, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    #[tokio::test]
    async fn test_threads_started_fires_once_all_ready() {
        let (net, mut net_rx) = recorder(Channel::Network);
        let (biz, mut biz_rx) = recorder(Channel::Business);
        let bus = BusBuilder::new().attach(net).attach(biz).start();

        for rx in [&mut net_rx, &mut biz_rx] {
            let env = next(rx).await;
            assert_eq!(env.kind, Kind::SetAppInfo);
            assert_eq!(env.bool_arg(THREADS_STARTED), Some(true));
        }

        bus.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), bus.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_routes_between_satellites() {
        let (net, mut net_rx) = recorder(Channel::Network);
        let (biz, mut biz_rx) = recorder(Channel::Business);
        let bus = BusBuilder::new().attach(net).attach(biz).start();
        next(&mut net_rx).await;
        next(&mut biz_rx).await;

        // Interface -> Business, then Business echoes SEND -> Network.
        bus.post(
            Channel::Interface,
            Envelope::new(Kind::SendUserCommand).with("line", "hello"),
        )
        .await
        .unwrap();

        let at_business = next(&mut biz_rx).await;
        assert_eq!(at_business.kind, Kind::SendUserCommand);
        assert_eq!(at_business.source, Some(Channel::Interface));

        let at_network = next(&mut net_rx).await;
        assert_eq!(at_network.kind, Kind::Send);
        assert_eq!(at_network.source, Some(Channel::Business));
        assert_eq!(at_network.str_arg("msg"), Some("hello"));

        bus.shutdown().await.unwrap();
        bus.join().await;
    }

    #[tokio::test]
    async fn test_get_app_info_is_answered_by_bus() {
        let (biz, mut biz_rx) = recorder(Channel::Business);
        let bus = BusBuilder::new().attach(biz).queue_capacity(4).start();
        next(&mut biz_rx).await;

        bus.post(Channel::Business, Envelope::new(Kind::GetAppInfo))
            .await
            .unwrap();
        let reply = next(&mut biz_rx).await;
        assert_eq!(reply.kind, Kind::SetAppInfo);
        assert_eq!(reply.bool_arg("started"), Some(true));
        assert_eq!(
            reply.str_list_arg("channels"),
            Some(vec!["business".to_string()])
        );

        bus.shutdown().await.unwrap();
        bus.join().await;
    }

    #[tokio::test]
    async fn test_get_sat_info_reply_reaches_requester() {
        let (net, mut net_rx) = recorder(Channel::Network);
        let (biz, mut biz_rx) = recorder(Channel::Business);
        let bus = BusBuilder::new().attach(net).attach(biz).start();
        next(&mut net_rx).await;
        next(&mut biz_rx).await;

        bus.post(
            Channel::Business,
            Envelope::new(Kind::GetSatInfo).to(Channel::Network),
        )
        .await
        .unwrap();
        let reply = next(&mut biz_rx).await;
        assert_eq!(reply.kind, Kind::SetSatInfo);
        assert_eq!(reply.str_arg("channel"), Some("network"));
        assert_eq!(reply.source, Some(Channel::Network));

        bus.shutdown().await.unwrap();
        bus.join().await;
    }

    #[tokio::test]
    async fn test_posting_after_close_fails() {
        let (biz, _biz_rx) = recorder(Channel::Business);
        let bus = BusBuilder::new().attach(biz).start();
        let poster = bus.poster();
        bus.shutdown().await.unwrap();
        bus.join().await;
        assert!(matches!(
            poster.post(Channel::Business, Envelope::new(Kind::GetAppInfo)).await,
            Err(BusError::Stopped)
        ));
    }
}
