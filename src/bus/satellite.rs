//! Satellite contract and dispatch loop.
//!
//! A satellite owns its state and sees the rest of the process only through
//! envelopes. The bus runs one dispatch loop per satellite:
//!
//! ```text
//! on_start ─► report ready ─► loop {
//!                               SHUTDOWN                  → stop
//!                               SET_APP_INFO{threads_started} → on_threads_started
//!                               GET_SAT_INFO              → reply SET_SAT_INFO
//!                               other                     → handle
//!                             }
//!                           ─► cancel deferred actions ─► on_shutdown
//! ```
//!
//! Handler errors are logged; they never stop the loop.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::deferred::{ActionId, DeferredActions};
use super::envelope::{Channel, Envelope, Kind};
use super::error::{BusError, BusResult};

/// Argument of the readiness report and broadcast.
pub const THREADS_READY: &str = "threads_ready";
/// Argument of the `SET_APP_INFO` broadcast fired once every satellite is ready.
pub const THREADS_STARTED: &str = "threads_started";

/// Component attached to the bus.
#[async_trait]
pub trait Satellite: Send + 'static {
    /// Slot this satellite occupies.
    fn channel(&self) -> Channel;

    /// Called before the loop starts; spawn child tasks here.
    async fn on_start(&mut self, _ctx: &SatelliteContext) -> BusResult<()> {
        Ok(())
    }

    /// Called once every attached satellite reported ready.
    async fn on_threads_started(&mut self, _ctx: &SatelliteContext) -> BusResult<()> {
        Ok(())
    }

    /// Handle one envelope routed to this satellite.
    async fn handle(&mut self, envelope: Envelope, ctx: &SatelliteContext) -> BusResult<()>;

    /// Called after the loop stopped and deferred actions were cancelled.
    async fn on_shutdown(&mut self, _ctx: &SatelliteContext) {}

    /// Free-form state reported in answer to `GET_SAT_INFO`.
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// Handle a satellite uses to talk to the bus.
#[derive(Debug, Clone)]
pub struct SatelliteContext {
    channel: Channel,
    outbound: mpsc::Sender<Envelope>,
    deferred: DeferredActions,
}

impl SatelliteContext {
    /// Context for a satellite posting on `outbound`; deferred actions come
    /// back through `inbound`.
    pub fn new(
        channel: Channel,
        outbound: mpsc::Sender<Envelope>,
        inbound: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            channel,
            outbound,
            deferred: DeferredActions::new(inbound),
        }
    }

    /// Channel of the owning satellite.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Post `envelope` to the switchboard.
    pub async fn emit(&self, mut envelope: Envelope) -> BusResult<()> {
        envelope.source = Some(self.channel);
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| BusError::Stopped)
    }

    /// Deliver `envelope` back to this satellite after `delay`.
    pub fn delay_action(&self, delay: Duration, envelope: Envelope) -> ActionId {
        self.deferred.schedule(delay, envelope)
    }

    /// Cancel a pending deferred action.
    pub fn cancel_action(&self, id: ActionId) -> bool {
        self.deferred.cancel(id)
    }

    /// Number of pending deferred actions.
    pub fn pending_actions(&self) -> usize {
        self.deferred.pending()
    }

    /// Tell the bus this satellite's child tasks are running.
    pub async fn report_ready(&self) -> BusResult<()> {
        self.emit(Envelope::new(Kind::SetSatInfo).with(THREADS_READY, true))
            .await
    }

    fn cancel_all(&self) -> usize {
        self.deferred.cancel_all()
    }
}

/// Dispatch loop of one satellite.
pub(crate) async fn run_satellite(
    mut satellite: Box<dyn Satellite>,
    ctx: SatelliteContext,
    mut inbound: mpsc::Receiver<Envelope>,
) {
    let channel = ctx.channel();
    if let Err(e) = satellite.on_start(&ctx).await {
        log::error!("[Bus] {channel} failed to start: {e}");
    }
    if let Err(e) = ctx.report_ready().await {
        log::warn!("[Bus] {channel} could not report ready: {e}");
    }
    log::debug!("[Bus] {channel} loop started");

    while let Some(envelope) = inbound.recv().await {
        log::trace!("[Bus] {channel} <- {envelope}");
        let kind = envelope.kind;
        let result = match kind {
            Kind::Shutdown => break,
            Kind::SetAppInfo if envelope.bool_arg(THREADS_STARTED) == Some(true) => {
                satellite.on_threads_started(&ctx).await
            }
            Kind::GetSatInfo => {
                let mut reply = Envelope::new(Kind::SetSatInfo)
                    .with("channel", channel.as_str())
                    .with("pending_actions", ctx.pending_actions())
                    .with("info", satellite.describe());
                reply.target = envelope.source;
                ctx.emit(reply).await
            }
            _ => satellite.handle(envelope, &ctx).await,
        };
        if let Err(e) = result {
            log::warn!("[Bus] {channel} failed to handle {kind}: {e}");
        }
    }

    let cancelled = ctx.cancel_all();
    log::debug!("[Bus] {channel} loop stopped ({cancelled} action(s) cancelled)");
    satellite.on_shutdown(&ctx).await;
}
