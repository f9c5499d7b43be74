//! Pipeline loops pulling from the backends.

use std::sync::Arc;

use futures::future::BoxFuture;
use log::debug;
use tokio::{select, sync::Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::worker::{process_rx_packet, queue_mac_payload, queue_tx_payload, spawn_worker};
use crate::{
    context::Context,
    models::{MacPayload, RxPacket, TxPayload},
};

/// One inbound stream and the work done for each of its items.
pub(super) struct Pipeline<T> {
    pub name: &'static str,
    pub next: for<'a> fn(&'a Context) -> BoxFuture<'a, Option<T>>,
    pub work: fn(Arc<Context>, T) -> BoxFuture<'static, ()>,
}

fn next_rx_packet(ctx: &Context) -> BoxFuture<'_, Option<RxPacket>> {
    ctx.backends.gateway.receive()
}

fn next_tx_payload(ctx: &Context) -> BoxFuture<'_, Option<TxPayload>> {
    ctx.backends.application.receive()
}

fn next_mac_payload(ctx: &Context) -> BoxFuture<'_, Option<MacPayload>> {
    ctx.backends.controller.receive()
}

pub(super) const RX_PACKETS: Pipeline<RxPacket> = Pipeline {
    name: "rx_packets",
    next: next_rx_packet,
    work: process_rx_packet,
};

pub(super) const TX_PAYLOADS: Pipeline<TxPayload> = Pipeline {
    name: "tx_payloads",
    next: next_tx_payload,
    work: queue_tx_payload,
};

pub(super) const MAC_PAYLOADS: Pipeline<MacPayload> = Pipeline {
    name: "mac_payloads",
    next: next_mac_payload,
    work: queue_mac_payload,
};

/// Handles shared by the three pipeline loops.
#[derive(Clone)]
pub(super) struct PipelineOptions {
    pub ctx: Arc<Context>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub max_in_flight: usize,
}

/// Pull items until the backend's sequence ends or `shutdown` is cancelled,
/// spawning one tracked worker per item.
///
/// At most `max_in_flight` workers of this pipeline run at once; while the
/// limit is reached the loop stops pulling, leaving items buffered in the
/// backend.
pub(super) async fn run_pipeline<T: Send + 'static>(pipeline: Pipeline<T>, options: PipelineOptions) {
    let PipelineOptions {
        ctx,
        shutdown,
        tracker,
        max_in_flight,
    } = options;
    let permits = Arc::new(Semaphore::new(max_in_flight));
    loop {
        let permit = select! {
            biased;
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let item = select! {
            biased;
            () = shutdown.cancelled() => break,
            item = (pipeline.next)(&ctx) => match item {
                Some(item) => item,
                None => break,
            },
        };
        spawn_worker(
            pipeline.name,
            (pipeline.work)(Arc::clone(&ctx), item),
            permit,
            &tracker,
        );
    }
    debug!("{} pipeline stopped", pipeline.name);
}
