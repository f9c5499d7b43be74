//! Per-item workers spawned by the pipelines.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use log::error;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::{
    context::Context,
    metrics,
    models::{MacPayload, RxPacket, TxPayload},
    processor,
};

/// Spawn `work` on `tracker`, logging and discarding any panic.
///
/// The permit is held until the worker finishes.
pub(super) fn spawn_worker(
    pipeline: &'static str,
    work: BoxFuture<'static, ()>,
    permit: OwnedSemaphorePermit,
    tracker: &TaskTracker,
) {
    metrics::inc_workers(pipeline);
    tracker.spawn(async move {
        let _permit = permit;
        if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
            metrics::inc_worker_panics(pipeline);
            let panic_msg = panic_message(&*panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("worker panicked: pipeline={pipeline}, panic={panic_msg}");
            tracing::error!(pipeline, panic = %panic_msg, "worker panicked");
        }
        metrics::dec_workers(pipeline);
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Dispatch one received frame.
pub(super) fn process_rx_packet(ctx: Arc<Context>, packet: RxPacket) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let data_base64 = packet.phy_payload.to_base64();
        if let Err(err) = processor::dispatch(&ctx, packet).await {
            metrics::inc_processing_errors(err.kind());
            if err.is_security_event() {
                warn!(%data_base64, kind = err.kind(), error = %err, "rx packet rejected");
            } else {
                tracing::error!(%data_base64, kind = err.kind(), error = %err, "processing rx packet error");
            }
        }
    })
}

/// Queue one application payload.
pub(super) fn queue_tx_payload(ctx: Arc<Context>, payload: TxPayload) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let (dev_eui, reference) = (payload.dev_eui, payload.reference.clone());
        match ctx.stores.queues.enqueue_tx_payload(payload).await {
            Ok(()) => metrics::inc_payloads_queued("tx_payload"),
            Err(err) => {
                metrics::inc_processing_errors("storage");
                tracing::error!(%dev_eui, %reference, error = %err, "add tx-payload to queue error");
            }
        }
    })
}

/// Queue one MAC command.
pub(super) fn queue_mac_payload(ctx: Arc<Context>, payload: MacPayload) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let (dev_eui, reference) = (payload.dev_eui, payload.reference.clone());
        match ctx.stores.queues.enqueue_mac_payload(payload).await {
            Ok(()) => metrics::inc_payloads_queued("mac_payload"),
            Err(err) => {
                metrics::inc_processing_errors("storage");
                tracing::error!(%dev_eui, %reference, error = %err, "add tx mac-payload to queue error");
            }
        }
    })
}
