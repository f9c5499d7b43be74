use log::debug;

use super::{handle_data_up, handle_join_request};
use crate::{context::Context, error::ProcessingError, lorawan::MType, metrics, models::RxPacket};

/// Route `packet` to the processor for its message type.
///
/// Join-requests and data uplinks are processed; every other message type
/// fails with [`ProcessingError::UnsupportedMessageType`] before any store is
/// touched.
///
/// # Errors
///
/// Returns the processor's [`ProcessingError`] when the frame is dropped.
pub async fn dispatch(ctx: &Context, packet: RxPacket) -> Result<(), ProcessingError> {
    let mtype = packet.phy_payload.mtype();
    metrics::inc_frames_received(mtype.as_str());
    debug!(
        "rx packet: mtype={}, gateway={}",
        mtype.as_str(),
        packet.rx_info.gateway
    );
    match mtype {
        MType::JoinRequest => handle_join_request(ctx, packet).await.map(drop),
        MType::UnconfirmedDataUp | MType::ConfirmedDataUp => {
            handle_data_up(ctx, packet).await.map(drop)
        }
        other => Err(ProcessingError::UnsupportedMessageType(other)),
    }
}
