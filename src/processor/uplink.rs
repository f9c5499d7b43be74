//! Authenticated data uplinks.

use tracing::{debug, warn};

use crate::{
    context::Context,
    error::ProcessingError,
    lorawan::{
        DataPayload,
        DevAddr,
        Direction,
        Eui64,
        FrameError,
        FramePayload,
        MType,
        split_uplink_commands,
    },
    models::{MacPayload, NodeSession, RxPacket, RxPacketSet, RxPayload, UplinkMeasurement},
    storage::StorageError,
};

/// Largest forward jump of the frame counter accepted in one frame.
pub const MAX_FCNT_GAP: u32 = 16_384;

/// First 32-bit counter after `stored` whose low 16 bits are `received`.
///
/// Falls back to `stored`'s own epoch when the next one would overflow, so
/// the result is then not ahead of `stored`.
fn candidate_fcnt(stored: u32, received: u16) -> u32 {
    let full = (stored & 0xffff_0000) | u32::from(received);
    if full > stored {
        full
    } else {
        full.checked_add(0x1_0000).unwrap_or(full)
    }
}

/// Expand the 16 counter bits carried on air to the full 32-bit counter
/// following `stored`, the last accepted counter.
///
/// Returns `None` when the frame does not advance the counter: equal to or
/// behind `stored`, further ahead than [`MAX_FCNT_GAP`], or past `u32::MAX`.
///
/// ```
/// use loraserver::processor::next_full_fcnt;
///
/// assert_eq!(next_full_fcnt(0, 1), Some(1));
/// assert_eq!(next_full_fcnt(0xffff, 2), Some(0x1_0002));
/// assert_eq!(next_full_fcnt(7, 7), None);
/// ```
#[must_use]
pub fn next_full_fcnt(stored: u32, received: u16) -> Option<u32> {
    let full = candidate_fcnt(stored, received);
    (full > stored && full - stored <= MAX_FCNT_GAP).then_some(full)
}

/// Collect the receptions of a data uplink and process the set.
///
/// Returns `Ok(None)` when another worker owns the collection of this frame.
///
/// # Errors
///
/// See [`process_data_up`].
pub async fn handle_data_up(
    ctx: &Context,
    packet: RxPacket,
) -> Result<Option<NodeSession>, ProcessingError> {
    match ctx.collector.collect(packet).await {
        Some(set) => process_data_up(ctx, &set).await.map(Some),
        None => Ok(None),
    }
}

/// Validate a collected data uplink against its session and forward its
/// contents.
///
/// The session is re-read, updated and saved under the device's lock, the
/// same lock joins take, so a frame counter is consumed exactly once and a
/// rejoin never races a counter update.
///
/// # Errors
///
/// - [`ProcessingError::SessionNotFound`] when no current session holds the
///   address.
/// - [`ProcessingError::Authentication`] when the MIC does not verify.
/// - [`ProcessingError::Replay`] when an authentic frame does not advance the
///   counter.
/// - [`ProcessingError::Frame`] when MAC commands cannot be split.
/// - Storage and backend failures.
pub async fn process_data_up(
    ctx: &Context,
    set: &RxPacketSet,
) -> Result<NodeSession, ProcessingError> {
    let phy = &set.phy_payload;
    let FramePayload::Data(data) = &phy.payload else {
        return Err(FrameError::UnexpectedPayload(phy.mtype()).into());
    };
    let dev_addr = data.fhdr.dev_addr;

    let dev_eui = ctx
        .stores
        .sessions
        .get(dev_addr)
        .await
        .map_err(|e| not_found_as_session(e, dev_addr))?
        .dev_eui;
    let _guard = ctx.device_locks.lock(dev_eui).await;
    let mut session = current_session(ctx, dev_eui, dev_addr).await?;

    let (stored, received) = (session.fcnt_up, data.fhdr.fcnt);
    let replay = || ProcessingError::Replay {
        dev_addr,
        stored,
        received,
    };
    let candidate = candidate_fcnt(stored, received);
    if !phy.validate_data_mic(Direction::Uplink, &session.nwk_s_key, candidate) {
        let earlier = (stored & 0xffff_0000) | u32::from(received);
        if earlier != candidate
            && phy.validate_data_mic(Direction::Uplink, &session.nwk_s_key, earlier)
        {
            return Err(replay());
        }
        return Err(ProcessingError::Authentication(format!(
            "data frame of {dev_addr}"
        )));
    }
    let full_fcnt = next_full_fcnt(stored, received).ok_or_else(replay)?;

    let commands = mac_commands(&session, data, full_fcnt)?;
    let confirmed = phy.mtype() == MType::ConfirmedDataUp;
    let best_rx = set.best_rx_info();
    let rx_payload = match data.fport {
        Some(fport) if fport > 0 => Some(RxPayload {
            dev_eui: session.dev_eui,
            app_eui: session.app_eui,
            fport,
            fcnt: full_fcnt,
            confirmed,
            adr: data.fhdr.fctrl.adr,
            gateway_count: set.rx_info.len(),
            rssi: best_rx.map(|rx| rx.rssi),
            data: data.crypt_frm_payload(&session.app_s_key, Direction::Uplink, full_fcnt),
        }),
        _ => None,
    };

    session.fcnt_up = full_fcnt;
    session.adr.enabled = data.fhdr.fctrl.adr;
    session.adr.ack_requested = data.fhdr.fctrl.adr_ack_req;
    session.adr.record(UplinkMeasurement {
        fcnt: full_fcnt,
        max_snr: set.max_snr().unwrap_or_default(),
        gateway_count: set.rx_info.len(),
    });
    if confirmed {
        session.ack_pending = true;
    }
    ctx.stores.sessions.save(session.clone()).await?;
    debug!(
        dev_eui = %session.dev_eui,
        %dev_addr,
        fcnt = full_fcnt,
        confirmed,
        gateway_count = set.rx_info.len(),
        "data uplink accepted"
    );

    if let Some(payload) = rx_payload {
        ctx.backends.application.send_rx_payload(payload).await?;
    }
    for command in commands {
        ctx.backends.controller.send_rx_mac_payload(command).await?;
    }
    Ok(session)
}

/// The device's current session, provided it still lives at `dev_addr`.
async fn current_session(
    ctx: &Context,
    dev_eui: Eui64,
    dev_addr: DevAddr,
) -> Result<NodeSession, ProcessingError> {
    match ctx.stores.sessions.get_by_dev_eui(dev_eui).await {
        Ok(session) if session.dev_addr == dev_addr => Ok(session),
        Ok(session) => {
            debug!(%dev_eui, %dev_addr, current = %session.dev_addr, "frame for a replaced session");
            Err(ProcessingError::SessionNotFound(dev_addr))
        }
        Err(e) => Err(not_found_as_session(e, dev_addr)),
    }
}

fn not_found_as_session(err: StorageError, dev_addr: DevAddr) -> ProcessingError {
    if err.is_not_found() {
        ProcessingError::SessionNotFound(dev_addr)
    } else {
        err.into()
    }
}

/// MAC commands carried by the frame: piggy-backed in FOpts (clear text) and
/// in a port-0 FRMPayload (encrypted with the network session key).
fn mac_commands(
    session: &NodeSession,
    data: &DataPayload,
    full_fcnt: u32,
) -> Result<Vec<MacPayload>, FrameError> {
    let fopts = &data.fhdr.fopts;
    if !fopts.is_empty() && data.fport == Some(0) {
        warn!(dev_eui = %session.dev_eui, "frame carries mac commands in both FOpts and FRMPayload");
    }
    let as_payload = |frm_payload: bool| {
        move |mac_command: Vec<u8>| MacPayload {
            dev_eui: session.dev_eui,
            reference: String::new(),
            frm_payload,
            mac_command,
        }
    };
    let mut commands: Vec<MacPayload> = split_uplink_commands(fopts)?
        .into_iter()
        .map(as_payload(false))
        .collect();
    if data.fport == Some(0) {
        let plain = data.crypt_frm_payload(&session.nwk_s_key, Direction::Uplink, full_fcnt);
        commands.extend(
            split_uplink_commands(&plain)?
                .into_iter()
                .map(as_payload(true)),
        );
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 1, Some(1))]
    #[case(0, 0, None)]
    #[case(5, 4, None)]
    #[case(5, 5, None)]
    #[case(0, 16_384, Some(16_384))]
    #[case(0, 16_385, None)]
    #[case(0x0001_fff0, 0x0005, Some(0x0002_0005))]
    #[case(u32::MAX - 2, 0xffff, Some(u32::MAX))]
    #[case(u32::MAX, 0x0000, None)]
    fn counter_expansion(#[case] stored: u32, #[case] received: u16, #[case] expected: Option<u32>) {
        assert_eq!(next_full_fcnt(stored, received), expected);
    }

    #[rstest]
    #[case(5, 6, 6)]
    #[case(5, 5, 0x1_0005)]
    #[case(0x0001_fff0, 0x0005, 0x0002_0005)]
    #[case(u32::MAX, 0x0000, 0xffff_0000)]
    fn candidate_is_next_epoch_unless_it_overflows(
        #[case] stored: u32,
        #[case] received: u16,
        #[case] expected: u32,
    ) {
        assert_eq!(candidate_fcnt(stored, received), expected);
    }

    proptest! {
        #[test]
        fn counters_within_gap_are_accepted(stored in any::<u32>(), delta in 1..=MAX_FCNT_GAP) {
            prop_assume!(stored.checked_add(delta).is_some());
            let next = stored + delta;
            #[allow(clippy::cast_possible_truncation)]
            let on_air = next as u16;
            prop_assert_eq!(next_full_fcnt(stored, on_air), Some(next));
        }

        #[test]
        fn counters_not_ahead_are_replays(stored in any::<u32>(), back in 0..49_152_u32) {
            #[allow(clippy::cast_possible_truncation)]
            let on_air = stored.wrapping_sub(back) as u16;
            prop_assert_eq!(next_full_fcnt(stored, on_air), None);
        }
    }
}
