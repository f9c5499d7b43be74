//! Activation of devices through join-requests.

use std::time::Duration;

use tracing::{debug, info};

use crate::{
    context::Context,
    error::ProcessingError,
    lorawan::{
        AppNonce,
        CfList,
        DevAddr,
        DlSettings,
        FrameError,
        FramePayload,
        JoinAcceptPayload,
        JoinRequestPayload,
        derive_session_keys,
    },
    metrics,
    models::{AdrState, Node, NodeSession, RxInfo, RxPacket, RxPacketSet, TxInfo, TxPacket},
    storage::{StorageError, create_with_new_address},
};

/// Transmit power (dBm) of join-accepts.
pub const JOIN_ACCEPT_TX_POWER: i32 = 14;

/// Collect the receptions of a join-request and process the set.
///
/// Returns `Ok(None)` when another worker owns the collection of this frame.
///
/// # Errors
///
/// See [`process_join_request`].
pub async fn handle_join_request(
    ctx: &Context,
    packet: RxPacket,
) -> Result<Option<NodeSession>, ProcessingError> {
    match ctx.collector.collect(packet).await {
        Some(set) => process_join_request(ctx, &set).await.map(Some),
        None => Ok(None),
    }
}

/// Activate the device behind a collected join-request.
///
/// On success the new session is stored (replacing the device's previous
/// one), the device's pending queues are flushed and a join-accept is handed
/// to the gateway with the strongest reception.
///
/// # Errors
///
/// - [`ProcessingError::NodeNotFound`] / [`ProcessingError::ApplicationNotFound`]
///   for unprovisioned identities, [`ProcessingError::ApplicationMismatch`]
///   when the request names another application than the node record.
/// - [`ProcessingError::Authentication`] when the MIC does not verify with the
///   node's root key.
/// - [`ProcessingError::DevNonceReused`] when the nonce was used recently.
/// - Storage and backend failures.
pub async fn process_join_request(
    ctx: &Context,
    set: &RxPacketSet,
) -> Result<NodeSession, ProcessingError> {
    let FramePayload::JoinRequest(request) = &set.phy_payload.payload else {
        return Err(FrameError::UnexpectedPayload(set.phy_payload.mtype()).into());
    };
    let JoinRequestPayload {
        app_eui,
        dev_eui,
        dev_nonce,
    } = *request;
    let registry = &ctx.stores.registry;

    let node = registry
        .node(dev_eui)
        .await
        .map_err(|e| not_found_as(e, ProcessingError::NodeNotFound(dev_eui)))?;
    if !set.phy_payload.validate_join_mic(&node.app_key) {
        return Err(ProcessingError::Authentication(format!(
            "join-request of {dev_eui}"
        )));
    }
    if node.app_eui != app_eui {
        return Err(ProcessingError::ApplicationMismatch {
            dev_eui,
            expected: node.app_eui,
            received: app_eui,
        });
    }
    registry
        .application(app_eui)
        .await
        .map_err(|e| not_found_as(e, ProcessingError::ApplicationNotFound(app_eui)))?;
    let rx = set.best_rx_info().ok_or(ProcessingError::MissingRxInfo)?;
    let cf_list = match node.channel_list_id {
        Some(id) => Some(CfList(registry.channel_list(id).await?.channels)),
        None => None,
    };

    let _guard = ctx.device_locks.lock(dev_eui).await;
    let used_dev_nonces = match ctx.stores.sessions.get_by_dev_eui(dev_eui).await {
        Ok(previous) => previous.used_dev_nonces,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    if used_dev_nonces.contains(&dev_nonce) {
        return Err(ProcessingError::DevNonceReused { dev_eui, dev_nonce });
    }

    let net_id = ctx.config.net_id();
    let app_nonce = AppNonce::new(rand::random());
    let keys = derive_session_keys(&node.app_key, app_nonce, net_id, dev_nonce);
    let mut session = NodeSession {
        dev_addr: DevAddr::default(),
        dev_eui,
        app_eui,
        nwk_s_key: keys.nwk_s_key,
        app_s_key: keys.app_s_key,
        fcnt_up: 0,
        fcnt_down: 0,
        rx_delay: node.rx_delay,
        rx1_dr_offset: node.rx1_dr_offset,
        adr: AdrState::default(),
        ack_pending: false,
        used_dev_nonces,
    };
    session.remember_dev_nonce(dev_nonce);
    let dev_addr =
        create_with_new_address(ctx.stores.sessions.as_ref(), net_id, &mut session).await?;
    ctx.stores.queues.flush_tx_payloads(dev_eui).await?;
    ctx.stores.queues.flush_mac_payloads(dev_eui).await?;

    let accept = JoinAcceptPayload {
        app_nonce,
        net_id,
        dev_addr,
        dl_settings: DlSettings {
            rx1_dr_offset: node.rx1_dr_offset,
            rx2_data_rate: ctx.config.rx2_data_rate(),
        },
        rx_delay: node.rx_delay,
        cf_list,
    };
    let packet = join_accept_packet(&node, &accept, rx, ctx.config.join_accept_delay());
    debug!(%dev_eui, gateway = %packet.tx_info.gateway, timestamp = packet.tx_info.timestamp, "sending join-accept");
    ctx.backends.gateway.send_tx_packet(packet).await?;
    metrics::inc_join_accepts();
    info!(%dev_eui, %dev_addr, gateway_count = set.rx_info.len(), "device activated");
    Ok(session)
}

fn not_found_as(err: StorageError, not_found: ProcessingError) -> ProcessingError {
    if err.is_not_found() { not_found } else { err.into() }
}

/// Schedule the join-accept on the uplink channel of the strongest gateway.
fn join_accept_packet(
    node: &Node,
    accept: &JoinAcceptPayload,
    rx: &RxInfo,
    delay: Duration,
) -> TxPacket {
    let delay_us = u32::try_from(delay.as_micros()).unwrap_or(u32::MAX);
    TxPacket {
        tx_info: TxInfo {
            gateway: rx.gateway,
            immediately: false,
            timestamp: rx.timestamp.wrapping_add(delay_us),
            frequency: rx.frequency,
            power: JOIN_ACCEPT_TX_POWER,
            data_rate: rx.data_rate,
            code_rate: rx.code_rate.clone(),
        },
        phy_payload: accept.seal(&node.app_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lorawan::{AesKey, Eui64},
        models::DataRate,
    };

    #[test]
    fn join_accept_is_timed_relative_to_reception() {
        let node = Node {
            dev_eui: Eui64::new([1; 8]),
            app_eui: Eui64::new([2; 8]),
            app_key: AesKey::new([3; 16]),
            rx_delay: 1,
            rx1_dr_offset: 0,
            channel_list_id: None,
        };
        let rx = RxInfo {
            gateway: Eui64::new([9; 8]),
            timestamp: u32::MAX - 1_000,
            frequency: 868_300_000,
            data_rate: DataRate {
                spreading_factor: 9,
                bandwidth: 125,
            },
            code_rate: "4/5".to_owned(),
            rssi: -90,
            lora_snr: 3.0,
        };
        let accept = JoinAcceptPayload {
            app_nonce: AppNonce::new([1, 2, 3]),
            net_id: crate::lorawan::NetId::new([0, 0, 1]),
            dev_addr: crate::lorawan::DevAddr::new([2, 0, 0, 1]),
            dl_settings: DlSettings::default(),
            rx_delay: 1,
            cf_list: None,
        };
        let packet = join_accept_packet(&node, &accept, &rx, Duration::from_secs(5));

        assert_eq!(packet.tx_info.timestamp, 5_000_000 - 1_001);
        assert_eq!(packet.tx_info.gateway, rx.gateway);
        assert_eq!(packet.tx_info.frequency, rx.frequency);
        assert_eq!(packet.tx_info.power, JOIN_ACCEPT_TX_POWER);
        assert_eq!(
            JoinAcceptPayload::open(&packet.phy_payload, &node.app_key).expect("open"),
            accept
        );
    }
}
