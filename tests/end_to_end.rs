//! A device joins, sends one uplink, then has the same uplink replayed.
//!
//! The join and the first uplink travel through the running server; the
//! replay is dispatched directly so its error can be inspected.

use std::sync::Arc;

use loraserver::{
    NetworkServer,
    ProcessingError,
    lorawan::{AesKey, Eui64},
    processor,
    storage::SessionStore,
};
use loraserver_testing::{
    DeviceSim,
    TEST_NET_ID,
    TestContext,
    TestResult,
    Uplink,
    recv_within,
    rx_packet,
};

#[tokio::test]
async fn join_uplink_and_replay() -> TestResult {
    let mut harness = TestContext::new();
    let mut device = DeviceSim::new(
        "00000000000000e1".parse::<Eui64>()?,
        "00000000000000a1".parse::<Eui64>()?,
        "2b7e151628aed2a6abf7158809cf4f3c".parse::<AesKey>()?,
    );
    harness.provision(&device)?;
    let running = NetworkServer::from_shared(Arc::clone(&harness.ctx)).start();

    harness
        .gateway
        .uplinks
        .send(rx_packet(device.join_request()?, 1))
        .await?;
    let accept = recv_within(&mut harness.gateway.downlinks)
        .await
        .ok_or("no join-accept")?;
    let accept = device.accept_join(&accept)?;
    let addr = accept.dev_addr;
    assert_eq!(addr.nwk_id(), TEST_NET_ID.nwk_id());
    let session = harness.sessions.get(addr).await?;
    assert_eq!((session.fcnt_up, session.fcnt_down), (0, 0));

    let frame = device.data_up(&Uplink::new(1, 2, b"temperature=21.5"))?;
    harness
        .gateway
        .uplinks
        .send(rx_packet(frame.clone(), 1))
        .await?;
    let payload = recv_within(&mut harness.application.uplinks)
        .await
        .ok_or("no payload forwarded")?;
    assert_eq!(payload.data, b"temperature=21.5");
    assert_eq!(payload.dev_eui, device.dev_eui);
    assert_eq!(harness.sessions.get(addr).await?.fcnt_up, 1);
    running.stop().await?;

    let err = processor::dispatch(&harness.ctx, rx_packet(frame, 1))
        .await
        .expect_err("replay must fail");
    assert!(matches!(err, ProcessingError::Replay { .. }));
    assert_eq!(harness.sessions.get(addr).await?.fcnt_up, 1);
    assert!(harness.application.uplinks.try_recv().is_err());
    Ok(())
}
