//! Routing of received frames by message type.

use loraserver::{
    ProcessingError,
    lorawan::{FramePayload, MType, Mhdr, PhyPayload},
    processor,
};
use loraserver_testing::{DeviceSim, TestContext, TestResult, device, harness, rx_packet};
use rstest::rstest;

fn frame_of(mtype: MType) -> PhyPayload {
    PhyPayload {
        mhdr: Mhdr::new(mtype),
        payload: FramePayload::Opaque(vec![0xde, 0xad, 0xbe, 0xef]),
        mic: [0; 4],
    }
}

#[rstest]
#[case(MType::JoinAccept)]
#[case(MType::UnconfirmedDataDown)]
#[case(MType::ConfirmedDataDown)]
#[case(MType::RejoinRequest)]
#[case(MType::Proprietary)]
#[tokio::test]
async fn unsupported_types_are_dropped_untouched(
    #[case] mtype: MType,
    mut harness: TestContext,
    device: DeviceSim,
) -> TestResult {
    harness.provision(&device)?;

    let err = processor::dispatch(&harness.ctx, rx_packet(frame_of(mtype), 1))
        .await
        .expect_err("unsupported type must fail");

    assert!(matches!(err, ProcessingError::UnsupportedMessageType(t) if t == mtype));
    assert_eq!(err.kind(), "unsupported_message_type");
    assert!(!err.is_security_event());
    assert!(harness.sessions.is_empty());
    assert!(harness.gateway.downlinks.try_recv().is_err());
    assert!(harness.application.uplinks.try_recv().is_err());
    assert!(harness.controller.uplinks.try_recv().is_err());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn join_requests_reach_the_join_processor(
    mut harness: TestContext,
    mut device: DeviceSim,
) -> TestResult {
    harness.provision(&device)?;

    processor::dispatch(&harness.ctx, rx_packet(device.join_request()?, 1)).await?;

    assert_eq!(harness.sessions.len(), 1);
    assert!(harness.gateway.downlinks.try_recv().is_ok());
    Ok(())
}
