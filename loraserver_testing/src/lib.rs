//! Utilities for driving the `loraserver` pipeline in integration tests.
//!
//! The harness wires in-memory stores and channel backends into a
//! [`Context`](loraserver::Context); [`DeviceSim`] produces the frames a real
//! device would send.
//!
//! ```rust
//! use loraserver_testing::{TestContext, TestResult, device_sim, join_device};
//!
//! # async fn example() -> TestResult {
//! let mut harness = TestContext::new();
//! let mut device = device_sim(1);
//! harness.provision(&device)?;
//! let accept = join_device(&mut harness, &mut device).await?;
//! assert_eq!(accept.net_id, harness.ctx.config.net_id());
//! # Ok(())
//! # }
//! ```

pub mod backends;

use std::time::Duration;

pub use backends::FailingClose;
pub use loraserver::test_helpers::{
    DeviceSim,
    SimError,
    TEST_NET_ID,
    TEST_SESSION_TTL,
    TestContext,
    TestContextBuilder,
    Uplink,
    mac_payload,
    rx_info,
    rx_packet,
    tx_payload,
};
use loraserver::{
    lorawan::{AesKey, Eui64, JoinAcceptPayload},
    processor,
};
use rstest::fixture;
use tokio::{sync::mpsc::UnboundedReceiver, time::timeout};

/// Result type used by integration tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// How long [`recv_within`] waits before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Device `n` of application `0xa0..`, with a key unique to `n`.
#[must_use]
pub fn device_sim(n: u8) -> DeviceSim {
    DeviceSim::new(
        Eui64::new([0xd0, 0, 0, 0, 0, 0, 0, n]),
        Eui64::new([0xa0, 0, 0, 0, 0, 0, 0, 1]),
        AesKey::new([n; 16]),
    )
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn harness() -> TestContext { TestContext::new() }

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn device() -> DeviceSim { device_sim(1) }

/// Receive the next item, or `None` if nothing arrives within [`RECV_TIMEOUT`].
pub async fn recv_within<T>(rx: &mut UnboundedReceiver<T>) -> Option<T> {
    timeout(RECV_TIMEOUT, rx.recv()).await.ok().flatten()
}

/// Run a join exchange for `device` through the dispatcher and open the
/// resulting join-accept.
///
/// # Errors
///
/// Fails when the join is rejected or no join-accept reaches the gateway.
pub async fn join_device(
    harness: &mut TestContext,
    device: &mut DeviceSim,
) -> TestResult<JoinAcceptPayload> {
    let frame = device.join_request()?;
    processor::dispatch(&harness.ctx, rx_packet(frame, 1)).await?;
    let packet = harness.gateway.downlinks.try_recv()?;
    Ok(device.accept_join(&packet)?)
}
