//! Processing of received radio frames.
//!
//! [`dispatch`] routes a frame by message type; the join and data-uplink
//! processors then collect the frame's receptions across gateways and
//! act on the collected set.

mod dispatch;
mod join;
mod uplink;

pub use dispatch::dispatch;
pub use join::{JOIN_ACCEPT_TX_POWER, handle_join_request, process_join_request};
pub use uplink::{MAX_FCNT_GAP, handle_data_up, next_full_fcnt, process_data_up};
