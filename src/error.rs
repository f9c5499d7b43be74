//! Per-item processing errors.
//!
//! `ProcessingError` is the single error surface of the packet pipeline. Each
//! failure is terminal for the frame or payload being processed and is only
//! ever logged; none of them stops the server.

use thiserror::Error;

use crate::{
    backend::BackendError,
    lorawan::{DevAddr, Eui64, FrameError, MType},
    storage::StorageError,
};

/// Why a single inbound item was dropped.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Neither a join-request nor a data uplink.
    #[error("unsupported message type {}", .0.as_str())]
    UnsupportedMessageType(MType),
    /// The message integrity code did not verify.
    #[error("invalid message integrity code from {0}")]
    Authentication(String),
    /// The frame counter does not advance past the stored counter.
    #[error("frame counter {received} of {dev_addr} is a replay (last accepted {stored})")]
    Replay {
        dev_addr: DevAddr,
        /// Last accepted 32-bit counter.
        stored: u32,
        /// Counter bits carried on air.
        received: u16,
    },
    /// The join nonce was used by a recent activation of the device.
    #[error("dev-nonce {dev_nonce} already used by {dev_eui}")]
    DevNonceReused { dev_eui: Eui64, dev_nonce: u16 },
    #[error("node {0} is not provisioned")]
    NodeNotFound(Eui64),
    #[error("application {0} is not provisioned")]
    ApplicationNotFound(Eui64),
    /// The join-request names another application than the node record.
    #[error("node {dev_eui} belongs to application {expected}, not {received}")]
    ApplicationMismatch {
        dev_eui: Eui64,
        expected: Eui64,
        received: Eui64,
    },
    #[error("no active session for device address {0}")]
    SessionNotFound(DevAddr),
    /// A frame reached processing without any reception metadata.
    #[error("frame carries no reception metadata")]
    MissingRxInfo,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ProcessingError {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedMessageType(_) => "unsupported_message_type",
            Self::Authentication(_) => "authentication",
            Self::Replay { .. } => "replay",
            Self::DevNonceReused { .. } => "dev_nonce_reused",
            Self::NodeNotFound(_) | Self::ApplicationNotFound(_) | Self::SessionNotFound(_) => {
                "not_found"
            }
            Self::ApplicationMismatch { .. } => "application_mismatch",
            Self::MissingRxInfo | Self::Frame(_) => "malformed",
            Self::Storage(_) => "storage",
            Self::Backend(_) => "backend",
        }
    }

    /// Whether the failure points at a forged or replayed frame.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Replay { .. } | Self::DevNonceReused { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ProcessingError::Authentication("x".into()), "authentication", true)]
    #[case(
        ProcessingError::Replay { dev_addr: DevAddr::default(), stored: 1, received: 1 },
        "replay",
        true
    )]
    #[case(ProcessingError::NodeNotFound(Eui64::default()), "not_found", false)]
    #[case(ProcessingError::SessionNotFound(DevAddr::default()), "not_found", false)]
    #[case(
        ProcessingError::UnsupportedMessageType(MType::Proprietary),
        "unsupported_message_type",
        false
    )]
    fn errors_are_classified(
        #[case] err: ProcessingError,
        #[case] kind: &str,
        #[case] security: bool,
    ) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.is_security_event(), security);
    }

    #[test]
    fn unsupported_type_renders_label() {
        let err = ProcessingError::UnsupportedMessageType(MType::JoinAccept);
        assert_eq!(err.to_string(), "unsupported message type join_accept");
    }
}
