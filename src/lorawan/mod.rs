//! LoRaWAN 1.0 frame codec consumed by the packet pipeline.
//!
//! Identifiers keep their human-readable (big-endian) byte order in memory and
//! are reversed only when written to, or read from, the air interface. The
//! codec is deliberately small: it understands the frames a network server
//! receives (join requests and data frames), produces join-accepts, and
//! provides the AES primitives needed to authenticate and decrypt them.

mod crypto;
mod frame;
mod mac;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crypto::{SessionKeys, derive_session_keys};
pub use frame::{
    CfList,
    DataPayload,
    DlSettings,
    FCtrl,
    Fhdr,
    FramePayload,
    JoinAcceptPayload,
    JoinRequestPayload,
    Major,
    Mhdr,
    Mic,
    PhyPayload,
};
pub use mac::split_uplink_commands;

/// Errors raised while decoding frames or identifier text.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The input ended before a complete structure could be read.
    #[error("frame truncated: need at least {needed} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes required.
        needed: usize,
        /// Number of bytes available.
        actual: usize,
    },
    /// The MHDR announced a major version other than LoRaWAN R1.
    #[error("unsupported major version {0}")]
    UnsupportedMajor(u8),
    /// Identifier text was not valid hex of the expected width.
    #[error("invalid identifier {input:?}: expected {expected} hex-encoded bytes")]
    InvalidIdentifier {
        /// Offending input.
        input: String,
        /// Expected number of bytes.
        expected: usize,
    },
    /// A MAC command identifier is not known for the uplink direction.
    #[error("unknown mac command identifier 0x{0:02x}")]
    UnknownMacCommand(u8),
    /// A MAC command was shorter than its identifier requires.
    #[error("mac command 0x{cid:02x} truncated")]
    TruncatedMacCommand {
        /// Command identifier.
        cid: u8,
    },
    /// The frame is too large to be covered by a data MIC block.
    #[error("frame of {0} bytes is too large to sign")]
    PayloadTooLarge(usize),
    /// An operation was attempted on a frame of the wrong kind.
    #[error("{0:?} frame does not carry the expected payload")]
    UnexpectedPayload(MType),
    /// A join-accept failed integrity verification when opened.
    #[error("invalid message integrity code")]
    InvalidMic,
}

/// LoRaWAN message type carried in the MHDR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    /// Decode the three most significant MHDR bits.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::JoinRequest,
            1 => Self::JoinAccept,
            2 => Self::UnconfirmedDataUp,
            3 => Self::UnconfirmedDataDown,
            4 => Self::ConfirmedDataUp,
            5 => Self::ConfirmedDataDown,
            6 => Self::RejoinRequest,
            _ => Self::Proprietary,
        }
    }

    /// Encode as the three most significant MHDR bits (unshifted).
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::JoinRequest => 0,
            Self::JoinAccept => 1,
            Self::UnconfirmedDataUp => 2,
            Self::UnconfirmedDataDown => 3,
            Self::ConfirmedDataUp => 4,
            Self::ConfirmedDataDown => 5,
            Self::RejoinRequest => 6,
            Self::Proprietary => 7,
        }
    }

    /// Returns true for the data message types laid out as FHDR/FPort/FRMPayload.
    #[must_use]
    pub fn is_data(self) -> bool {
        matches!(
            self,
            Self::UnconfirmedDataUp
                | Self::UnconfirmedDataDown
                | Self::ConfirmedDataUp
                | Self::ConfirmedDataDown
        )
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinRequest => "join_request",
            Self::JoinAccept => "join_accept",
            Self::UnconfirmedDataUp => "unconfirmed_data_up",
            Self::UnconfirmedDataDown => "unconfirmed_data_down",
            Self::ConfirmedDataUp => "confirmed_data_up",
            Self::ConfirmedDataDown => "confirmed_data_down",
            Self::RejoinRequest => "rejoin_request",
            Self::Proprietary => "proprietary",
        }
    }
}

/// Direction of a data frame, as encoded in MIC and encryption blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Direction::Uplink => 0,
            Direction::Downlink => 1,
        }
    }
}

fn decode_hex<const N: usize>(input: &str) -> Result<[u8; N], FrameError> {
    let invalid = || FrameError::InvalidIdentifier {
        input: input.to_owned(),
        expected: N,
    };
    hex::decode(input)
        .map_err(|_| invalid())?
        .try_into()
        .map_err(|_| invalid())
}

fn reversed<const N: usize>(mut bytes: [u8; N]) -> [u8; N] {
    bytes.reverse();
    bytes
}

macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident, $len:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Construct from bytes in human-readable order.
            #[must_use]
            pub const fn new(bytes: [u8; $len]) -> Self { Self(bytes) }

            /// Bytes in human-readable order.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] { &self.0 }

            pub(crate) fn to_le_bytes(self) -> [u8; $len] { reversed(self.0) }

            pub(crate) fn from_le_bytes(bytes: [u8; $len]) -> Self { Self(reversed(bytes)) }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self { Self(bytes) }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }

        impl FromStr for $name {
            type Err = FrameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> { decode_hex(s).map(Self) }
        }
    };
}

hex_identifier!(
    /// 64-bit extended unique identifier of a device, application or gateway.
    Eui64,
    8
);

hex_identifier!(
    /// Dynamic device address assigned on activation.
    ///
    /// The seven most significant bits carry the network identifier
    /// (`NwkID`) of the network server that assigned the address.
    DevAddr,
    4
);

hex_identifier!(
    /// 24-bit network identifier; its seven least significant bits are the `NwkID`.
    NetId,
    3
);

hex_identifier!(
    /// Random nonce chosen by the server for a join-accept.
    AppNonce,
    3
);

impl DevAddr {
    /// Build an address from random bits, forcing the `NwkID` prefix.
    #[must_use]
    pub fn with_nwk_id(mut random: [u8; 4], nwk_id: u8) -> Self {
        random[0] = (random[0] & 0x01) | (nwk_id << 1);
        Self(random)
    }

    /// Network identifier encoded in the seven most significant bits.
    #[must_use]
    pub fn nwk_id(&self) -> u8 { self.0[0] >> 1 }
}

impl NetId {
    /// Seven-bit network identifier embedded in device addresses.
    #[must_use]
    pub fn nwk_id(&self) -> u8 { self.0[2] & 0x7f }
}

/// AES-128 key. `Debug` output never reveals key material.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AesKey(pub [u8; 16]);

impl AesKey {
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self { Self(bytes) }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] { &self.0 }
}

impl From<[u8; 16]> for AesKey {
    fn from(bytes: [u8; 16]) -> Self { Self(bytes) }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("AesKey(<redacted>)") }
}

impl FromStr for AesKey {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { decode_hex(s).map(Self) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn eui_round_trips_through_text() {
        let eui: Eui64 = "0102030405060708".parse().expect("valid eui");
        assert_eq!(eui.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(eui.to_string(), "0102030405060708");
        assert_eq!(format!("{eui:?}"), "Eui64(0102030405060708)");
    }

    #[rstest]
    #[case("01020304050607")]
    #[case("010203040506070809")]
    #[case("zz02030405060708")]
    fn eui_rejects_malformed_text(#[case] input: &str) {
        let err = input.parse::<Eui64>().expect_err("malformed eui must fail");
        assert!(matches!(err, FrameError::InvalidIdentifier { expected: 8, .. }));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = AesKey::new([0xaa; 16]);
        assert_eq!(format!("{key:?}"), "AesKey(<redacted>)");
    }

    #[rstest]
    #[case([0x00, 0x00, 0x01], 0x01)]
    #[case([0x00, 0x00, 0x7f], 0x7f)]
    #[case([0x12, 0x34, 0xff], 0x7f)]
    fn net_id_exposes_nwk_id(#[case] bytes: [u8; 3], #[case] expected: u8) {
        assert_eq!(NetId::new(bytes).nwk_id(), expected);
    }

    #[rstest]
    #[case([0xff, 0xff, 0xff, 0xff], 0x01)]
    #[case([0x00, 0x12, 0x34, 0x56], 0x7f)]
    #[case([0x01, 0x00, 0x00, 0x00], 0x00)]
    fn dev_addr_forces_nwk_id(#[case] random: [u8; 4], #[case] nwk_id: u8) {
        let addr = DevAddr::with_nwk_id(random, nwk_id);
        assert_eq!(addr.nwk_id(), nwk_id);
        assert_eq!(addr.0[1..], random[1..]);
        assert_eq!(addr.0[0] & 0x01, random[0] & 0x01);
    }

    #[test]
    fn mtype_bits_round_trip() {
        for bits in 0..8 {
            assert_eq!(MType::from_bits(bits).bits(), bits);
        }
    }
}
