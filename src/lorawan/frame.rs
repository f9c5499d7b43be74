//! PHYPayload layout: MHDR, join and data payloads, MIC.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::{
    AesKey,
    AppNonce,
    DevAddr,
    Direction,
    Eui64,
    FrameError,
    MType,
    NetId,
    crypto,
};

/// Four-byte message integrity code.
pub type Mic = [u8; 4];

const MHDR_LEN: usize = 1;
const MIC_LEN: usize = 4;
const JOIN_REQUEST_LEN: usize = 18;
const JOIN_ACCEPT_LEN: usize = 12;
const CF_LIST_LEN: usize = 16;
const FHDR_MIN_LEN: usize = 7;
const MAX_FOPTS_LEN: usize = 15;
const MAX_CF_LIST_CHANNELS: usize = 5;

/// LoRaWAN major version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Major {
    #[default]
    LoRaWanR1,
}

/// MAC header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mhdr {
    pub mtype: MType,
    pub major: Major,
}

impl Mhdr {
    #[must_use]
    pub fn new(mtype: MType) -> Self {
        Self {
            mtype,
            major: Major::LoRaWanR1,
        }
    }

    fn to_byte(self) -> u8 { self.mtype.bits() << 5 }

    fn from_byte(byte: u8) -> Result<Self, FrameError> {
        let major = byte & 0x03;
        if major != 0 {
            return Err(FrameError::UnsupportedMajor(major));
        }
        Ok(Self::new(MType::from_bits(byte >> 5)))
    }
}

/// Join-request body sent by a device asking to be activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: u16,
}

impl JoinRequestPayload {
    fn to_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.app_eui.to_le_bytes());
        out.extend_from_slice(&self.dev_eui.to_le_bytes());
        out.extend_from_slice(&self.dev_nonce.to_le_bytes());
    }

    fn from_bytes(body: &[u8]) -> Result<Self, FrameError> {
        let body: &[u8; JOIN_REQUEST_LEN] = body.try_into().map_err(|_| FrameError::Truncated {
            needed: JOIN_REQUEST_LEN,
            actual: body.len(),
        })?;
        let mut app_eui = [0; 8];
        let mut dev_eui = [0; 8];
        app_eui.copy_from_slice(&body[..8]);
        dev_eui.copy_from_slice(&body[8..16]);
        Ok(Self {
            app_eui: Eui64::from_le_bytes(app_eui),
            dev_eui: Eui64::from_le_bytes(dev_eui),
            dev_nonce: u16::from_le_bytes([body[16], body[17]]),
        })
    }
}

/// Downlink settings carried by a join-accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DlSettings {
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
}

impl DlSettings {
    fn to_byte(self) -> u8 { ((self.rx1_dr_offset & 0x07) << 4) | (self.rx2_data_rate & 0x0f) }

    fn from_byte(byte: u8) -> Self {
        Self {
            rx1_dr_offset: (byte >> 4) & 0x07,
            rx2_data_rate: byte & 0x0f,
        }
    }
}

/// Optional list of up to five extra channel frequencies (Hz).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CfList(pub Vec<u32>);

impl CfList {
    fn to_bytes(&self, out: &mut Vec<u8>) {
        let mut block = [0u8; CF_LIST_LEN];
        for (slot, freq) in block
            .chunks_exact_mut(3)
            .zip(self.0.iter().take(MAX_CF_LIST_CHANNELS))
        {
            slot.copy_from_slice(&(freq / 100).to_le_bytes()[..3]);
        }
        out.extend_from_slice(&block);
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let channels = bytes
            .chunks_exact(3)
            .take(MAX_CF_LIST_CHANNELS)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], 0]) * 100)
            .filter(|freq| *freq != 0)
            .collect();
        Self(channels)
    }
}

/// Join-accept body returned to an activated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinAcceptPayload {
    pub app_nonce: AppNonce,
    pub net_id: NetId,
    pub dev_addr: DevAddr,
    pub dl_settings: DlSettings,
    pub rx_delay: u8,
    pub cf_list: Option<CfList>,
}

impl JoinAcceptPayload {
    fn to_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.app_nonce.to_le_bytes());
        out.extend_from_slice(&self.net_id.to_le_bytes());
        out.extend_from_slice(&self.dev_addr.to_le_bytes());
        out.push(self.dl_settings.to_byte());
        out.push(self.rx_delay);
        if let Some(cf_list) = &self.cf_list {
            cf_list.to_bytes(out);
        }
    }

    fn from_bytes(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < JOIN_ACCEPT_LEN {
            return Err(FrameError::Truncated {
                needed: JOIN_ACCEPT_LEN,
                actual: body.len(),
            });
        }
        let cf_list = (body.len() >= JOIN_ACCEPT_LEN + CF_LIST_LEN)
            .then(|| CfList::from_bytes(&body[JOIN_ACCEPT_LEN..JOIN_ACCEPT_LEN + CF_LIST_LEN]));
        Ok(Self {
            app_nonce: AppNonce::from_le_bytes([body[0], body[1], body[2]]),
            net_id: NetId::from_le_bytes([body[3], body[4], body[5]]),
            dev_addr: DevAddr::from_le_bytes([body[6], body[7], body[8], body[9]]),
            dl_settings: DlSettings::from_byte(body[10]),
            rx_delay: body[11],
            cf_list,
        })
    }

    /// Sign and encrypt with the device root key, returning the PHYPayload bytes.
    ///
    /// The network server applies the AES *decrypt* operation so the device
    /// only needs the encrypt primitive to open the message.
    #[must_use]
    pub fn seal(&self, root_key: &AesKey) -> Vec<u8> {
        let mhdr = Mhdr::new(MType::JoinAccept).to_byte();
        let mut plain = Vec::with_capacity(JOIN_ACCEPT_LEN + CF_LIST_LEN + MIC_LEN);
        self.to_bytes(&mut plain);
        let mic = crypto::compute_mic(root_key, &[&[mhdr][..], &plain[..]]);
        plain.extend_from_slice(&mic);

        let mut out = Vec::with_capacity(MHDR_LEN + plain.len());
        out.push(mhdr);
        out.extend(crypto::aes_decrypt_blocks(root_key, &plain));
        out
    }

    /// Decrypt and verify a sealed join-accept, as a device would.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] for short input and
    /// [`FrameError::InvalidMic`] when the integrity check fails.
    pub fn open(bytes: &[u8], root_key: &AesKey) -> Result<Self, FrameError> {
        let needed = MHDR_LEN + JOIN_ACCEPT_LEN + MIC_LEN;
        let Some((&mhdr, cipher)) = bytes.split_first() else {
            return Err(FrameError::Truncated {
                needed,
                actual: 0,
            });
        };
        if bytes.len() < needed || cipher.len() % 16 != 0 {
            return Err(FrameError::Truncated {
                needed,
                actual: bytes.len(),
            });
        }
        let plain = crypto::aes_encrypt_blocks(root_key, cipher);
        let (body, mic) = plain.split_at(plain.len() - MIC_LEN);
        if !crypto::verify_mic(root_key, &[&[mhdr][..], body], mic) {
            return Err(FrameError::InvalidMic);
        }
        Self::from_bytes(body)
    }
}

/// Frame control octet of a data frame.
#[expect(
    clippy::struct_excessive_bools,
    reason = "mirrors the FCtrl bit field one flag per bit"
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
}

impl FCtrl {
    fn to_byte(self, fopts_len: usize) -> u8 {
        let mut byte = u8::try_from(fopts_len.min(MAX_FOPTS_LEN)).unwrap_or(0x0f);
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    fn from_byte(byte: u8) -> (Self, usize) {
        let fctrl = Self {
            adr: byte & 0x80 != 0,
            adr_ack_req: byte & 0x40 != 0,
            ack: byte & 0x20 != 0,
            f_pending: byte & 0x10 != 0,
        };
        (fctrl, usize::from(byte & 0x0f))
    }
}

/// Frame header of a data frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fhdr {
    pub dev_addr: DevAddr,
    pub fctrl: FCtrl,
    /// Least significant 16 bits of the frame counter.
    pub fcnt: u16,
    /// Piggy-backed MAC commands; at most 15 bytes are encoded.
    pub fopts: Vec<u8>,
}

/// Body of a data frame. `frm_payload` holds the bytes as sent on air.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPayload {
    pub fhdr: Fhdr,
    pub fport: Option<u8>,
    pub frm_payload: Vec<u8>,
}

impl DataPayload {
    fn to_bytes(&self, out: &mut Vec<u8>) {
        debug_assert!(
            self.fhdr.fopts.len() <= MAX_FOPTS_LEN,
            "FOpts must not exceed 15 bytes"
        );
        let fopts = &self.fhdr.fopts[..self.fhdr.fopts.len().min(MAX_FOPTS_LEN)];
        out.extend_from_slice(&self.fhdr.dev_addr.to_le_bytes());
        out.push(self.fhdr.fctrl.to_byte(fopts.len()));
        out.extend_from_slice(&self.fhdr.fcnt.to_le_bytes());
        out.extend_from_slice(fopts);
        if let Some(fport) = self.fport {
            out.push(fport);
            out.extend_from_slice(&self.frm_payload);
        }
    }

    fn from_bytes(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < FHDR_MIN_LEN {
            return Err(FrameError::Truncated {
                needed: FHDR_MIN_LEN,
                actual: body.len(),
            });
        }
        let (fctrl, fopts_len) = FCtrl::from_byte(body[4]);
        let fhdr_len = FHDR_MIN_LEN + fopts_len;
        if body.len() < fhdr_len {
            return Err(FrameError::Truncated {
                needed: fhdr_len,
                actual: body.len(),
            });
        }
        let fhdr = Fhdr {
            dev_addr: DevAddr::from_le_bytes([body[0], body[1], body[2], body[3]]),
            fctrl,
            fcnt: u16::from_le_bytes([body[5], body[6]]),
            fopts: body[FHDR_MIN_LEN..fhdr_len].to_vec(),
        };
        let (fport, frm_payload) = match body[fhdr_len..].split_first() {
            Some((&fport, rest)) => (Some(fport), rest.to_vec()),
            None => (None, Vec::new()),
        };
        Ok(Self {
            fhdr,
            fport,
            frm_payload,
        })
    }

    /// Decrypt (or encrypt; the operation is symmetric) the FRMPayload.
    #[must_use]
    pub fn crypt_frm_payload(&self, key: &AesKey, direction: Direction, full_fcnt: u32) -> Vec<u8> {
        crypto::crypt_frm_payload(
            key,
            direction,
            self.fhdr.dev_addr,
            full_fcnt,
            &self.frm_payload,
        )
    }
}

/// Decoded body of a PHYPayload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramePayload {
    JoinRequest(JoinRequestPayload),
    Data(DataPayload),
    /// Bodies the server does not decode on receipt (join-accept,
    /// rejoin-request and proprietary frames).
    Opaque(Vec<u8>),
}

/// A complete LoRaWAN radio frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhyPayload {
    pub mhdr: Mhdr,
    pub payload: FramePayload,
    pub mic: Mic,
}

impl PhyPayload {
    /// Decode a frame from its on-air bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the input is truncated or uses an
    /// unsupported major version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let needed = MHDR_LEN + MIC_LEN;
        if bytes.len() < needed {
            return Err(FrameError::Truncated {
                needed,
                actual: bytes.len(),
            });
        }
        let mhdr = Mhdr::from_byte(bytes[0])?;
        let (body, mic) = bytes[MHDR_LEN..].split_at(bytes.len() - needed);
        let payload = match mhdr.mtype {
            MType::JoinRequest => FramePayload::JoinRequest(JoinRequestPayload::from_bytes(body)?),
            mtype if mtype.is_data() => FramePayload::Data(DataPayload::from_bytes(body)?),
            _ => FramePayload::Opaque(body.to_vec()),
        };
        Ok(Self {
            mhdr,
            payload,
            mic: [mic[0], mic[1], mic[2], mic[3]],
        })
    }

    /// Encode the frame, MIC included.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.signed_bytes();
        out.extend_from_slice(&self.mic);
        out
    }

    /// Base64 rendering of the frame used in diagnostics.
    #[must_use]
    pub fn to_base64(&self) -> String { STANDARD.encode(self.to_bytes()) }

    /// Bytes covered by the MIC: MHDR and payload.
    fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(self.mhdr.to_byte());
        match &self.payload {
            FramePayload::JoinRequest(jr) => jr.to_bytes(&mut out),
            FramePayload::Data(data) => data.to_bytes(&mut out),
            FramePayload::Opaque(body) => out.extend_from_slice(body),
        }
        out
    }

    /// Message type declared by the MHDR.
    #[must_use]
    pub fn mtype(&self) -> MType { self.mhdr.mtype }

    /// Verify the MIC of a join-request against the device root key.
    #[must_use]
    pub fn validate_join_mic(&self, root_key: &AesKey) -> bool {
        matches!(self.payload, FramePayload::JoinRequest(_))
            && crypto::verify_mic(root_key, &[&self.signed_bytes()[..]], &self.mic)
    }

    /// Compute and store the MIC of a join-request.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnexpectedPayload`] for frames that are not join-requests.
    pub fn set_join_mic(&mut self, root_key: &AesKey) -> Result<(), FrameError> {
        if !matches!(self.payload, FramePayload::JoinRequest(_)) {
            return Err(FrameError::UnexpectedPayload(self.mhdr.mtype));
        }
        self.mic = crypto::compute_mic(root_key, &[&self.signed_bytes()[..]]);
        Ok(())
    }

    /// Verify the MIC of a data frame using the network session key and the
    /// reconstructed 32-bit frame counter.
    #[must_use]
    pub fn validate_data_mic(&self, direction: Direction, nwk_s_key: &AesKey, full_fcnt: u32) -> bool {
        let FramePayload::Data(data) = &self.payload else {
            return false;
        };
        let msg = self.signed_bytes();
        crypto::data_mic_block(direction, data.fhdr.dev_addr, full_fcnt, msg.len())
            .is_ok_and(|b0| crypto::verify_mic(nwk_s_key, &[&b0[..], &msg[..]], &self.mic))
    }

    /// Compute and store the MIC of a data frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnexpectedPayload`] for non-data frames and
    /// [`FrameError::PayloadTooLarge`] when the frame exceeds 255 bytes.
    pub fn set_data_mic(
        &mut self,
        direction: Direction,
        nwk_s_key: &AesKey,
        full_fcnt: u32,
    ) -> Result<(), FrameError> {
        let FramePayload::Data(data) = &self.payload else {
            return Err(FrameError::UnexpectedPayload(self.mhdr.mtype));
        };
        let msg = self.signed_bytes();
        let b0 = crypto::data_mic_block(direction, data.fhdr.dev_addr, full_fcnt, msg.len())?;
        self.mic = crypto::compute_mic(nwk_s_key, &[&b0[..], &msg[..]]);
        Ok(())
    }
}
