//! AES-128 primitives of the LoRaWAN 1.0 security scheme.

use aes::{
    Aes128,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray},
};
use cmac::{Cmac, Mac};

use super::{AesKey, AppNonce, DevAddr, Direction, FrameError, Mic, NetId};

const BLOCK_LEN: usize = 16;

/// Network and application session keys derived on activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionKeys {
    pub nwk_s_key: AesKey,
    pub app_s_key: AesKey,
}

/// Derive the session keys from the root key and the join nonces.
///
/// `NwkSKey = aes128_encrypt(AppKey, 0x01 | AppNonce | NetID | DevNonce | pad16)`
/// and `AppSKey` likewise with a leading `0x02`.
#[must_use]
pub fn derive_session_keys(
    root_key: &AesKey,
    app_nonce: AppNonce,
    net_id: NetId,
    dev_nonce: u16,
) -> SessionKeys {
    let cipher = cipher(root_key);
    let derive = |prefix: u8| {
        let mut block = [0u8; BLOCK_LEN];
        block[0] = prefix;
        block[1..4].copy_from_slice(&app_nonce.to_le_bytes());
        block[4..7].copy_from_slice(&net_id.to_le_bytes());
        block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
        AesKey::new(encrypt_block(&cipher, block))
    };
    SessionKeys {
        nwk_s_key: derive(0x01),
        app_s_key: derive(0x02),
    }
}

fn cipher(key: &AesKey) -> Aes128 { <Aes128 as KeyInit>::new(GenericArray::from_slice(key.as_bytes())) }

fn encrypt_block(cipher: &Aes128, block: [u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let mut buf = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; BLOCK_LEN];
    out.copy_from_slice(&buf);
    out
}

fn mac_over(key: &AesKey, parts: &[&[u8]]) -> Cmac<Aes128> {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key.as_bytes()));
    for part in parts {
        mac.update(part);
    }
    mac
}

/// First four bytes of the AES-CMAC over the concatenated `parts`.
pub(super) fn compute_mic(key: &AesKey, parts: &[&[u8]]) -> Mic {
    let tag = mac_over(key, parts).finalize().into_bytes();
    [tag[0], tag[1], tag[2], tag[3]]
}

/// Constant-time comparison of `mic` with the truncated CMAC over `parts`.
pub(super) fn verify_mic(key: &AesKey, parts: &[&[u8]], mic: &[u8]) -> bool {
    mac_over(key, parts).verify_truncated_left(mic).is_ok()
}

/// `B0` block prefixed to a data frame before computing its MIC.
pub(super) fn data_mic_block(
    direction: Direction,
    dev_addr: DevAddr,
    full_fcnt: u32,
    msg_len: usize,
) -> Result<[u8; BLOCK_LEN], FrameError> {
    let len = u8::try_from(msg_len).map_err(|_| FrameError::PayloadTooLarge(msg_len))?;
    let mut b0 = counter_block(0x49, direction, dev_addr, full_fcnt);
    b0[15] = len;
    Ok(b0)
}

fn counter_block(prefix: u8, direction: Direction, dev_addr: DevAddr, full_fcnt: u32) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[0] = prefix;
    block[5] = direction.as_byte();
    block[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    block[10..14].copy_from_slice(&full_fcnt.to_le_bytes());
    block
}

/// XOR `data` with the `A_i` key stream; encryption and decryption coincide.
pub(super) fn crypt_frm_payload(
    key: &AesKey,
    direction: Direction,
    dev_addr: DevAddr,
    full_fcnt: u32,
    data: &[u8],
) -> Vec<u8> {
    let cipher = cipher(key);
    let mut a = counter_block(0x01, direction, dev_addr, full_fcnt);
    data.chunks(BLOCK_LEN)
        .zip(1u8..)
        .flat_map(|(chunk, i)| {
            a[15] = i;
            let stream = encrypt_block(&cipher, a);
            chunk
                .iter()
                .zip(stream)
                .map(|(byte, key_byte)| byte ^ key_byte)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Apply AES encryption block-wise; `data` must be a multiple of 16 bytes.
pub(super) fn aes_encrypt_blocks(key: &AesKey, data: &[u8]) -> Vec<u8> {
    let cipher = cipher(key);
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

/// Apply AES decryption block-wise; `data` must be a multiple of 16 bytes.
pub(super) fn aes_decrypt_blocks(key: &AesKey, data: &[u8]) -> Vec<u8> {
    let cipher = cipher(key);
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AesKey = AesKey::new([0x2b; 16]);

    #[test]
    fn session_keys_are_deterministic_and_distinct() {
        let nonce = AppNonce::new([1, 2, 3]);
        let net_id = NetId::new([0, 0, 1]);
        let first = derive_session_keys(&KEY, nonce, net_id, 0x1234);
        let second = derive_session_keys(&KEY, nonce, net_id, 0x1234);
        assert_eq!(first, second);
        assert_ne!(first.nwk_s_key, first.app_s_key);

        let other = derive_session_keys(&KEY, nonce, net_id, 0x1235);
        assert_ne!(first.nwk_s_key, other.nwk_s_key);
    }

    #[test]
    fn frm_payload_crypt_is_an_involution() {
        let addr = DevAddr::new([1, 2, 3, 4]);
        let plain: Vec<u8> = (0..40).collect();
        let cipher = crypt_frm_payload(&KEY, Direction::Uplink, addr, 7, &plain);
        assert_ne!(cipher, plain);
        assert_eq!(cipher.len(), plain.len());
        assert_eq!(crypt_frm_payload(&KEY, Direction::Uplink, addr, 7, &cipher), plain);
        assert_ne!(crypt_frm_payload(&KEY, Direction::Downlink, addr, 7, &cipher), plain);
    }

    #[test]
    fn mic_verification_detects_tampering() {
        let mic = compute_mic(&KEY, &[b"hello".as_slice(), b" world".as_slice()]);
        assert!(verify_mic(&KEY, &[b"hello world".as_slice()], &mic));
        assert!(!verify_mic(&KEY, &[b"hello worle".as_slice()], &mic));
        assert!(!verify_mic(&AesKey::new([0; 16]), &[b"hello world".as_slice()], &mic));
    }

    #[test]
    fn block_cipher_helpers_are_inverse() {
        let data = [7u8; 32];
        let sealed = aes_decrypt_blocks(&KEY, &data);
        assert_eq!(aes_encrypt_blocks(&KEY, &sealed), data);
    }

    #[test]
    fn oversized_frames_cannot_be_signed() {
        let addr = DevAddr::new([1, 2, 3, 4]);
        assert_eq!(
            data_mic_block(Direction::Uplink, addr, 0, 256),
            Err(FrameError::PayloadTooLarge(256))
        );
    }
}
