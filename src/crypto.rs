//! GSS-specific primitives that sit outside the RFC 3961 encryption profile:
//! the channel-bindings digest, the RFC 1964 HMAC-SHA1 signature, the raw
//! (underived) DES-EDE3-CBC used by v1 tokens, and the RFC 4121 byte rotation.

use des::cipher::block_padding::NoPadding;
use des::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::channel_bindings::ChannelBindings;
use crate::{Error, ErrorKind, Result};

pub const HASH_SIZE: usize = 16;

pub(crate) const DES3_BLOCK_SIZE: usize = 8;
pub(crate) const DES3_KEY_SIZE: usize = 24;

type Des3CbcEncryptor = cbc::Encryptor<TdesEde3>;
type Des3CbcDecryptor = cbc::Decryptor<TdesEde3>;

/// [Channel Binding Hash](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1.2)
///
/// MD5 over the encoded channel bindings: every address is prefixed with its
/// type and length, both 32-bit little-endian.
pub fn compute_md5_channel_bindings_hash(channel_bindings: &ChannelBindings) -> [u8; HASH_SIZE] {
    let mut context = Md5::new();
    let mut result = [0x00; HASH_SIZE];

    context.update(channel_bindings.encode());
    result.clone_from_slice(&context.finalize());

    result
}

/// Equality over MAC outputs without an early exit on the first differing
/// byte: the inputs are XOR-folded into an accumulator so the comparison
/// touches every octet regardless of where a mismatch sits.
pub(crate) fn constant_time_eq(lhs: &[u8], rhs: &[u8]) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }

    lhs.iter().zip(rhs.iter()).fold(0u8, |acc, (l, r)| acc | (l ^ r)) == 0
}

pub(crate) fn hmac_sha1(key: &[u8], payload: &[u8], mac_size: usize) -> Result<Vec<u8>> {
    let mut hmacker = Hmac::<Sha1>::new_from_slice(key)
        .map_err(|err| Error::new(ErrorKind::InternalError, format!("invalid HMAC key: {:?}", err)))?;

    hmacker.update(payload);

    let mut hmac = hmacker.finalize().into_bytes().to_vec();
    hmac.resize(mac_size, 0);

    Ok(hmac)
}

fn check_des3_input(key: &[u8], payload: &[u8]) -> Result<()> {
    if key.len() != DES3_KEY_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("invalid DES3 key length: {}. Expected: {}", key.len(), DES3_KEY_SIZE),
        ));
    }

    if payload.is_empty() || payload.len() % DES3_BLOCK_SIZE != 0 {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("DES3 payload length is not block-aligned: {}", payload.len()),
        ));
    }

    Ok(())
}

/// DES-EDE3-CBC without key derivation, confounder, or padding. The v1 token
/// formats encrypt already-padded data directly under the ticket session key.
pub(crate) fn des3_cbc_encrypt(key: &[u8], iv: &[u8; DES3_BLOCK_SIZE], payload: &[u8]) -> Result<Vec<u8>> {
    check_des3_input(key, payload)?;

    let mut buffer = payload.to_vec();
    let payload_len = buffer.len();

    let ct = Des3CbcEncryptor::new(key.into(), (iv as &[u8]).into());
    ct.encrypt_padded_mut::<NoPadding>(&mut buffer, payload_len)
        .map_err(|err| Error::new(ErrorKind::EncryptFailure, format!("DES3 padding error: {:?}", err)))?;

    Ok(buffer)
}

pub(crate) fn des3_cbc_decrypt(key: &[u8], iv: &[u8; DES3_BLOCK_SIZE], payload: &[u8]) -> Result<Vec<u8>> {
    check_des3_input(key, payload)?;

    let mut buffer = payload.to_vec();

    let ct = Des3CbcDecryptor::new(key.into(), (iv as &[u8]).into());
    ct.decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|err| Error::new(ErrorKind::DecryptFailure, format!("DES3 padding error: {:?}", err)))?;

    Ok(buffer)
}

/// Undoes the right rotation a sender applied to the wrap-token body.
/// Rotation counts larger than the buffer wrap around.
pub(crate) fn rotate_left(data: &mut [u8], count: usize) {
    if !data.is_empty() {
        let count = count % data.len();
        data.rotate_left(count);
    }
}

/// [RFC 4121 §4.2.5](https://datatracker.ietf.org/doc/html/rfc4121#section-4.2.5)
/// "RRC" rotation: the last RRC octets of the body move to its front.
pub(crate) fn rotate_right(data: &mut [u8], count: usize) {
    if !data.is_empty() {
        let count = count % data.len();
        data.rotate_right(count);
    }
}
