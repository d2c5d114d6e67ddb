//! [RFC 4121 §4.2](https://datatracker.ietf.org/doc/html/rfc4121#section-4.2)
//! per-message tokens for the modern encryption types.

use bitflags::bitflags;
use picky_krb::crypto::CipherSuite;
use picky_krb::gss_api::{MicToken, WrapToken};

use crate::crypto::{constant_time_eq, rotate_left, DES3_BLOCK_SIZE};
use crate::keys::KerberosKey;
use crate::{Error, ErrorKind, Result};

const WRAP_HEADER_LEN: usize = 16;

bitflags! {
    /// [RFC 4121 §4.2.2](https://datatracker.ietf.org/doc/html/rfc4121#section-4.2.2)
    /// Attribute byte of the token header. The five high bits are reserved:
    /// emitted as zero, ignored on receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TokenFlags: u8 {
        const SENT_BY_ACCEPTOR = 0x01;
        const SEALED = 0x02;
        const ACCEPTOR_SUBKEY = 0x04;
    }
}

pub(crate) fn generate_mic(key: &KerberosKey, usage: i32, flags: TokenFlags, seq_num: u64, message: &[u8]) -> Result<Vec<u8>> {
    let mut token = MicToken {
        flags: flags.bits(),
        seq_num,
        payload: None,
        checksum: Vec::new(),
    };

    let mut to_sign = message.to_vec();
    to_sign.extend_from_slice(&token.header());

    let cipher = key.etype.cipher();
    token.set_checksum(cipher.checksum_type().hasher().checksum(key.key(), usage, &to_sign)?);

    let mut token_raw = Vec::with_capacity(16 + token.checksum.len());
    token.encode(&mut token_raw)?;

    Ok(token_raw)
}

pub(crate) fn verify_mic(token: &MicToken, key: &KerberosKey, usage: i32, message: &[u8]) -> Result<()> {
    let mut to_sign = message.to_vec();
    to_sign.extend_from_slice(&token.header());

    let cipher = key.etype.cipher();
    let checksum = cipher.checksum_type().hasher().checksum(key.key(), usage, &to_sign)?;

    if !constant_time_eq(&checksum, &token.checksum) {
        return Err(Error::new(ErrorKind::IntegrityCheck, "bad checksum of the MIC token"));
    }

    Ok(())
}

/// Filler appended to the plaintext so that DES-family block ciphers see
/// aligned input; the modern types need none.
fn extra_count(message_len: usize, etype: &CipherSuite) -> usize {
    match etype {
        CipherSuite::Des3CbcSha1Kd => (DES3_BLOCK_SIZE - message_len % DES3_BLOCK_SIZE) % DES3_BLOCK_SIZE,
        _ => 0,
    }
}

pub(crate) fn wrap(key: &KerberosKey, usage: i32, flags: TokenFlags, seq_num: u64, message: &[u8]) -> Result<Vec<u8>> {
    let ec = extra_count(message.len(), &key.etype);

    let mut token = WrapToken::with_seq_number(seq_num);
    token.flags = (flags | TokenFlags::SEALED).bits();
    token.ec = ec as u16;

    // plaintext = message | EC filler | header with RRC = 0
    let mut plaintext = message.to_vec();
    plaintext.resize(message.len() + ec, 0);
    plaintext.extend_from_slice(&token.header());

    let cipher = key.etype.cipher();
    token.set_checksum(cipher.encrypt(key.key(), usage, &plaintext)?);

    let mut token_raw = Vec::with_capacity(16 + token.checksum.len());
    token.encode(&mut token_raw)?;

    Ok(token_raw)
}

pub(crate) fn unwrap(token: &WrapToken, key: &KerberosKey, usage: i32) -> Result<Vec<u8>> {
    if !TokenFlags::from_bits_truncate(token.flags).contains(TokenFlags::SEALED) {
        return Err(Error::new(
            ErrorKind::UnsupportedAlgorithm,
            "wrap tokens without confidentiality are not supported",
        ));
    }

    if token.checksum.is_empty() {
        return Err(Error::new(ErrorKind::DefectiveToken, "wrap token carries no data"));
    }

    let mut ciphertext = token.checksum.clone();
    rotate_left(&mut ciphertext, usize::from(token.rrc));

    let cipher = key.etype.cipher();
    let plaintext = cipher.decrypt(key.key(), usage, &ciphertext)?;

    let ec = usize::from(token.ec);
    if plaintext.len() < WRAP_HEADER_LEN + ec {
        return Err(Error::new(ErrorKind::DefectiveToken, "decrypted wrap token is too short"));
    }

    // The recovered trailer must match the received header with RRC cleared.
    let expected_header = WrapToken {
        flags: token.flags,
        ec: token.ec,
        rrc: 0,
        seq_num: token.seq_num,
        payload: None,
        checksum: Vec::new(),
    }
    .header();

    let data_len = plaintext.len() - WRAP_HEADER_LEN - ec;
    if plaintext[data_len + ec..] != expected_header {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            "wrap token header does not match the decrypted trailer",
        ));
    }

    Ok(plaintext[..data_len].to_vec())
}

#[cfg(test)]
mod tests {
    use picky_krb::constants::key_usages::{ACCEPTOR_SEAL, ACCEPTOR_SIGN, INITIATOR_SEAL};
    use picky_krb::crypto::CipherSuite;
    use picky_krb::gss_api::{MicToken, WrapToken};

    use super::{generate_mic, unwrap, verify_mic, wrap, TokenFlags};
    use crate::crypto::rotate_right;
    use crate::keys::KerberosKey;
    use crate::ErrorKind;

    fn aes_key() -> KerberosKey {
        KerberosKey::new(
            CipherSuite::Aes256CtsHmacSha196,
            vec![
                0x72, 0x43, 0x37, 0x1a, 0x4c, 0xd2, 0x3d, 0x00, 0xa4, 0x2c, 0x0b, 0x85, 0x6c, 0xdc, 0xea, 0x91, 0x3d,
                0x90, 0x7b, 0x2d, 0x36, 0xaf, 0xa4, 0xa8, 0x63, 0x12, 0x63, 0xf0, 0xf2, 0x9d, 0x5f, 0x86,
            ],
        )
    }

    #[test]
    fn mic_round_trip() {
        let key = aes_key();
        let message = b"some plain message";

        let raw = generate_mic(&key, ACCEPTOR_SIGN, TokenFlags::SENT_BY_ACCEPTOR, 42, message).unwrap();
        let token = MicToken::decode(raw.as_slice()).unwrap();

        assert_eq!(42, token.seq_num);
        verify_mic(&token, &key, ACCEPTOR_SIGN, message).unwrap();
    }

    #[test]
    fn mic_detects_message_change() {
        let key = aes_key();

        let raw = generate_mic(&key, ACCEPTOR_SIGN, TokenFlags::SENT_BY_ACCEPTOR, 42, b"message").unwrap();
        let token = MicToken::decode(raw.as_slice()).unwrap();

        let err = verify_mic(&token, &key, ACCEPTOR_SIGN, b"messagE").unwrap_err();
        assert_eq!(ErrorKind::IntegrityCheck, err.error_type);
    }

    #[test]
    fn wrap_round_trip() {
        let key = aes_key();
        let message = vec![0x5a; 257];

        let raw = wrap(&key, INITIATOR_SEAL, TokenFlags::empty(), 7, &message).unwrap();
        let token = WrapToken::decode(raw.as_slice()).unwrap();

        assert_eq!(0, token.ec);
        assert_eq!(0, token.rrc);
        assert_eq!(message, unwrap(&token, &key, INITIATOR_SEAL).unwrap());
    }

    #[test]
    fn unwrap_honors_rotation() {
        let key = aes_key();
        let message = b"rotated payload".to_vec();

        let raw = wrap(&key, ACCEPTOR_SEAL, TokenFlags::SENT_BY_ACCEPTOR, 0, &message).unwrap();
        let mut token = WrapToken::decode(raw.as_slice()).unwrap();

        // re-create a sender that transmitted RRC = 28
        rotate_right(&mut token.checksum, 28);
        token.rrc = 28;

        assert_eq!(message, unwrap(&token, &key, ACCEPTOR_SEAL).unwrap());
    }

    #[test]
    fn unwrap_rejects_wrong_key_usage() {
        let key = aes_key();

        let raw = wrap(&key, INITIATOR_SEAL, TokenFlags::empty(), 0, b"data").unwrap();
        let token = WrapToken::decode(raw.as_slice()).unwrap();

        let err = unwrap(&token, &key, ACCEPTOR_SEAL).unwrap_err();
        assert_eq!(ErrorKind::IntegrityCheck, err.error_type);
    }
}
