//! [RFC 1964](https://datatracker.ietf.org/doc/html/rfc1964) per-message
//! tokens as used with the `des3-cbc-sha1-kd` encryption type
//! (draft-raeburn-cat-gssapi-krb5-3des). Everything here runs off the ticket
//! session key: subkeys play no part in the v1 formats.

use picky_krb::crypto::des::derive_key;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::context::ContextRole;
use crate::crypto::{constant_time_eq, des3_cbc_decrypt, des3_cbc_encrypt, hmac_sha1, DES3_BLOCK_SIZE};
use crate::keys::KerberosKey;
use crate::token::{self, MicTokenV1, SealAlg, SignatureAlg, WrapTokenV1};
use crate::{Error, ErrorKind, Result};

/// KG-USAGE-SIGN from the 3DES GSS-API profile.
const KG_USAGE_SIGN: i32 = 23;
const CHECKSUM_LEN: usize = 20;
const CONFOUNDER_LEN: usize = 8;

const DIRECTION_FROM_INITIATOR: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const DIRECTION_FROM_ACCEPTOR: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

/// Kc of the RFC 3961 §5.3 triad: `DK(key, usage | 0x99)`.
fn signing_key(ticket_key: &KerberosKey) -> Result<Vec<u8>> {
    let mut well_known = [0; 5];
    well_known[0..4].copy_from_slice(&KG_USAGE_SIGN.to_be_bytes());
    well_known[4] = 0x99;

    Ok(derive_key(ticket_key.key(), &well_known)?)
}

fn direction(sender: ContextRole) -> [u8; 4] {
    match sender {
        ContextRole::Initiator => DIRECTION_FROM_INITIATOR,
        ContextRole::Acceptor => DIRECTION_FROM_ACCEPTOR,
    }
}

/// The sequence field is DES-EDE3-CBC under the *raw* ticket key with the
/// first checksum octets as IV. The derived-key variant from the draft never
/// shipped; MIT interop requires the raw key.
fn encrypt_sequence_number(ticket_key: &KerberosKey, checksum: &[u8], seq_num: u32, sender: ContextRole) -> Result<[u8; 8]> {
    let mut iv = [0; DES3_BLOCK_SIZE];
    iv.copy_from_slice(&checksum[0..DES3_BLOCK_SIZE]);

    let mut plain = [0; 8];
    plain[0..4].copy_from_slice(&seq_num.to_le_bytes());
    plain[4..8].copy_from_slice(&direction(sender));

    let encrypted = des3_cbc_encrypt(ticket_key.key(), &iv, &plain)?;

    encrypted
        .try_into()
        .map_err(|_| Error::new(ErrorKind::InternalError, "DES3 produced a ciphertext of foreign length"))
}

/// Recovers `(sequence number, sender)` from the encrypted sequence field.
fn decrypt_sequence_number(ticket_key: &KerberosKey, checksum: &[u8], seq_enc: &[u8; 8]) -> Result<(u32, ContextRole)> {
    if checksum.len() < DES3_BLOCK_SIZE {
        return Err(Error::new(ErrorKind::DefectiveToken, "v1 token checksum is too short"));
    }

    let mut iv = [0; DES3_BLOCK_SIZE];
    iv.copy_from_slice(&checksum[0..DES3_BLOCK_SIZE]);

    let plain = des3_cbc_decrypt(ticket_key.key(), &iv, seq_enc)?;

    let seq_num = u32::from_le_bytes(plain[0..4].try_into().unwrap());

    let mut dirn = [0; 4];
    dirn.copy_from_slice(&plain[4..8]);
    let sender = if dirn == DIRECTION_FROM_INITIATOR {
        ContextRole::Initiator
    } else if dirn == DIRECTION_FROM_ACCEPTOR {
        ContextRole::Acceptor
    } else {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            "v1 token direction field is garbled",
        ));
    };

    Ok((seq_num, sender))
}

fn check_direction(receiver: ContextRole, sender: ContextRole) -> Result<()> {
    if sender == receiver {
        return Err(Error::new(
            ErrorKind::BadDirection,
            "v1 token was produced by this side of the context",
        ));
    }

    Ok(())
}

pub(crate) fn generate_mic(ticket_key: &KerberosKey, sender: ContextRole, seq_num: u64, message: &[u8]) -> Result<Vec<u8>> {
    let mut mic_token = MicTokenV1 {
        sig_alg: SignatureAlg::HmacSha1Des3,
        seq_enc: [0; 8],
        checksum: Vec::new(),
    };

    let mut to_sign = mic_token.header().to_vec();
    to_sign.extend_from_slice(message);

    let checksum = hmac_sha1(&signing_key(ticket_key)?, &to_sign, CHECKSUM_LEN)?;
    mic_token.seq_enc = encrypt_sequence_number(ticket_key, &checksum, seq_num as u32, sender)?;
    mic_token.checksum = checksum;

    token::encode_v1_token(|buffer| mic_token.encode(buffer))
}

/// Returns the token's sequence number; replay handling is the caller's.
pub(crate) fn verify_mic(
    mic_token: &MicTokenV1,
    ticket_key: &KerberosKey,
    receiver: ContextRole,
    message: &[u8],
) -> Result<u64> {
    if mic_token.sig_alg != SignatureAlg::HmacSha1Des3 {
        return Err(Error::new(
            ErrorKind::UnsupportedAlgorithm,
            format!("no backend for signature algorithm {:?}", mic_token.sig_alg),
        ));
    }

    let mut to_sign = mic_token.header().to_vec();
    to_sign.extend_from_slice(message);

    let checksum = hmac_sha1(&signing_key(ticket_key)?, &to_sign, CHECKSUM_LEN)?;
    if !constant_time_eq(&checksum, &mic_token.checksum) {
        return Err(Error::new(ErrorKind::IntegrityCheck, "bad checksum of the v1 MIC token"));
    }

    let (seq_num, sender) = decrypt_sequence_number(ticket_key, &mic_token.checksum, &mic_token.seq_enc)?;
    check_direction(receiver, sender)?;

    Ok(u64::from(seq_num))
}

/// [RFC 1964 §1.2.2.3](https://datatracker.ietf.org/doc/html/rfc1964#section-1.2.2.3)
/// DES-style padding: the pad value equals the pad length, and aligned
/// messages still gain a full block of `08` bytes.
fn padded(message: &[u8]) -> Vec<u8> {
    let pad_len = DES3_BLOCK_SIZE - message.len() % DES3_BLOCK_SIZE;

    let mut data_pad = message.to_vec();
    data_pad.resize(message.len() + pad_len, pad_len as u8);

    data_pad
}

pub(crate) fn wrap(ticket_key: &KerberosKey, sender: ContextRole, seq_num: u64, message: &[u8]) -> Result<Vec<u8>> {
    let mut wrap_token = WrapTokenV1 {
        sig_alg: SignatureAlg::HmacSha1Des3,
        seal_alg: SealAlg::Des3,
        seq_enc: [0; 8],
        checksum: Vec::new(),
        payload: Vec::new(),
    };

    let mut conf_data_pad = vec![0; CONFOUNDER_LEN];
    OsRng.fill_bytes(&mut conf_data_pad);
    conf_data_pad.extend_from_slice(&padded(message));

    let mut to_sign = wrap_token.header().to_vec();
    to_sign.extend_from_slice(&conf_data_pad);

    let checksum = hmac_sha1(&signing_key(ticket_key)?, &to_sign, CHECKSUM_LEN)?;
    wrap_token.seq_enc = encrypt_sequence_number(ticket_key, &checksum, seq_num as u32, sender)?;
    wrap_token.payload = des3_cbc_encrypt(ticket_key.key(), &[0; DES3_BLOCK_SIZE], &conf_data_pad)?;
    wrap_token.checksum = checksum;

    token::encode_v1_token(|buffer| wrap_token.encode(buffer))
}

/// Returns the plaintext and the token's sequence number.
pub(crate) fn unwrap(
    wrap_token: &WrapTokenV1,
    ticket_key: &KerberosKey,
    receiver: ContextRole,
) -> Result<(Vec<u8>, u64)> {
    if wrap_token.sig_alg != SignatureAlg::HmacSha1Des3 || wrap_token.seal_alg != SealAlg::Des3 {
        return Err(Error::new(
            ErrorKind::UnsupportedAlgorithm,
            format!(
                "no backend for algorithm pair {:?}/{:?}",
                wrap_token.sig_alg, wrap_token.seal_alg
            ),
        ));
    }

    if wrap_token.payload.len() < CONFOUNDER_LEN + DES3_BLOCK_SIZE || wrap_token.payload.len() % DES3_BLOCK_SIZE != 0 {
        return Err(Error::new(ErrorKind::DefectiveToken, "v1 Wrap token payload is garbled"));
    }

    let conf_data_pad = des3_cbc_decrypt(ticket_key.key(), &[0; DES3_BLOCK_SIZE], &wrap_token.payload)?;

    let mut to_sign = wrap_token.header().to_vec();
    to_sign.extend_from_slice(&conf_data_pad);

    let checksum = hmac_sha1(&signing_key(ticket_key)?, &to_sign, CHECKSUM_LEN)?;
    if !constant_time_eq(&checksum, &wrap_token.checksum) {
        return Err(Error::new(ErrorKind::IntegrityCheck, "bad checksum of the v1 Wrap token"));
    }

    let (seq_num, sender) = decrypt_sequence_number(ticket_key, &wrap_token.checksum, &wrap_token.seq_enc)?;
    check_direction(receiver, sender)?;

    let data_pad = &conf_data_pad[CONFOUNDER_LEN..];
    let pad_len = usize::from(data_pad[data_pad.len() - 1]);
    if pad_len == 0 || pad_len > DES3_BLOCK_SIZE || pad_len > data_pad.len() {
        return Err(Error::new(ErrorKind::DefectiveToken, "invalid v1 Wrap token padding"));
    }

    if data_pad[data_pad.len() - pad_len..].iter().any(|b| usize::from(*b) != pad_len) {
        return Err(Error::new(ErrorKind::DefectiveToken, "invalid v1 Wrap token padding"));
    }

    Ok((data_pad[..data_pad.len() - pad_len].to_vec(), u64::from(seq_num)))
}

#[cfg(test)]
mod tests {
    use picky_krb::crypto::CipherSuite;

    use super::{generate_mic, padded, unwrap, verify_mic, wrap};
    use crate::context::ContextRole;
    use crate::keys::KerberosKey;
    use crate::token::{MechToken, MicTokenV1, WrapTokenV1};
    use crate::ErrorKind;

    fn des3_key() -> KerberosKey {
        KerberosKey::new(
            CipherSuite::Des3CbcSha1Kd,
            vec![
                0x85, 0x1f, 0x0d, 0xab, 0x70, 0x62, 0xea, 0x8c, 0x6a, 0x7c, 0xd3, 0xb1, 0x5e, 0xcd, 0x85, 0x5e, 0xce,
                0x73, 0xfe, 0x32, 0xa8, 0x29, 0x34, 0xd3,
            ],
        )
    }

    fn decode_mic(raw: &[u8]) -> MicTokenV1 {
        match MechToken::decode(raw).unwrap() {
            MechToken::MicV1(token) => token,
            other => panic!("expected a v1 MIC token, got {:?}", other),
        }
    }

    fn decode_wrap(raw: &[u8]) -> WrapTokenV1 {
        match MechToken::decode(raw).unwrap() {
            MechToken::WrapV1(token) => token,
            other => panic!("expected a v1 Wrap token, got {:?}", other),
        }
    }

    #[test]
    fn des_padding() {
        assert_eq!(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x03, 0x03, 0x03], padded(&[1, 2, 3, 4, 5]));

        assert_eq!(
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08],
            padded(&[1, 2, 3, 4, 5, 6, 7, 8])
        );

        assert_eq!(vec![0x08; 8], padded(&[]));
    }

    #[test]
    fn mic_round_trip() {
        let key = des3_key();
        let message = b"some plain message";

        let raw = generate_mic(&key, ContextRole::Initiator, 17, message).unwrap();
        let token = decode_mic(&raw);

        let seq_num = verify_mic(&token, &key, ContextRole::Acceptor, message).unwrap();
        assert_eq!(17, seq_num);
    }

    #[test]
    fn mic_detects_message_change() {
        let key = des3_key();

        let raw = generate_mic(&key, ContextRole::Initiator, 17, b"message").unwrap();
        let token = decode_mic(&raw);

        let err = verify_mic(&token, &key, ContextRole::Acceptor, b"messagE").unwrap_err();
        assert_eq!(ErrorKind::IntegrityCheck, err.error_type);
    }

    #[test]
    fn mic_rejects_own_direction() {
        let key = des3_key();

        let raw = generate_mic(&key, ContextRole::Initiator, 17, b"message").unwrap();
        let token = decode_mic(&raw);

        let err = verify_mic(&token, &key, ContextRole::Initiator, b"message").unwrap_err();
        assert_eq!(ErrorKind::BadDirection, err.error_type);
    }

    #[test]
    fn wrap_round_trip() {
        let key = des3_key();
        let message = b"confidential bytes".to_vec();

        let raw = wrap(&key, ContextRole::Acceptor, 99, &message).unwrap();
        let token = decode_wrap(&raw);

        let (plaintext, seq_num) = unwrap(&token, &key, ContextRole::Initiator).unwrap();
        assert_eq!(message, plaintext);
        assert_eq!(99, seq_num);
    }

    #[test]
    fn wrap_round_trip_of_empty_message() {
        let key = des3_key();

        let raw = wrap(&key, ContextRole::Initiator, 0, &[]).unwrap();
        let token = decode_wrap(&raw);

        let (plaintext, _) = unwrap(&token, &key, ContextRole::Acceptor).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn wrap_detects_payload_change() {
        let key = des3_key();

        let raw = wrap(&key, ContextRole::Initiator, 0, b"payload").unwrap();
        let mut token = decode_wrap(&raw);
        let last = token.payload.len() - 1;
        token.payload[last] ^= 0x01;

        let err = unwrap(&token, &key, ContextRole::Acceptor).unwrap_err();
        assert_eq!(ErrorKind::IntegrityCheck, err.error_type);
    }
}
