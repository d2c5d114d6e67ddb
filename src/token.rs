//! Framing of every token the mechanism sends or receives.
//!
//! Context-establishment payloads (AP-REQ, AP-REP, KRB-ERROR) and the v1
//! per-message tokens travel inside the
//! [InitialContextToken](https://datatracker.ietf.org/doc/html/rfc2743#section-3.1)
//! envelope carrying the Kerberos V5 mechanism OID; the v2 per-message
//! tokens ([RFC 4121 §4.2.6](https://datatracker.ietf.org/doc/html/rfc4121#section-4.2.6))
//! travel bare. No cryptography happens at this layer.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use picky_asn1::wrapper::ObjectIdentifierAsn1;
use picky_asn1_x509::oids;
use picky_krb::constants::gss_api::{AP_REP_TOKEN_ID, AP_REQ_TOKEN_ID, MIC_TOKEN_ID, WRAP_TOKEN_ID};
use picky_krb::gss_api::{MicToken, WrapToken};
use picky_krb::messages::{ApRep, ApReq, KrbError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, ErrorKind, Result};

pub const KRB_ERROR_TOKEN_ID: [u8; 2] = [0x03, 0x00];
pub const MIC_V1_TOKEN_ID: [u8; 2] = [0x01, 0x01];
pub const WRAP_V1_TOKEN_ID: [u8; 2] = [0x02, 0x01];

const MIC_V1_FILLER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
const WRAP_V1_FILLER: [u8; 2] = [0xff, 0xff];
const V1_SEQUENCE_LEN: usize = 8;
const V1_HEADER_LEN: usize = 8;

/// [RFC 1964 §1.2.1](https://datatracker.ietf.org/doc/html/rfc1964#section-1.2.1) SGN_ALG values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlg {
    DesMacMd5,
    Md25,
    DesMac,
    HmacSha1Des3,
    HmacMd5Rc4,
}

impl SignatureAlg {
    pub fn checksum_len(self) -> usize {
        match self {
            SignatureAlg::HmacSha1Des3 => 20,
            _ => 8,
        }
    }
}

impl From<SignatureAlg> for u16 {
    fn from(alg: SignatureAlg) -> Self {
        match alg {
            SignatureAlg::DesMacMd5 => 0x0000,
            SignatureAlg::Md25 => 0x0100,
            SignatureAlg::DesMac => 0x0200,
            SignatureAlg::HmacSha1Des3 => 0x0400,
            SignatureAlg::HmacMd5Rc4 => 0x1100,
        }
    }
}

impl TryFrom<u16> for SignatureAlg {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(SignatureAlg::DesMacMd5),
            0x0100 => Ok(SignatureAlg::Md25),
            0x0200 => Ok(SignatureAlg::DesMac),
            0x0400 => Ok(SignatureAlg::HmacSha1Des3),
            0x1100 => Ok(SignatureAlg::HmacMd5Rc4),
            value => Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("unknown signature algorithm: {:#06x}", value),
            )),
        }
    }
}

/// [RFC 1964 §1.2.2](https://datatracker.ietf.org/doc/html/rfc1964#section-1.2.2) SEAL_ALG values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealAlg {
    None,
    Des,
    Des3,
    Rc4,
}

impl From<SealAlg> for u16 {
    fn from(alg: SealAlg) -> Self {
        match alg {
            SealAlg::None => 0xffff,
            SealAlg::Des => 0x0000,
            SealAlg::Des3 => 0x0200,
            SealAlg::Rc4 => 0x1000,
        }
    }
}

impl TryFrom<u16> for SealAlg {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0xffff => Ok(SealAlg::None),
            0x0000 => Ok(SealAlg::Des),
            0x0200 => Ok(SealAlg::Des3),
            0x1000 => Ok(SealAlg::Rc4),
            value => Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("unknown seal algorithm: {:#06x}", value),
            )),
        }
    }
}

/// [RFC 1964 §1.2](https://datatracker.ietf.org/doc/html/rfc1964#section-1.2) MIC token.
///
/// Octet no   Name       Description
/// --------------------------------------------------------------
///  0..1      TOK_ID     Identification field: 01 01.
///  2..3      SGN_ALG    Checksum algorithm indicator.
///  4..7      Filler     Contains ff ff ff ff.
///  8..15     SND_SEQ    Encrypted sequence number field.
///  16..last  SGN_CKSUM  Checksum of the "to-be-signed" data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicTokenV1 {
    pub sig_alg: SignatureAlg,
    pub seq_enc: [u8; V1_SEQUENCE_LEN],
    pub checksum: Vec<u8>,
}

impl MicTokenV1 {
    /// The first eight octets; they prefix the message in checksum
    /// computations.
    pub fn header(&self) -> [u8; V1_HEADER_LEN] {
        let mut header_data = [0; V1_HEADER_LEN];

        header_data[0..2].copy_from_slice(&MIC_V1_TOKEN_ID);
        header_data[2..4].copy_from_slice(&u16::from(self.sig_alg).to_be_bytes());
        header_data[4..8].copy_from_slice(&MIC_V1_FILLER);

        header_data
    }

    pub fn encode(&self, mut data: impl Write) -> Result<()> {
        data.write_all(&MIC_V1_TOKEN_ID)?;
        data.write_u16::<BigEndian>(u16::from(self.sig_alg))?;
        data.write_all(&MIC_V1_FILLER)?;
        data.write_all(&self.seq_enc)?;
        data.write_all(&self.checksum)?;

        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < V1_HEADER_LEN + V1_SEQUENCE_LEN {
            return Err(Error::new(ErrorKind::DefectiveToken, "v1 MIC token is too short"));
        }

        if data[0..2] != MIC_V1_TOKEN_ID {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("invalid v1 MIC token id: {:02x?}", &data[0..2]),
            ));
        }

        let sig_alg = SignatureAlg::try_from(u16::from_be_bytes([data[2], data[3]]))?;

        if data[4..8] != MIC_V1_FILLER {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("invalid v1 MIC token filler: {:02x?}", &data[4..8]),
            ));
        }

        if data.len() != V1_HEADER_LEN + V1_SEQUENCE_LEN + sig_alg.checksum_len() {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                "trailing bytes after the v1 MIC token",
            ));
        }

        let mut seq_enc = [0; V1_SEQUENCE_LEN];
        seq_enc.copy_from_slice(&data[8..16]);

        Ok(Self {
            sig_alg,
            seq_enc,
            checksum: data[16..].to_vec(),
        })
    }
}

/// [RFC 1964 §1.2.2](https://datatracker.ietf.org/doc/html/rfc1964#section-1.2.2) Wrap token.
///
/// Shares the MIC layout with a SEAL_ALG field in place of half of the
/// filler; the encrypted `confounder | data | pad` blob follows the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapTokenV1 {
    pub sig_alg: SignatureAlg,
    pub seal_alg: SealAlg,
    pub seq_enc: [u8; V1_SEQUENCE_LEN],
    pub checksum: Vec<u8>,
    pub payload: Vec<u8>,
}

impl WrapTokenV1 {
    pub fn header(&self) -> [u8; V1_HEADER_LEN] {
        let mut header_data = [0; V1_HEADER_LEN];

        header_data[0..2].copy_from_slice(&WRAP_V1_TOKEN_ID);
        header_data[2..4].copy_from_slice(&u16::from(self.sig_alg).to_be_bytes());
        header_data[4..6].copy_from_slice(&u16::from(self.seal_alg).to_be_bytes());
        header_data[6..8].copy_from_slice(&WRAP_V1_FILLER);

        header_data
    }

    pub fn encode(&self, mut data: impl Write) -> Result<()> {
        data.write_all(&WRAP_V1_TOKEN_ID)?;
        data.write_u16::<BigEndian>(u16::from(self.sig_alg))?;
        data.write_u16::<BigEndian>(u16::from(self.seal_alg))?;
        data.write_all(&WRAP_V1_FILLER)?;
        data.write_all(&self.seq_enc)?;
        data.write_all(&self.checksum)?;
        data.write_all(&self.payload)?;

        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < V1_HEADER_LEN + V1_SEQUENCE_LEN {
            return Err(Error::new(ErrorKind::DefectiveToken, "v1 Wrap token is too short"));
        }

        if data[0..2] != WRAP_V1_TOKEN_ID {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("invalid v1 Wrap token id: {:02x?}", &data[0..2]),
            ));
        }

        let sig_alg = SignatureAlg::try_from(u16::from_be_bytes([data[2], data[3]]))?;
        let seal_alg = SealAlg::try_from(u16::from_be_bytes([data[4], data[5]]))?;

        if data[6..8] != WRAP_V1_FILLER {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("invalid v1 Wrap token filler: {:02x?}", &data[6..8]),
            ));
        }

        let payload_offset = V1_HEADER_LEN + V1_SEQUENCE_LEN + sig_alg.checksum_len();
        if data.len() < payload_offset {
            return Err(Error::new(ErrorKind::DefectiveToken, "v1 Wrap token is too short"));
        }

        let mut seq_enc = [0; V1_SEQUENCE_LEN];
        seq_enc.copy_from_slice(&data[8..16]);

        Ok(Self {
            sig_alg,
            seal_alg,
            seq_enc,
            checksum: data[16..payload_offset].to_vec(),
            payload: data[payload_offset..].to_vec(),
        })
    }
}

/// Any token the mechanism can receive, identified by its leading tag.
#[derive(Debug)]
pub enum MechToken {
    ApReq(ApReq),
    ApRep(ApRep),
    KrbError(KrbError),
    MicV1(MicTokenV1),
    WrapV1(WrapTokenV1),
    MicV2(MicToken),
    WrapV2(WrapToken),
}

impl MechToken {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::new(ErrorKind::DefectiveToken, "token is too short"));
        }

        if data[0] == 0x60 {
            let inner = unwrap_initial_token(data)?;
            if inner.len() < 2 {
                return Err(Error::new(ErrorKind::DefectiveToken, "mechanism payload is too short"));
            }

            let body = &inner[2..];
            match [inner[0], inner[1]] {
                AP_REQ_TOKEN_ID => Ok(Self::ApReq(decode_der_exact(body)?)),
                AP_REP_TOKEN_ID => Ok(Self::ApRep(decode_der_exact(body)?)),
                KRB_ERROR_TOKEN_ID => Ok(Self::KrbError(decode_der_exact(body)?)),
                MIC_V1_TOKEN_ID => Ok(Self::MicV1(MicTokenV1::decode(inner)?)),
                WRAP_V1_TOKEN_ID => Ok(Self::WrapV1(WrapTokenV1::decode(inner)?)),
                token_id => Err(Error::new(
                    ErrorKind::DefectiveToken,
                    format!("unknown mechanism token id: {:02x?}", token_id),
                )),
            }
        } else {
            match [data[0], data[1]] {
                MIC_TOKEN_ID => Ok(Self::MicV2(MicToken::decode(data)?)),
                WRAP_TOKEN_ID => Ok(Self::WrapV2(WrapToken::decode(data)?)),
                token_id => Err(Error::new(
                    ErrorKind::DefectiveToken,
                    format!("unknown token id: {:02x?}", token_id),
                )),
            }
        }
    }
}

fn encoded_mech_oid() -> Result<Vec<u8>> {
    Ok(picky_asn1_der::to_vec(&ObjectIdentifierAsn1::from(oids::krb5()))?)
}

/// DER canonical form: the definite length uses the minimal number of
/// octets.
fn encode_der_len(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(0x81);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else if len <= 0xff_ffff {
        out.push(0x83);
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    } else {
        out.push(0x84);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Returns the encoded length and the number of octets the length field
/// occupies.
fn read_der_len(data: &[u8]) -> Result<(usize, usize)> {
    let malformed = || Error::new(ErrorKind::DefectiveToken, "malformed DER length");

    let first = *data.first().ok_or_else(malformed)?;

    if first < 0x80 {
        return Ok((usize::from(first), 1));
    }

    let octets = usize::from(first & 0x7f);
    if octets == 0 || octets > 4 || data.len() < 1 + octets {
        return Err(malformed());
    }

    let mut len = 0;
    for byte in &data[1..1 + octets] {
        len = (len << 8) | usize::from(*byte);
    }

    Ok((len, 1 + octets))
}

/// Total size of the DER element starting at the beginning of `data`.
fn der_total_len(data: &[u8]) -> Result<usize> {
    if data.len() < 2 {
        return Err(Error::new(ErrorKind::DefectiveToken, "truncated DER element"));
    }

    let (len, consumed) = read_der_len(&data[1..])?;

    Ok(1 + consumed + len)
}

fn decode_der_exact<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    if der_total_len(data)? != data.len() {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            "trailing bytes after the Kerberos message",
        ));
    }

    Ok(picky_asn1_der::from_bytes(data)?)
}

/// Wraps a mechanism payload into the InitialContextToken envelope:
/// `60 <len> <krb5 OID> <payload>`.
pub(crate) fn wrap_initial_token(payload: &[u8]) -> Result<Vec<u8>> {
    let oid = encoded_mech_oid()?;

    let mut out = Vec::with_capacity(payload.len() + oid.len() + 6);
    out.push(0x60);
    encode_der_len(oid.len() + payload.len(), &mut out);
    out.extend_from_slice(&oid);
    out.extend_from_slice(payload);

    Ok(out)
}

/// Strips the InitialContextToken envelope, rejecting foreign mechanism
/// OIDs and trailing bytes.
pub(crate) fn unwrap_initial_token(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 2 || data[0] != 0x60 {
        return Err(Error::new(ErrorKind::DefectiveToken, "not an initial context token"));
    }

    let (len, consumed) = read_der_len(&data[1..])?;
    let inner = &data[1 + consumed..];
    if inner.len() != len {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            "initial context token length mismatch",
        ));
    }

    if inner.len() < 2 || inner[0] != 0x06 {
        return Err(Error::new(ErrorKind::DefectiveToken, "missing mechanism OID"));
    }

    let oid_len = 2 + usize::from(inner[1]);
    if inner.len() < oid_len {
        return Err(Error::new(ErrorKind::DefectiveToken, "truncated mechanism OID"));
    }

    if inner[..oid_len] != encoded_mech_oid()? {
        return Err(Error::new(
            ErrorKind::BadMechanism,
            format!("unsupported mechanism OID: {:02x?}", &inner[2..oid_len]),
        ));
    }

    Ok(&inner[oid_len..])
}

/// Frames a DER-encoded Kerberos PDU behind its two-octet mechanism tag and
/// the initial-token envelope.
pub(crate) fn encode_setup_token<T: Serialize>(token_id: [u8; 2], msg: &T) -> Result<Vec<u8>> {
    let der = picky_asn1_der::to_vec(msg)?;

    let mut payload = Vec::with_capacity(der.len() + 2);
    payload.extend_from_slice(&token_id);
    payload.extend_from_slice(&der);

    wrap_initial_token(&payload)
}

/// Frames a v1 per-message token; unlike their v2 counterparts these travel
/// inside the initial-token envelope.
pub(crate) fn encode_v1_token(encode: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<Vec<u8>> {
    let mut inner = Vec::new();
    encode(&mut inner)?;

    wrap_initial_token(&inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mic_v1_round_trip() {
        let expected_raw = vec![
            0x01, 0x01, 0x04, 0x00, 0xff, 0xff, 0xff, 0xff, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x01,
            0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12,
            0x13, 0x14,
        ];
        let expected = MicTokenV1 {
            sig_alg: SignatureAlg::HmacSha1Des3,
            seq_enc: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88],
            checksum: (1..=20).collect(),
        };

        let token = MicTokenV1::decode(&expected_raw).unwrap();
        let mut token_raw = Vec::new();
        token.encode(&mut token_raw).unwrap();

        assert_eq!(expected, token);
        assert_eq!(expected_raw, token_raw);
    }

    #[test]
    fn mic_v1_rejects_trailing_bytes() {
        let mut raw = vec![0x01, 0x01, 0x02, 0x00, 0xff, 0xff, 0xff, 0xff];
        raw.extend_from_slice(&[0; 8]);
        raw.extend_from_slice(&[0; 8]);
        assert!(MicTokenV1::decode(&raw).is_ok());

        raw.push(0x00);
        let err = MicTokenV1::decode(&raw).unwrap_err();
        assert_eq!(ErrorKind::DefectiveToken, err.error_type);
    }

    #[test]
    fn wrap_v1_round_trip() {
        let expected_raw = vec![
            0x02, 0x01, 0x04, 0x00, 0x02, 0x00, 0xff, 0xff, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x01,
            0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12,
            0x13, 0x14, 0xde, 0xad, 0xbe, 0xef,
        ];
        let expected = WrapTokenV1 {
            sig_alg: SignatureAlg::HmacSha1Des3,
            seal_alg: SealAlg::Des3,
            seq_enc: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88],
            checksum: (1..=20).collect(),
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        };

        let token = WrapTokenV1::decode(&expected_raw).unwrap();
        let mut token_raw = Vec::new();
        token.encode(&mut token_raw).unwrap();

        assert_eq!(expected, token);
        assert_eq!(expected_raw, token_raw);
    }

    #[test]
    fn unknown_signature_algorithm_is_rejected() {
        let raw = [
            0x01, 0x01, 0x09, 0x99, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let err = MicTokenV1::decode(&raw).unwrap_err();
        assert_eq!(ErrorKind::DefectiveToken, err.error_type);
    }

    #[test]
    fn envelope_round_trip() {
        let wrapped = wrap_initial_token(&[0xaa, 0xbb, 0xcc]).unwrap();

        assert_eq!(0x60, wrapped[0]);
        assert_eq!(&[0xaa, 0xbb, 0xcc], unwrap_initial_token(&wrapped).unwrap());
    }

    #[test]
    fn envelope_rejects_trailing_garbage() {
        let mut wrapped = wrap_initial_token(&[0xaa, 0xbb, 0xcc]).unwrap();
        wrapped.push(0x00);

        let err = unwrap_initial_token(&wrapped).unwrap_err();
        assert_eq!(ErrorKind::DefectiveToken, err.error_type);
    }

    #[test]
    fn envelope_rejects_foreign_mechanism() {
        let mut wrapped = wrap_initial_token(&[0xaa, 0xbb, 0xcc]).unwrap();
        // corrupt the last arc of the mechanism OID
        let oid_end = wrapped.len() - 4;
        wrapped[oid_end] ^= 0x01;

        let err = unwrap_initial_token(&wrapped).unwrap_err();
        assert_eq!(ErrorKind::BadMechanism, err.error_type);
    }

    #[test]
    fn dispatch_rejects_unknown_tags() {
        let err = MechToken::decode(&[0x07, 0x07, 0x00, 0x00]).unwrap_err();
        assert_eq!(ErrorKind::DefectiveToken, err.error_type);

        let wrapped = wrap_initial_token(&[0x0c, 0x00, 0x30, 0x00]).unwrap();
        let err = MechToken::decode(&wrapped).unwrap_err();
        assert_eq!(ErrorKind::DefectiveToken, err.error_type);
    }

    #[test]
    fn dispatch_reads_bare_v2_tokens() {
        let raw = vec![
            0x04, 0x04, 0x05, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2a, 0x01,
            0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
        ];

        match MechToken::decode(&raw).unwrap() {
            MechToken::MicV2(mic) => {
                assert_eq!(0x05, mic.flags);
                assert_eq!(0x2a, mic.seq_num);
            }
            other => panic!("expected a v2 MIC token, got {:?}", other),
        }
    }

    #[test]
    fn der_len_round_trip() {
        for len in [0usize, 1, 127, 128, 255, 256, 0xffff, 0x10000, 0xff_ffff, 0x100_0000] {
            let mut out = Vec::new();
            encode_der_len(len, &mut out);

            let (decoded, consumed) = read_der_len(&out).unwrap();
            assert_eq!(len, decoded);
            assert_eq!(out.len(), consumed);
        }
    }

    #[test]
    fn der_len_uses_minimal_octets() {
        let encoded = |len| {
            let mut out = Vec::new();
            encode_der_len(len, &mut out);
            out
        };

        assert_eq!(vec![0x7f], encoded(0x7f));
        assert_eq!(vec![0x81, 0x80], encoded(0x80));
        assert_eq!(vec![0x81, 0xff], encoded(0xff));
        assert_eq!(vec![0x82, 0x01, 0x00], encoded(0x100));
        assert_eq!(vec![0x82, 0xff, 0xff], encoded(0xffff));
        assert_eq!(vec![0x83, 0x01, 0x00, 0x00], encoded(0x10000));
        assert_eq!(vec![0x83, 0xff, 0xff, 0xff], encoded(0xff_ffff));
        assert_eq!(vec![0x84, 0x01, 0x00, 0x00, 0x00], encoded(0x100_0000));
    }
}
