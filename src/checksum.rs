//! The 0x8003 checksum carried by the AP-REQ authenticator.
//!
//! [Authenticator Checksum](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1)
//!
//! The payload is a structured blob rather than a keyed hash: a digest of
//! the channel bindings, the negotiated capability flags, and optional
//! delegation and extension records.

use crate::crypto::HASH_SIZE;
use crate::flags::GssFlags;
use crate::{Error, ErrorKind, Result};

/// Dlgopt type of the credential-delegation record.
const DELEGATION_TYPE: u16 = 1;

/// Key usage of the channel-binding checksum in the extension record.
pub(crate) const CHANNEL_BINDINGS_MIC_USAGE: i32 = 25;

/// Octet no   Name      Description
/// --------------------------------------------------------------
///  0..3      Lgth      Number of octets in Bnd, little-endian (16).
///  4..19     Bnd       MD5 hash of channel bindings.
///  20..23    Flags     Capability flag word, little-endian.
///  24..      Exts      Optional delegation record and extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorChecksum {
    pub bindings_hash: [u8; HASH_SIZE],
    pub flags: GssFlags,
    /// Delegated KRB-CRED bytes; carried through but not consumed.
    pub delegation: Option<Vec<u8>>,
    /// Keyed checksum over the encoded channel bindings.
    pub extra_mic: Option<Vec<u8>>,
}

impl AuthenticatorChecksum {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);

        out.extend_from_slice(&(HASH_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&self.bindings_hash);
        out.extend_from_slice(&self.flags.to_le_bytes());

        if let Some(delegation) = &self.delegation {
            out.extend_from_slice(&DELEGATION_TYPE.to_le_bytes());
            out.extend_from_slice(&(delegation.len() as u16).to_le_bytes());
            out.extend_from_slice(delegation);
        }

        if let Some(mic) = &self.extra_mic {
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&(mic.len() as u32).to_be_bytes());
            out.extend_from_slice(mic);
        }

        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                "authenticator checksum is too short",
            ));
        }

        let bindings_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        if bindings_len != HASH_SIZE {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("unsupported channel bindings hash length: {}", bindings_len),
            ));
        }

        let mut bindings_hash = [0; HASH_SIZE];
        bindings_hash.copy_from_slice(&data[4..20]);

        let flags = GssFlags::from_le_bytes(data[20..24].try_into().unwrap());

        let mut rest = &data[24..];

        let delegation = if rest.len() >= 4 && rest[0..2] == DELEGATION_TYPE.to_le_bytes() {
            let len = u16::from_le_bytes(rest[2..4].try_into().unwrap()) as usize;
            if rest.len() < 4 + len {
                return Err(Error::new(
                    ErrorKind::DefectiveToken,
                    "truncated delegation record in authenticator checksum",
                ));
            }

            let delegation = rest[4..4 + len].to_vec();
            rest = &rest[4 + len..];

            Some(delegation)
        } else {
            None
        };

        let extra_mic = if rest.len() >= 8 && rest[0..4] == [0, 0, 0, 0] {
            let len = u32::from_be_bytes(rest[4..8].try_into().unwrap()) as usize;
            if rest.len() < 8 + len {
                return Err(Error::new(
                    ErrorKind::DefectiveToken,
                    "truncated extension checksum in authenticator checksum",
                ));
            }

            Some(rest[8..8 + len].to_vec())
        } else {
            // Unknown trailing extensions are tolerated.
            None
        };

        Ok(Self {
            bindings_hash,
            flags,
            delegation,
            extra_mic,
        })
    }

    pub(crate) fn has_trailer(&self) -> bool {
        self.delegation.is_some() || self.extra_mic.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::AuthenticatorChecksum;
    use crate::flags::GssFlags;
    use crate::ErrorKind;

    fn sample() -> AuthenticatorChecksum {
        AuthenticatorChecksum {
            bindings_hash: [0xab; 16],
            flags: GssFlags::default() | GssFlags::MUTUAL_AUTH,
            delegation: None,
            extra_mic: None,
        }
    }

    #[test]
    fn plain_round_trip() {
        let checksum = sample();
        let encoded = checksum.encode();

        assert_eq!(24, encoded.len());
        assert_eq!(&[16, 0, 0, 0], &encoded[0..4]);
        assert_eq!(&[0x3a, 0, 0, 0], &encoded[20..24]);
        assert_eq!(checksum, AuthenticatorChecksum::decode(&encoded).unwrap());
    }

    #[test]
    fn round_trip_with_delegation_and_mic() {
        let checksum = AuthenticatorChecksum {
            delegation: Some(vec![0x01, 0x02, 0x03]),
            extra_mic: Some(vec![0x0a; 12]),
            ..sample()
        };

        let decoded = AuthenticatorChecksum::decode(&checksum.encode()).unwrap();

        assert_eq!(checksum, decoded);
    }

    #[test]
    fn short_blob_is_rejected() {
        let err = AuthenticatorChecksum::decode(&[0x10, 0, 0, 0]).unwrap_err();

        assert_eq!(ErrorKind::DefectiveToken, err.error_type);
    }

    #[test]
    fn truncated_delegation_is_rejected() {
        let mut encoded = sample().encode();
        encoded.extend_from_slice(&[0x01, 0x00, 0xff, 0x00]);

        let err = AuthenticatorChecksum::decode(&encoded).unwrap_err();

        assert_eq!(ErrorKind::DefectiveToken, err.error_type);
    }
}
