use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, IntegerAsn1, OctetStringAsn1};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::EncryptionKey;
use rand::rngs::OsRng;
use rand::Rng;

use crate::secret::Secret;
use crate::Result;

/// A Kerberos protocol key together with its encryption type.
#[derive(Debug, Clone, PartialEq)]
pub struct KerberosKey {
    pub etype: CipherSuite,
    pub value: Secret<Vec<u8>>,
}

impl KerberosKey {
    pub fn new(etype: CipherSuite, value: Vec<u8>) -> Self {
        Self {
            etype,
            value: Secret::new(value),
        }
    }

    /// Fresh random key of the given encryption type, e.g. an authenticator
    /// or AP-REP subkey.
    pub(crate) fn generate(etype: &CipherSuite) -> Self {
        let key_size = etype.cipher().key_size();
        let mut rnd = OsRng;

        let mut key = Vec::with_capacity(key_size);
        for _ in 0..key_size {
            key.push(rnd.gen());
        }

        Self::new(etype.clone(), key)
    }

    pub(crate) fn from_wire(key: &EncryptionKey) -> Result<Self> {
        let etype = CipherSuite::try_from(key.key_type.0 .0.as_slice())?;

        Ok(Self::new(etype, key.key_value.0 .0.clone()))
    }

    pub(crate) fn to_wire(&self) -> EncryptionKey {
        EncryptionKey {
            key_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(&self.etype)])),
            key_value: ExplicitContextTag1::from(OctetStringAsn1::from(self.value.as_ref().clone())),
        }
    }

    pub(crate) fn key(&self) -> &[u8] {
        self.value.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use picky_krb::crypto::CipherSuite;

    use super::KerberosKey;

    #[test]
    fn generated_key_has_cipher_key_size() {
        let key = KerberosKey::generate(&CipherSuite::Aes256CtsHmacSha196);
        assert_eq!(32, key.key().len());

        let key = KerberosKey::generate(&CipherSuite::Des3CbcSha1Kd);
        assert_eq!(24, key.key().len());
    }

    #[test]
    fn wire_round_trip() {
        let key = KerberosKey::generate(&CipherSuite::Aes128CtsHmacSha196);

        let restored = KerberosKey::from_wire(&key.to_wire()).unwrap();

        assert_eq!(key, restored);
    }
}
