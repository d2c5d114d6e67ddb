//! Readers for the PDUs an initiator receives.

use picky_krb::constants::key_usages::AP_REP_ENC;
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::EncApRepPart;
use picky_krb::messages::ApRep;

use crate::keys::KerberosKey;
use crate::Result;

/// Decrypts the EncAPRepPart with the ticket session key and decodes it.
pub(crate) fn decrypt_ap_rep_enc_part(session_key: &KerberosKey, ap_rep: &ApRep) -> Result<EncApRepPart> {
    let enc_part = &ap_rep.0.enc_part.0;
    let cipher = CipherSuite::try_from(enc_part.etype.0 .0.as_slice())?.cipher();

    let encoded_enc_part = cipher.decrypt(session_key.key(), AP_REP_ENC, &enc_part.cipher.0 .0)?;

    Ok(picky_asn1_der::from_bytes(&encoded_enc_part)?)
}
