//! Builders for the PDUs an acceptor sends.

use picky_asn1::date::GeneralizedTime;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag10, ExplicitContextTag2,
    ExplicitContextTag3, ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag9,
    IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::key_usages::AP_REP_ENC;
use picky_krb::constants::types::{AP_REP_MSG_TYPE, KRB_ERROR_MSG_TYPE};
use picky_krb::data_types::{
    EncApRepPart, EncApRepPartInner, EncryptedData, KerberosTime, Microseconds, PrincipalName,
};
use picky_krb::messages::{ApRep, ApRepInner, KrbError, KrbErrorInner};

use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::token::{encode_setup_token, KRB_ERROR_TOKEN_ID};
use crate::utils::{kerberos_string, now_with_microseconds};
use crate::{Result, KERBEROS_VERSION};

/// AP-REP echoing the authenticator's timestamps, advertising the acceptor
/// sequence number and the fresh subkey.
/// [RFC 4120 §3.2.4](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3)
pub(crate) fn generate_ap_rep(
    session_key: &KerberosKey,
    ctime: KerberosTime,
    cusec: Microseconds,
    seq_number: u32,
    subkey: &KerberosKey,
) -> Result<ApRep> {
    let enc_ap_rep_part = EncApRepPart::from(EncApRepPartInner {
        ctime: ExplicitContextTag0::from(ctime),
        cusec: ExplicitContextTag1::from(cusec),
        subkey: Optional::from(Some(ExplicitContextTag2::from(subkey.to_wire()))),
        seq_number: Optional::from(Some(ExplicitContextTag3::from(IntegerAsn1::from_bytes_be_unsigned(
            seq_number.to_be_bytes().to_vec(),
        )))),
    });

    let cipher = session_key.etype.cipher();
    let enc_data = cipher.encrypt(session_key.key(), AP_REP_ENC, &picky_asn1_der::to_vec(&enc_ap_rep_part)?)?;

    Ok(ApRep::from(ApRepInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REP_MSG_TYPE])),
        enc_part: ExplicitContextTag2::from(EncryptedData {
            etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(&session_key.etype)])),
            kvno: Optional::from(None),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(enc_data)),
        }),
    }))
}

/// A KRB-ERROR framed for the wire. The mandatory realm/sname fields carry
/// the service principal when it is known at the point of failure.
pub(crate) fn generate_krb_error_token(error_code: u32, service: Option<&PrincipalIdentity>) -> Result<Vec<u8>> {
    let (stime, susec) = now_with_microseconds();

    let (realm, sname) = match service {
        Some(service) => (service.to_realm()?, service.to_principal_name()?),
        None => (
            kerberos_string("")?,
            PrincipalName {
                name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![0])),
                name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(Vec::new())),
            },
        ),
    };

    let krb_error = KrbError::from(KrbErrorInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_ERROR_MSG_TYPE])),
        ctime: Optional::from(None),
        cusec: Optional::from(None),
        stime: ExplicitContextTag4::from(KerberosTime::from(GeneralizedTime::from(stime))),
        susec: ExplicitContextTag5::from(IntegerAsn1::from(susec.to_be_bytes().to_vec())),
        error_code: ExplicitContextTag6::from(error_code),
        crealm: Optional::from(None),
        cname: Optional::from(None),
        realm: ExplicitContextTag9::from(realm),
        sname: ExplicitContextTag10::from(sname),
        e_text: Optional::from(None),
        e_data: Optional::from(None),
    });

    encode_setup_token(KRB_ERROR_TOKEN_ID, &krb_error)
}
