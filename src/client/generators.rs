//! Builders for the PDUs an initiator sends.

use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::wrapper::{
    ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, ExplicitContextTag4,
    ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8, IntegerAsn1, OctetStringAsn1,
    Optional,
};
use picky_krb::constants::gss_api::AUTHENTICATOR_CHECKSUM_TYPE;
use picky_krb::constants::key_usages::AP_REQ_AUTHENTICATOR;
use picky_krb::constants::types::{AD_AUTH_DATA_AP_OPTION_TYPE, AP_REQ_MSG_TYPE, KERB_AP_OPTIONS_CBT};
use picky_krb::data_types::{
    ApOptions as ApOptionsAsn1, Authenticator, AuthenticatorInner, AuthorizationData, AuthorizationDataInner,
    Checksum, EncryptedData, KerberosTime, Ticket,
};
use picky_krb::messages::{ApReq, ApReqInner};
use time::OffsetDateTime;

use crate::flags::ApOptions;
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::{Result, KERBEROS_VERSION};

/// Input parameters for the ApReq Authenticator.
#[derive(Debug)]
pub(crate) struct AuthenticatorOptions<'a> {
    pub client: &'a PrincipalIdentity,
    /// Encoded 0x8003 checksum payload.
    pub checksum: Vec<u8>,
    pub subkey: &'a KerberosKey,
    pub seq_number: u32,
    /// Marks the authenticator as carrying channel-binding information.
    pub kerb_ap_options_cbt: bool,
    pub ctime: OffsetDateTime,
    pub cusec: u32,
}

pub(crate) fn generate_authenticator(options: AuthenticatorOptions<'_>) -> Result<Authenticator> {
    let AuthenticatorOptions {
        client,
        checksum,
        subkey,
        seq_number,
        kerb_ap_options_cbt,
        ctime,
        cusec,
    } = options;

    let authorization_data = Optional::from(kerb_ap_options_cbt.then(|| {
        ExplicitContextTag8::from(AuthorizationData::from(vec![AuthorizationDataInner {
            ad_type: ExplicitContextTag0::from(IntegerAsn1::from(AD_AUTH_DATA_AP_OPTION_TYPE.to_vec())),
            ad_data: ExplicitContextTag1::from(OctetStringAsn1::from(KERB_AP_OPTIONS_CBT.to_vec())),
        }]))
    }));

    Ok(Authenticator::from(AuthenticatorInner {
        authenticator_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        crealm: ExplicitContextTag1::from(client.to_realm()?),
        cname: ExplicitContextTag2::from(client.to_principal_name()?),
        cksum: Optional::from(Some(ExplicitContextTag3::from(Checksum {
            cksumtype: ExplicitContextTag0::from(IntegerAsn1::from(AUTHENTICATOR_CHECKSUM_TYPE.to_vec())),
            checksum: ExplicitContextTag1::from(OctetStringAsn1::from(checksum)),
        }))),
        cusec: ExplicitContextTag4::from(IntegerAsn1::from(cusec.to_be_bytes().to_vec())),
        ctime: ExplicitContextTag5::from(KerberosTime::from(GeneralizedTime::from(ctime))),
        subkey: Optional::from(Some(ExplicitContextTag6::from(subkey.to_wire()))),
        seq_number: Optional::from(Some(ExplicitContextTag7::from(IntegerAsn1::from_bytes_be_unsigned(
            seq_number.to_be_bytes().to_vec(),
        )))),
        authorization_data,
    }))
}

pub(crate) fn generate_ap_req(
    ticket: Ticket,
    session_key: &KerberosKey,
    authenticator: &Authenticator,
    options: ApOptions,
) -> Result<ApReq> {
    let cipher = session_key.etype.cipher();

    let encoded_authenticator = picky_asn1_der::to_vec(authenticator)?;
    let encrypted_authenticator = cipher.encrypt(session_key.key(), AP_REQ_AUTHENTICATOR, &encoded_authenticator)?;

    Ok(ApReq::from(ApReqInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REQ_MSG_TYPE])),
        ap_options: ExplicitContextTag2::from(ApOptionsAsn1::from(BitString::with_bytes(
            options.bits().to_be_bytes().to_vec(),
        ))),
        ticket: ExplicitContextTag3::from(ticket),
        authenticator: ExplicitContextTag4::from(EncryptedData {
            etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(&session_key.etype)])),
            kvno: Optional::from(None),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(encrypted_authenticator)),
        }),
    }))
}
