//! Fixtures shared by the context tests: a forged KDC that mints tickets
//! for a pinned service/client pair, and pre-established context pairs.

use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::wrapper::{
    ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, ExplicitContextTag4,
    ExplicitContextTag5, ExplicitContextTag7, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::key_usages::TICKET_REP;
use picky_krb::constants::types::{NT_PRINCIPAL, NT_SRV_INST};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{
    EncTicketPart, EncTicketPartInner, EncryptedData, KerberosFlags, KerberosTime, Ticket, TicketInner,
    TransitedEncoding,
};
use time::{Duration, OffsetDateTime};

use crate::config::{ContextConfig, KeytabEntry, TicketBundle};
use crate::context::{ContextRole, ContextState, Krb5Context};
use crate::flags::GssFlags;
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::utils::kerberos_string;
use crate::KERBEROS_VERSION;

pub(crate) const REALM: &str = "EXAMPLE.COM";
pub(crate) const KVNO: u32 = 2;

pub(crate) fn client_identity() -> PrincipalIdentity {
    PrincipalIdentity::new(REALM, NT_PRINCIPAL, vec!["alice".to_owned()])
}

pub(crate) fn service_identity() -> PrincipalIdentity {
    PrincipalIdentity::new(REALM, NT_SRV_INST, vec!["HTTP".to_owned(), "host.example.com".to_owned()])
}

/// A ticket as the KDC would mint it: the encrypted part holds the client
/// identity and the session key, sealed under the service long-term key.
pub(crate) fn forge_ticket(
    service_key: &KerberosKey,
    session_key: &KerberosKey,
    endtime: OffsetDateTime,
) -> Ticket {
    let now = OffsetDateTime::now_utc();

    let enc_ticket_part = EncTicketPart::from(EncTicketPartInner {
        flags: ExplicitContextTag0::from(KerberosFlags::from(BitString::with_bytes(vec![0x00; 4]))),
        key: ExplicitContextTag1::from(session_key.to_wire()),
        crealm: ExplicitContextTag2::from(kerberos_string(REALM).unwrap()),
        cname: ExplicitContextTag3::from(client_identity().to_principal_name().unwrap()),
        transited: ExplicitContextTag4::from(TransitedEncoding {
            tr_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![0x00])),
            contents: ExplicitContextTag1::from(OctetStringAsn1::from(Vec::new())),
        }),
        auth_time: ExplicitContextTag5::from(KerberosTime::from(GeneralizedTime::from(now))),
        starttime: Optional::from(None),
        endtime: ExplicitContextTag7::from(KerberosTime::from(GeneralizedTime::from(endtime))),
        renew_till: Optional::from(None),
        caddr: Optional::from(None),
        authorization_data: Optional::from(None),
    });

    let cipher = service_key.etype.cipher();
    let enc_data = cipher
        .encrypt(
            service_key.key(),
            TICKET_REP,
            &picky_asn1_der::to_vec(&enc_ticket_part).unwrap(),
        )
        .unwrap();

    Ticket::from(TicketInner {
        tkt_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        realm: ExplicitContextTag1::from(kerberos_string(REALM).unwrap()),
        sname: ExplicitContextTag2::from(service_identity().to_principal_name().unwrap()),
        enc_part: ExplicitContextTag3::from(EncryptedData {
            etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(&service_key.etype)])),
            kvno: Optional::from(Some(ExplicitContextTag1::from(IntegerAsn1::from(vec![KVNO as u8])))),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(enc_data)),
        }),
    })
}

pub(crate) fn keytab(service_key: &KerberosKey) -> Vec<KeytabEntry> {
    vec![KeytabEntry {
        realm: REALM.to_owned(),
        principal: vec!["HTTP".to_owned(), "host.example.com".to_owned()],
        kvno: Some(KVNO),
        key: service_key.clone(),
    }]
}

/// A matching (initiator credentials, acceptor keytab) pair with an
/// eight-hour ticket.
pub(crate) fn credentials(etype: &CipherSuite) -> (TicketBundle, Vec<KeytabEntry>) {
    let service_key = KerberosKey::generate(etype);
    let session_key = KerberosKey::generate(etype);

    let ticket = forge_ticket(
        &service_key,
        &session_key,
        OffsetDateTime::now_utc() + Duration::hours(8),
    );

    (
        TicketBundle {
            client: client_identity(),
            ticket,
            session_key,
        },
        keytab(&service_key),
    )
}

pub(crate) fn config() -> ContextConfig {
    ContextConfig::default()
}

pub(crate) fn mutual_config() -> ContextConfig {
    let mut config = ContextConfig::default();
    config.flags |= GssFlags::MUTUAL_AUTH;

    config
}

/// Context pair that skipped the wire exchange: shared keys, both `Ready`,
/// counters at zero.
pub(crate) fn established_pair(etype: &CipherSuite) -> (Krb5Context, Krb5Context) {
    let session_key = KerberosKey::generate(etype);
    let initiator_key = KerberosKey::generate(etype);

    let build = |role| Krb5Context {
        role,
        state: ContextState::Ready,
        flags: GssFlags::default(),
        channel_bindings: None,
        max_time_skew: Duration::minutes(5),
        local_name: None,
        peer_name: None,
        ticket: None,
        session_key: Some(session_key.clone()),
        initiator_key: Some(initiator_key.clone()),
        acceptor_key: None,
        seq_number: 0,
        peer_seq_number: 0,
    };

    (build(ContextRole::Initiator), build(ContextRole::Acceptor))
}
