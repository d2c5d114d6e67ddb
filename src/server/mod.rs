//! Acceptor half of the context-establishment exchange.

pub(crate) mod extractors;
pub(crate) mod generators;

use picky_krb::constants::error_codes::{
    KRB_AP_ERR_BADMATCH, KRB_AP_ERR_BADVERSION, KRB_AP_ERR_BAD_INTEGRITY, KRB_AP_ERR_INAPP_CKSUM, KRB_AP_ERR_MSG_TYPE,
    KRB_AP_ERR_SKEW, KRB_AP_ERR_TKT_EXPIRED, KRB_AP_ERR_TKT_NYV, KRB_ERR_GENERIC,
};
use picky_krb::constants::gss_api::{AP_REP_TOKEN_ID, AUTHENTICATOR_CHECKSUM_TYPE};
use picky_krb::constants::types::AP_REQ_MSG_TYPE;
use picky_krb::data_types::EncTicketPart;
use time::OffsetDateTime;
use tracing::{debug, error};

use self::extractors::{
    decrypt_ap_req_authenticator, decrypt_ap_req_ticket, filter_for_ticket, service_principal,
};
use crate::checksum::{AuthenticatorChecksum, CHANNEL_BINDINGS_MIC_USAGE};
use crate::config::{ContextConfig, KeytabEntry};
use crate::context::{ContextRole, ContextState, ContextStep, Krb5Context};
use crate::crypto::compute_md5_channel_bindings_hash;
use crate::flags::{ApOptions, GssFlags};
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::token::{encode_setup_token, MechToken};
use crate::utils::integer_as_u64;
use crate::{Error, ErrorKind, Result, KERBEROS_VERSION};

/// A setup failure that translates to a KRB-ERROR on the wire, or an error
/// the acceptor cannot meaningfully report to the peer.
enum Failure {
    Kerberos { error_code: u32, description: String },
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        let error_code = match err.error_type {
            ErrorKind::KerberosError(error_code) => error_code,
            ErrorKind::IntegrityCheck => KRB_AP_ERR_BAD_INTEGRITY,
            ErrorKind::DefectiveToken | ErrorKind::DecryptFailure => KRB_ERR_GENERIC,
            _ => return Failure::Fatal(err),
        };

        Failure::Kerberos {
            error_code,
            description: err.description,
        }
    }
}

fn kerberos_failure(error_code: u32, description: impl Into<String>) -> Failure {
    Failure::Kerberos {
        error_code,
        description: description.into(),
    }
}

pub(crate) fn accept(token: &[u8], keytab: &[KeytabEntry], config: ContextConfig) -> Result<(Krb5Context, ContextStep)> {
    match establish(token, keytab, &config) {
        Ok(result) => Ok(result),
        Err(Failure::Fatal(err)) => Err(err),
        Err(Failure::Kerberos {
            error_code,
            description,
        }) => {
            eprintln!("DEBUG2 establish failed: error_code={} description={}", error_code, description);
            error!(error_code, "{}", description);

            let error_token = generators::generate_krb_error_token(error_code, service_hint(token).as_ref())?;

            Ok((
                Krb5Context::errored(ContextRole::Acceptor, &config),
                ContextStep::Failed {
                    error_code,
                    token: error_token,
                },
            ))
        }
    }
}

/// Best-effort service principal for the KRB-ERROR realm/sname fields; the
/// clear-text part of the ticket is all that is needed.
fn service_hint(token: &[u8]) -> Option<PrincipalIdentity> {
    match MechToken::decode(token) {
        Ok(MechToken::ApReq(ap_req)) => Some(service_principal(&ap_req)),
        _ => None,
    }
}

fn establish(
    token: &[u8],
    keytab: &[KeytabEntry],
    config: &ContextConfig,
) -> std::result::Result<(Krb5Context, ContextStep), Failure> {
    let ap_req = match MechToken::decode(token)? {
        MechToken::ApReq(ap_req) => ap_req,
        _ => return Err(kerberos_failure(KRB_ERR_GENERIC, "expected an AP-REQ token")),
    };

    if ap_req.0.pvno.0 .0.as_slice() != [KERBEROS_VERSION] {
        return Err(kerberos_failure(KRB_AP_ERR_BADVERSION, "unsupported AP-REQ pvno"));
    }
    if ap_req.0.msg_type.0 .0.as_slice() != [AP_REQ_MSG_TYPE] {
        return Err(kerberos_failure(KRB_AP_ERR_MSG_TYPE, "unexpected AP-REQ message type"));
    }

    let service = service_principal(&ap_req);

    let keytab_entry = filter_for_ticket(keytab, &ap_req, &service)?;
    let ticket_enc_part = decrypt_ap_req_ticket(&keytab_entry.key, &ap_req)?;

    let now = OffsetDateTime::now_utc();
    check_ticket_times(&ticket_enc_part, now, config)?;

    let session_key = KerberosKey::from_wire(&ticket_enc_part.0.key.0)
        .map_err(|_| kerberos_failure(KRB_ERR_GENERIC, "unsupported ticket session key type"))?;

    let authenticator = decrypt_ap_req_authenticator(&session_key, &ap_req)?;

    // [RFC 4120 §3.2.3](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3)
    // The client identity in the authenticator must repeat the ticket's.
    let client = PrincipalIdentity::from_wire(&ticket_enc_part.0.crealm.0, &ticket_enc_part.0.cname.0);
    let authenticator_client = PrincipalIdentity::from_wire(&authenticator.0.crealm.0, &authenticator.0.cname.0);
    if client != authenticator_client {
        return Err(kerberos_failure(
            KRB_AP_ERR_BADMATCH,
            "the client identities in the ticket and authenticator do not match",
        ));
    }

    let client_time = OffsetDateTime::try_from(authenticator.0.ctime.0 .0.clone())
        .map_err(|_| kerberos_failure(KRB_ERR_GENERIC, "the authenticator ctime is not a valid timestamp"))?;
    eprintln!("DEBUG now={:?} client_time={:?} diff={:?} max_skew={:?}", now, client_time, (now-client_time).abs(), config.max_time_skew);
    if (now - client_time).abs() > config.max_time_skew {
        return Err(kerberos_failure(
            KRB_AP_ERR_SKEW,
            "the authenticator ctime is outside the tolerated clock skew",
        ));
    }

    let negotiated_flags = match authenticator.0.cksum.0.as_ref() {
        Some(cksum) => {
            if cksum.0.cksumtype.0 .0 != AUTHENTICATOR_CHECKSUM_TYPE {
                return Err(kerberos_failure(
                    KRB_AP_ERR_INAPP_CKSUM,
                    "the authenticator carries a foreign checksum type",
                ));
            }

            let checksum = AuthenticatorChecksum::decode(&cksum.0.checksum.0 .0)?;
            validate_authenticator_checksum(&checksum, config, &session_key)?;

            checksum.flags
        }
        // Some Microsoft implementations omit the checksum entirely.
        None => config.flags,
    };

    let initiator_key = match authenticator.0.subkey.0.as_ref() {
        Some(subkey) => KerberosKey::from_wire(&subkey.0)
            .map_err(|_| kerberos_failure(KRB_ERR_GENERIC, "unsupported authenticator subkey type"))?,
        None => session_key.clone(),
    };

    let nonce = authenticator
        .0
        .seq_number
        .0
        .as_ref()
        .map(|seq_number| integer_as_u64(&seq_number.0))
        .unwrap_or_default();

    let ap_options_bytes: [u8; 4] = ap_req.0.ap_options.0 .0.as_bytes().try_into().map_err(|_| {
        kerberos_failure(KRB_ERR_GENERIC, "invalid AP-REQ ap-options field")
    })?;
    let ap_options = ApOptions::from_bits_truncate(u32::from_be_bytes(ap_options_bytes));
    let mutual =
        ap_options.contains(ApOptions::MUTUAL_REQUIRED) || negotiated_flags.contains(GssFlags::MUTUAL_AUTH);

    debug!(mutual, "AP-REQ validated");

    let (acceptor_key, step) = if mutual {
        let acceptor_subkey = KerberosKey::generate(&session_key.etype);

        let ap_rep = generators::generate_ap_rep(
            &session_key,
            authenticator.0.ctime.0.clone(),
            authenticator.0.cusec.0.clone(),
            nonce as u32,
            &acceptor_subkey,
        )?;
        let reply = encode_setup_token(AP_REP_TOKEN_ID, &ap_rep)?;

        (Some(acceptor_subkey), ContextStep::Established(Some(reply)))
    } else {
        (None, ContextStep::Established(None))
    };

    let context = Krb5Context {
        role: ContextRole::Acceptor,
        state: ContextState::Ready,
        flags: negotiated_flags,
        channel_bindings: config.channel_bindings.clone(),
        max_time_skew: config.max_time_skew,
        local_name: Some(service),
        peer_name: Some(client),
        session_key: Some(session_key),
        initiator_key: Some(initiator_key),
        acceptor_key,
        seq_number: nonce,
        peer_seq_number: nonce,
        ticket: Some(ticket_enc_part),
    };

    Ok((context, step))
}

fn check_ticket_times(
    ticket_enc_part: &EncTicketPart,
    now: OffsetDateTime,
    config: &ContextConfig,
) -> std::result::Result<(), Failure> {
    let endtime = OffsetDateTime::try_from(ticket_enc_part.0.endtime.0 .0.clone())
        .map_err(|_| kerberos_failure(KRB_ERR_GENERIC, "the ticket endtime is not a valid timestamp"))?;
    if now > endtime {
        return Err(kerberos_failure(KRB_AP_ERR_TKT_EXPIRED, "the ticket is expired"));
    }

    // [RFC 4120 §5.3](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    // A ticket without starttime is valid from its authtime.
    let starttime = ticket_enc_part
        .0
        .starttime
        .0
        .as_ref()
        .map(|starttime| starttime.0 .0.clone())
        .unwrap_or_else(|| ticket_enc_part.0.auth_time.0 .0.clone());
    let starttime = OffsetDateTime::try_from(starttime)
        .map_err(|_| kerberos_failure(KRB_ERR_GENERIC, "the ticket starttime is not a valid timestamp"))?;
    if starttime > now + config.max_time_skew {
        return Err(kerberos_failure(KRB_AP_ERR_TKT_NYV, "the ticket is not yet valid"));
    }

    Ok(())
}

fn validate_authenticator_checksum(
    checksum: &AuthenticatorChecksum,
    config: &ContextConfig,
    session_key: &KerberosKey,
) -> std::result::Result<(), Failure> {
    if !checksum.flags.contains(config.flags) {
        return Err(kerberos_failure(
            KRB_AP_ERR_INAPP_CKSUM,
            "the initiator did not offer the locally required flags",
        ));
    }

    let local_hash = config
        .channel_bindings
        .as_ref()
        .map(compute_md5_channel_bindings_hash)
        .unwrap_or_default();
    let local_empty = config
        .channel_bindings
        .as_ref()
        .map(|bindings| bindings.is_empty_or_zero())
        .unwrap_or(true);

    let bindings_match = checksum.bindings_hash == local_hash
        || (checksum.bindings_hash == [0x00; 16] && local_empty)
        // Legacy Microsoft initiators stamp an all-ones hash and rely on the
        // signed extension record instead.
        || (checksum.bindings_hash == [0xff; 16] && checksum.has_trailer());

    if !bindings_match {
        return Err(kerberos_failure(
            KRB_AP_ERR_INAPP_CKSUM,
            "the channel bindings do not match",
        ));
    }

    if let Some(extra_mic) = checksum.extra_mic.as_ref() {
        let encoded_bindings = config.channel_bindings.clone().unwrap_or_default().encode();
        let expected = session_key
            .etype
            .cipher()
            .checksum_type()
            .hasher()
            .checksum(session_key.key(), CHANNEL_BINDINGS_MIC_USAGE, &encoded_bindings)
            .map_err(Error::from)?;

        if *extra_mic != expected {
            return Err(kerberos_failure(
                KRB_AP_ERR_BAD_INTEGRITY,
                "the channel-binding checksum does not verify",
            ));
        }
    }

    Ok(())
}
