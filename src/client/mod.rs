//! Initiator half of the context-establishment exchange.

pub(crate) mod extractors;
pub(crate) mod generators;

use picky_krb::constants::error_codes::{KRB_AP_ERR_BAD_INTEGRITY, KRB_ERR_GENERIC};
use picky_krb::constants::gss_api::AP_REQ_TOKEN_ID;
use rand::rngs::OsRng;
use rand::Rng;
use tracing::{debug, error};

use self::extractors::decrypt_ap_rep_enc_part;
use self::generators::{generate_ap_req, generate_authenticator, AuthenticatorOptions};
use crate::channel_bindings::ChannelBindings;
use crate::checksum::{AuthenticatorChecksum, CHANNEL_BINDINGS_MIC_USAGE};
use crate::config::{ContextConfig, TicketBundle};
use crate::context::{ContextRole, ContextState, ContextStep, Krb5Context};
use crate::crypto::compute_md5_channel_bindings_hash;
use crate::flags::{ApOptions, GssFlags};
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::server::generators::generate_krb_error_token;
use crate::token::{encode_setup_token, MechToken};
use crate::utils::{integer_as_u64, now_with_microseconds};
use crate::{Error, ErrorKind, Result};

pub(crate) fn initiate(bundle: TicketBundle, config: ContextConfig) -> Result<(Krb5Context, ContextStep)> {
    let TicketBundle {
        client,
        ticket,
        session_key,
    } = bundle;

    let service = PrincipalIdentity::from_wire(&ticket.0.realm.0, &ticket.0.sname.0);

    // Both sequence counters start from the nonce the authenticator carries.
    let nonce = OsRng.gen::<u32>() & 0x7fff_ffff;
    let subkey = KerberosKey::generate(&session_key.etype);

    let (ctime, cusec) = now_with_microseconds();
    let authenticator = generate_authenticator(AuthenticatorOptions {
        client: &client,
        checksum: build_authenticator_checksum(&session_key, config.flags, config.channel_bindings.as_ref())?,
        subkey: &subkey,
        seq_number: nonce,
        kerb_ap_options_cbt: config.channel_bindings.is_some(),
        ctime,
        cusec,
    })?;

    let ap_req = generate_ap_req(ticket, &session_key, &authenticator, ApOptions::from(config.flags))?;
    let token = encode_setup_token(AP_REQ_TOKEN_ID, &ap_req)?;

    let mutual = config.flags.contains(GssFlags::MUTUAL_AUTH);

    let context = Krb5Context {
        role: ContextRole::Initiator,
        state: if mutual {
            ContextState::AwaitingApRep
        } else {
            ContextState::Ready
        },
        flags: config.flags,
        channel_bindings: config.channel_bindings,
        max_time_skew: config.max_time_skew,
        local_name: Some(client),
        peer_name: Some(service),
        ticket: None,
        session_key: Some(session_key),
        initiator_key: Some(subkey),
        acceptor_key: None,
        seq_number: u64::from(nonce),
        peer_seq_number: u64::from(nonce),
    };

    debug!(mutual, "AP-REQ generated");

    let step = if mutual {
        ContextStep::ContinueNeeded(token)
    } else {
        ContextStep::Established(Some(token))
    };

    Ok((context, step))
}

/// The 0x8003 payload: bindings digest, requested flags, and the keyed
/// checksum extension over the encoded bindings.
pub(crate) fn build_authenticator_checksum(
    session_key: &KerberosKey,
    flags: GssFlags,
    channel_bindings: Option<&ChannelBindings>,
) -> Result<Vec<u8>> {
    let bindings_hash = channel_bindings
        .map(compute_md5_channel_bindings_hash)
        .unwrap_or_default();

    let encoded_bindings = channel_bindings.cloned().unwrap_or_default().encode();
    let extra_mic = session_key.etype.cipher().checksum_type().hasher().checksum(
        session_key.key(),
        CHANNEL_BINDINGS_MIC_USAGE,
        &encoded_bindings,
    )?;

    Ok(AuthenticatorChecksum {
        bindings_hash,
        flags,
        delegation: None,
        extra_mic: Some(extra_mic),
    }
    .encode())
}

/// Initiator follow-up: consumes the acceptor's AP-REP (or surfaces its
/// KRB-ERROR) while the context awaits mutual authentication.
pub(crate) fn process_ap_rep(context: &mut Krb5Context, token: &[u8]) -> Result<ContextStep> {
    let decoded = match MechToken::decode(token) {
        Ok(decoded) => decoded,
        Err(err) if err.error_type == ErrorKind::BadMechanism => {
            context.state = ContextState::Errored;
            return Err(err);
        }
        Err(_) => return fail(context, KRB_ERR_GENERIC, "the reply token could not be decoded"),
    };

    match decoded {
        MechToken::ApRep(ap_rep) => {
            let session_key = context
                .session_key
                .as_ref()
                .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no ticket session key"))?;

            let enc_part = match decrypt_ap_rep_enc_part(session_key, &ap_rep) {
                Ok(enc_part) => enc_part,
                Err(_) => return fail(context, KRB_AP_ERR_BAD_INTEGRITY, "the AP-REP could not be decrypted"),
            };

            if let Some(seq_number) = enc_part.0.seq_number.0.as_ref() {
                context.peer_seq_number = integer_as_u64(&seq_number.0);
            }

            if let Some(subkey) = enc_part.0.subkey.0.as_ref() {
                context.acceptor_key = Some(KerberosKey::from_wire(&subkey.0)?);
            }

            context.state = ContextState::Ready;
            debug!("context established");

            Ok(ContextStep::Established(None))
        }
        MechToken::KrbError(krb_error) => {
            context.state = ContextState::Errored;

            let error_code = krb_error.0.error_code.0;
            error!(error_code, "the peer reported a Kerberos error");

            Err(Error::new(
                ErrorKind::KerberosError(error_code),
                "the peer reported a Kerberos error",
            ))
        }
        _ => fail(context, KRB_ERR_GENERIC, "expected an AP-REP or KRB-ERROR token"),
    }
}

fn fail(context: &mut Krb5Context, error_code: u32, description: &str) -> Result<ContextStep> {
    context.state = ContextState::Errored;
    error!(error_code, "{}", description);

    let token = generate_krb_error_token(error_code, context.peer_name.as_ref())?;

    Ok(ContextStep::Failed { error_code, token })
}
