//! Readers for the PDUs an acceptor receives.

use picky_krb::constants::error_codes::{KRB_AP_ERR_NOKEY, KRB_AP_ERR_NOT_US};
use picky_krb::constants::key_usages::{AP_REQ_AUTHENTICATOR, TICKET_REP};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{Authenticator, EncTicketPart};
use picky_krb::messages::ApReq;

use crate::config::KeytabEntry;
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::utils::integer_as_u64;
use crate::{Error, ErrorKind, Result};

/// The service principal the presented ticket is addressed to, read from
/// the ticket's clear-text part.
pub(crate) fn service_principal(ap_req: &ApReq) -> PrincipalIdentity {
    let ticket = &ap_req.0.ticket.0 .0;

    PrincipalIdentity::from_wire(&ticket.realm.0, &ticket.sname.0)
}

/// Selects the keytab entry able to decrypt the presented ticket: the
/// service principal must match, and among its keys the ticket's kvno and
/// encryption type pick the winner.
pub(crate) fn filter_for_ticket<'a>(
    keytab: &'a [KeytabEntry],
    ap_req: &ApReq,
    service: &PrincipalIdentity,
) -> Result<&'a KeytabEntry> {
    let matching = keytab
        .iter()
        .filter(|entry| entry.realm == service.realm && entry.principal == service.components)
        .collect::<Vec<_>>();

    if matching.is_empty() {
        return Err(Error::new(
            ErrorKind::KerberosError(KRB_AP_ERR_NOT_US),
            "the ticket is addressed to another service principal",
        ));
    }

    let ticket_enc_part = &ap_req.0.ticket.0 .0.enc_part.0;

    let etype = CipherSuite::try_from(ticket_enc_part.etype.0 .0.as_slice()).map_err(|_| {
        Error::new(
            ErrorKind::KerberosError(KRB_AP_ERR_NOKEY),
            "no backend for the ticket encryption type",
        )
    })?;
    let kvno = ticket_enc_part
        .kvno
        .0
        .as_ref()
        .map(|kvno| integer_as_u64(&kvno.0) as u32);

    matching
        .into_iter()
        .find(|entry| {
            entry.key.etype == etype
                && match (entry.kvno, kvno) {
                    (Some(have), Some(want)) => have == want,
                    _ => true,
                }
        })
        .ok_or_else(|| {
            Error::new(
                ErrorKind::KerberosError(KRB_AP_ERR_NOKEY),
                "no key matches the ticket kvno and encryption type",
            )
        })
}

/// Decrypts the ticket with the selected long-term key and decodes its
/// encrypted part.
pub(crate) fn decrypt_ap_req_ticket(key: &KerberosKey, ap_req: &ApReq) -> Result<EncTicketPart> {
    let ticket_enc_part = &ap_req.0.ticket.0 .0.enc_part.0;
    let cipher = CipherSuite::try_from(ticket_enc_part.etype.0 .0.as_slice())?.cipher();

    let encoded_enc_part = cipher.decrypt(key.key(), TICKET_REP, &ticket_enc_part.cipher.0 .0)?;

    Ok(picky_asn1_der::from_bytes(&encoded_enc_part)?)
}

/// Decrypts the AP-REQ authenticator with the ticket session key and
/// decodes it.
pub(crate) fn decrypt_ap_req_authenticator(session_key: &KerberosKey, ap_req: &ApReq) -> Result<Authenticator> {
    let encrypted_authenticator = &ap_req.0.authenticator.0;
    let cipher = CipherSuite::try_from(encrypted_authenticator.etype.0 .0.as_slice())?.cipher();

    let encoded_authenticator = cipher.decrypt(
        session_key.key(),
        AP_REQ_AUTHENTICATOR,
        &encrypted_authenticator.cipher.0 .0,
    )?;

    Ok(picky_asn1_der::from_bytes(&encoded_authenticator)?)
}
