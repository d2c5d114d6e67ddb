//! The long-lived security context and its state machine.

use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::EncTicketPart;
use time::Duration;
use tracing::instrument;

use crate::channel_bindings::ChannelBindings;
use crate::config::{ContextConfig, KeytabEntry, TicketBundle};
use crate::flags::GssFlags;
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;
use crate::protect::v2::TokenFlags;
use crate::protect::{self, v1, v2};
use crate::token::MechToken;
use crate::{client, server, Error, ErrorKind, Result};

/// Which side of the exchange a context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    Initiator,
    Acceptor,
}

impl ContextRole {
    pub(crate) fn opposite(self) -> Self {
        match self {
            ContextRole::Initiator => ContextRole::Acceptor,
            ContextRole::Acceptor => ContextRole::Initiator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextState {
    /// Initiator that requested mutual authentication and waits for AP-REP.
    AwaitingApRep,
    /// Established; per-message operations are available.
    Ready,
    /// A fatal setup failure happened; the context only reports errors.
    Errored,
}

/// Outcome of a context-establishment step.
#[derive(Debug)]
pub enum ContextStep {
    /// Send this token to the peer and feed its reply to
    /// [`Krb5Context::process`].
    ContinueNeeded(Vec<u8>),
    /// The context is established. A token, when present, still has to be
    /// delivered to the peer.
    Established(Option<Vec<u8>>),
    /// Establishment failed. The KRB-ERROR token should be delivered to the
    /// peer; the context is unusable afterwards.
    Failed { error_code: u32, token: Vec<u8> },
}

/// A Kerberos GSS security context.
///
/// Created by [`Krb5Context::initiate`] or [`Krb5Context::accept`],
/// optionally advanced by [`Krb5Context::process`], and then used for
/// per-message protection. The context owns its key material; dropping (or
/// [`Krb5Context::delete`]-ing) it scrubs the keys.
#[derive(Debug)]
pub struct Krb5Context {
    pub(crate) role: ContextRole,
    pub(crate) state: ContextState,
    pub(crate) flags: GssFlags,
    pub(crate) channel_bindings: Option<ChannelBindings>,
    pub(crate) max_time_skew: Duration,
    pub(crate) local_name: Option<PrincipalIdentity>,
    pub(crate) peer_name: Option<PrincipalIdentity>,
    /// Decrypted service ticket; acceptor only.
    pub(crate) ticket: Option<EncTicketPart>,
    /// Session key from the ticket. Fallback protection key and the only
    /// key the v1 token formats use.
    pub(crate) session_key: Option<KerberosKey>,
    /// Authenticator subkey, or the session key when the initiator sent none.
    pub(crate) initiator_key: Option<KerberosKey>,
    /// AP-REP subkey; present only after a mutual-auth exchange.
    pub(crate) acceptor_key: Option<KerberosKey>,
    /// Sequence number stamped on the next outgoing per-message token.
    pub(crate) seq_number: u64,
    /// Sequence number expected on the next incoming per-message token.
    pub(crate) peer_seq_number: u64,
}

impl Krb5Context {
    /// Starts an initiator context from an acquired service ticket.
    ///
    /// Returns [`ContextStep::ContinueNeeded`] when mutual authentication
    /// was requested, [`ContextStep::Established`] otherwise; either way the
    /// produced AP-REQ token must be delivered to the acceptor.
    #[instrument(level = "debug", skip_all)]
    pub fn initiate(ticket: TicketBundle, config: ContextConfig) -> Result<(Self, ContextStep)> {
        client::initiate(ticket, config)
    }

    /// Starts an acceptor context from the initiator's first token.
    #[instrument(level = "debug", skip_all)]
    pub fn accept(token: &[u8], keytab: &[KeytabEntry], config: ContextConfig) -> Result<(Self, ContextStep)> {
        server::accept(token, keytab, config)
    }

    /// Feeds a peer token to a context whose establishment is in flight.
    #[instrument(level = "debug", skip_all, fields(role = ?self.role, state = ?self.state))]
    pub fn process(&mut self, token: &[u8]) -> Result<ContextStep> {
        match self.state {
            ContextState::AwaitingApRep => client::process_ap_rep(self, token),
            ContextState::Ready => Err(Error::new(
                ErrorKind::OutOfSequence,
                "the context is already established",
            )),
            ContextState::Errored => Err(Error::new(
                ErrorKind::DefectiveToken,
                "the context failed earlier; tokens are no longer processed",
            )),
        }
    }

    /// Deletes the context. Kerberos GSS has no teardown message, so no
    /// token is produced; key material is zeroized on drop.
    pub fn delete(self) {}

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn established(&self) -> bool {
        self.state == ContextState::Ready
    }

    /// Flags in effect for this context: the requested set on the initiator
    /// side, the set carried by the authenticator checksum on the acceptor
    /// side.
    pub fn negotiated_flags(&self) -> GssFlags {
        self.flags
    }

    /// Bindings the context was created with.
    pub fn channel_bindings(&self) -> Option<&ChannelBindings> {
        self.channel_bindings.as_ref()
    }

    pub fn max_time_skew(&self) -> Duration {
        self.max_time_skew
    }

    /// This party's principal.
    pub fn local_name(&self) -> Result<&PrincipalIdentity> {
        self.local_name
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotYetAvailable, "the local name is not established yet"))
    }

    /// The authenticated peer principal.
    pub fn peer_name(&self) -> Result<&PrincipalIdentity> {
        self.peer_name
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotYetAvailable, "the peer name is not established yet"))
    }

    /// The decrypted service ticket the initiator presented; acceptor only.
    pub fn peer_ticket(&self) -> Result<&EncTicketPart> {
        self.ticket
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotYetAvailable, "no decrypted ticket is available"))
    }

    /// Emits a MIC token protecting `message`.
    #[instrument(level = "debug", skip_all, fields(role = ?self.role, state = ?self.state))]
    pub fn get_mic(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.ensure_ready()?;

        let (key, acceptor_subkey) = self.sending_key()?;
        let token = match key.etype {
            CipherSuite::Des3CbcSha1Kd => {
                v1::generate_mic(self.ticket_session_key()?, self.role, self.seq_number, message)?
            }
            _ => {
                let (sign_usage, _) = protect::send_usages(self.role);
                v2::generate_mic(key, sign_usage, self.sending_flags(acceptor_subkey), self.seq_number, message)?
            }
        };

        self.seq_number += 1;

        Ok(token)
    }

    /// Verifies a MIC token against `message` and advances the receive
    /// window. Sequence and checksum failures leave the window untouched.
    #[instrument(level = "debug", skip_all, fields(role = ?self.role, state = ?self.state))]
    pub fn verify_mic(&mut self, message: &[u8], token: &[u8]) -> Result<()> {
        self.ensure_ready()?;

        let token_seq_number = match MechToken::decode(token)? {
            MechToken::MicV2(mic_token) => {
                let flags = TokenFlags::from_bits_truncate(mic_token.flags);
                self.check_v2_direction(flags)?;

                let (sign_usage, _) = protect::recv_usages(self.role);
                let key = self.receiving_key(flags.contains(TokenFlags::ACCEPTOR_SUBKEY))?;
                v2::verify_mic(&mic_token, key, sign_usage, message)?;

                mic_token.seq_num
            }
            MechToken::MicV1(mic_token) => {
                v1::verify_mic(&mic_token, self.ticket_session_key()?, self.role, message)?
            }
            _ => return Err(Error::new(ErrorKind::DefectiveToken, "expected a MIC token")),
        };

        protect::check_sequence_number(self.peer_seq_number, token_seq_number)?;
        self.peer_seq_number += 1;

        Ok(())
    }

    /// Emits a Wrap token carrying `message` encrypted.
    #[instrument(level = "debug", skip_all, fields(role = ?self.role, state = ?self.state))]
    pub fn wrap(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.ensure_ready()?;

        let (key, acceptor_subkey) = self.sending_key()?;
        let token = match key.etype {
            CipherSuite::Des3CbcSha1Kd => v1::wrap(self.ticket_session_key()?, self.role, self.seq_number, message)?,
            _ => {
                let (_, seal_usage) = protect::send_usages(self.role);
                v2::wrap(key, seal_usage, self.sending_flags(acceptor_subkey), self.seq_number, message)?
            }
        };

        self.seq_number += 1;

        Ok(token)
    }

    /// Recovers the message carried by a Wrap token and advances the receive
    /// window. Sequence and checksum failures leave the window untouched.
    #[instrument(level = "debug", skip_all, fields(role = ?self.role, state = ?self.state))]
    pub fn unwrap(&mut self, token: &[u8]) -> Result<Vec<u8>> {
        self.ensure_ready()?;

        let (message, token_seq_number) = match MechToken::decode(token)? {
            MechToken::WrapV2(wrap_token) => {
                let flags = TokenFlags::from_bits_truncate(wrap_token.flags);
                self.check_v2_direction(flags)?;

                let (_, seal_usage) = protect::recv_usages(self.role);
                let key = self.receiving_key(flags.contains(TokenFlags::ACCEPTOR_SUBKEY))?;
                let message = v2::unwrap(&wrap_token, key, seal_usage)?;

                (message, wrap_token.seq_num)
            }
            MechToken::WrapV1(wrap_token) => v1::unwrap(&wrap_token, self.ticket_session_key()?, self.role)?,
            _ => return Err(Error::new(ErrorKind::DefectiveToken, "expected a Wrap token")),
        };

        protect::check_sequence_number(self.peer_seq_number, token_seq_number)?;
        self.peer_seq_number += 1;

        Ok(message)
    }

    /// Placeholder context handed out after a failed `accept`.
    pub(crate) fn errored(role: ContextRole, config: &ContextConfig) -> Self {
        Self {
            role,
            state: ContextState::Errored,
            flags: config.flags,
            channel_bindings: config.channel_bindings.clone(),
            max_time_skew: config.max_time_skew,
            local_name: None,
            peer_name: None,
            ticket: None,
            session_key: None,
            initiator_key: None,
            acceptor_key: None,
            seq_number: 0,
            peer_seq_number: 0,
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != ContextState::Ready {
            return Err(Error::new(ErrorKind::OutOfSequence, "the context is not established"));
        }

        Ok(())
    }

    /// The acceptor subkey is preferred for protection as soon as both
    /// parties know it; the initiator subkey (or ticket key) is the fallback.
    fn sending_key(&self) -> Result<(&KerberosKey, bool)> {
        if let Some(key) = &self.acceptor_key {
            return Ok((key, true));
        }

        self.initiator_key
            .as_ref()
            .map(|key| (key, false))
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no protection key"))
    }

    fn receiving_key(&self, acceptor_subkey: bool) -> Result<&KerberosKey> {
        if acceptor_subkey {
            if let Some(key) = &self.acceptor_key {
                return Ok(key);
            }
        }

        self.initiator_key
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no protection key"))
    }

    fn ticket_session_key(&self) -> Result<&KerberosKey> {
        self.session_key
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NoKey, "the context has no ticket session key"))
    }

    fn sending_flags(&self, acceptor_subkey: bool) -> TokenFlags {
        let mut flags = TokenFlags::empty();

        if self.role == ContextRole::Acceptor {
            flags |= TokenFlags::SENT_BY_ACCEPTOR;
        }
        if acceptor_subkey {
            flags |= TokenFlags::ACCEPTOR_SUBKEY;
        }

        flags
    }

    fn check_v2_direction(&self, flags: TokenFlags) -> Result<()> {
        let from_acceptor = flags.contains(TokenFlags::SENT_BY_ACCEPTOR);
        if from_acceptor != (self.role == ContextRole::Initiator) {
            return Err(Error::new(
                ErrorKind::BadDirection,
                "per-message token was produced by this side of the context",
            ));
        }

        Ok(())
    }
}
