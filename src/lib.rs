//! Kerberos V5 GSS-API mechanism core.
//!
//! This crate implements the security-context state machine of the Kerberos
//! GSS-API mechanism ([RFC 4121]): an initiator proves possession of a
//! service ticket through an AP-REQ/AP-REP exchange, after which both peers
//! protect application messages with MIC (integrity) and Wrap (integrity +
//! confidentiality) tokens. Both token generations are supported: the legacy
//! [RFC 1964] format used with the triple-DES encryption type, and the
//! [RFC 4121] format used with the modern AES encryption types.
//!
//! Ticket acquisition (AS/TGS exchanges), keytab storage, and the outer
//! SPNEGO negotiation are out of scope: the initiator is handed a ready
//! [`TicketBundle`] and the acceptor a slice of [`KeytabEntry`] values.
//!
//! # Getting started
//!
//! ```rust,no_run
//! # fn example(ticket: krb5_gss::TicketBundle, keytab: Vec<krb5_gss::KeytabEntry>) -> krb5_gss::Result<()> {
//! use krb5_gss::{ContextConfig, ContextStep, GssFlags, Krb5Context};
//!
//! let mut config = ContextConfig::default();
//! config.flags |= GssFlags::MUTUAL_AUTH;
//!
//! let (mut initiator, step) = Krb5Context::initiate(ticket, config.clone())?;
//! let ap_req = match step {
//!     ContextStep::ContinueNeeded(token) => token,
//!     _ => unreachable!("mutual auth always continues"),
//! };
//!
//! let (mut acceptor, step) = Krb5Context::accept(&ap_req, &keytab, config)?;
//! if let ContextStep::Established(Some(ap_rep)) = step {
//!     initiator.process(&ap_rep)?;
//! }
//!
//! let wrapped = initiator.wrap(b"attack at dawn")?;
//! let plain = acceptor.unwrap(&wrapped)?;
//! assert_eq!(plain, b"attack at dawn");
//! # Ok(())
//! # }
//! ```
//!
//! [RFC 1964]: https://datatracker.ietf.org/doc/html/rfc1964
//! [RFC 4121]: https://datatracker.ietf.org/doc/html/rfc4121

use std::io;
use std::{error, fmt};

use picky_asn1::restricted_string::CharSetError;
use picky_asn1_der::Asn1DerError;
use picky_krb::crypto::KerberosCryptoError;
use picky_krb::gss_api::GssApiMessageError;

mod channel_bindings;
mod checksum;
mod client;
mod config;
mod context;
mod crypto;
mod flags;
mod keys;
mod name;
mod protect;
mod secret;
mod server;
mod token;
mod utils;

#[cfg(test)]
mod test_data;

pub use channel_bindings::ChannelBindings;
pub use checksum::AuthenticatorChecksum;
pub use config::{ContextConfig, KeytabEntry, TicketBundle};
pub use context::{ContextRole, ContextStep, Krb5Context};
pub use flags::GssFlags;
pub use keys::KerberosKey;
pub use name::{NameForm, PrincipalIdentity};
pub use secret::Secret;
pub use token::{MechToken, MicTokenV1, SealAlg, SignatureAlg, WrapTokenV1};

pub const KERBEROS_VERSION: u8 = 0x05;

/// The kind of a GSS-Kerberos error. Enables the caller to tell recoverable
/// per-message conditions apart from fatal context failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Token framing or content is malformed beyond recovery.
    DefectiveToken,
    /// The outer token carries a mechanism OID other than the Kerberos V5 one.
    BadMechanism,
    /// A KRB-ERROR was received from the peer, or a setup failure was
    /// translated to a Kerberos error code.
    KerberosError(u32),
    /// The per-message token's sequence number was already consumed.
    /// Recoverable: the receive window is unchanged.
    DuplicateToken,
    /// The per-message token's sequence number is ahead of the expected one.
    /// Recoverable: the receive window is unchanged.
    GapToken,
    /// The per-message token was produced by the wrong side of the context.
    BadDirection,
    /// A per-message checksum did not verify. Recoverable.
    IntegrityCheck,
    /// The token names an algorithm the mechanism has no backend for.
    UnsupportedAlgorithm,
    /// The requested attribute is not populated at this stage of the exchange.
    NotYetAvailable,
    /// The principal does not have the shape required by the name form.
    BadNameForm,
    /// The requested name form is not one of the supported OIDs.
    BadTargetOid,
    /// The operation is not valid in the context's current state.
    OutOfSequence,
    /// No usable key material is associated with the context.
    NoKey,
    EncryptFailure,
    DecryptFailure,
    InvalidParameter,
    InternalError,
}

/// Holds the [`ErrorKind`] and a description of the error.
#[derive(Debug, Clone)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
}

impl Error {
    pub fn new(error_type: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            error_type,
            description: description.into(),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::InternalError, format!("IO error: {:?}", err))
    }
}

impl From<Asn1DerError> for Error {
    fn from(err: Asn1DerError) -> Self {
        Self::new(ErrorKind::DefectiveToken, format!("ASN1 error: {:?}", err))
    }
}

impl From<GssApiMessageError> for Error {
    fn from(err: GssApiMessageError) -> Self {
        Self::new(ErrorKind::DefectiveToken, format!("GSS API message error: {:?}", err))
    }
}

impl From<KerberosCryptoError> for Error {
    fn from(err: KerberosCryptoError) -> Self {
        match err {
            KerberosCryptoError::IntegrityCheck => {
                Self::new(ErrorKind::IntegrityCheck, "wrong checksum of the encrypted data")
            }
            err => Self::new(ErrorKind::DecryptFailure, format!("Kerberos crypto error: {:?}", err)),
        }
    }
}

impl From<CharSetError> for Error {
    fn from(err: CharSetError) -> Self {
        Self::new(ErrorKind::InvalidParameter, format!("invalid string: {:?}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
