use picky_krb::data_types::Ticket;
use time::Duration;

use crate::channel_bindings::ChannelBindings;
use crate::flags::GssFlags;
use crate::keys::KerberosKey;
use crate::name::PrincipalIdentity;

/// Maximum tolerated clock difference between peers.
/// [RFC 4120 §3.2.3](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3)
const DEFAULT_MAX_TIME_SKEW_MS: i64 = 300_000;

/// Per-context configuration shared by both roles. Unknown concerns are the
/// caller's problem: the config is plain data, not a builder.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Requested capability flags; see [`GssFlags`] for the defaults.
    pub flags: GssFlags,
    /// Bindings tying the context to a specific transport channel.
    pub channel_bindings: Option<ChannelBindings>,
    pub max_time_skew: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            flags: GssFlags::default(),
            channel_bindings: None,
            max_time_skew: Duration::milliseconds(DEFAULT_MAX_TIME_SKEW_MS),
        }
    }
}

/// Everything the initiator carries over from a prior ticket acquisition
/// (AS/TGS exchanges happen outside this crate).
#[derive(Debug, Clone)]
pub struct TicketBundle {
    /// The client principal the ticket was issued to.
    pub client: PrincipalIdentity,
    /// The service ticket; its `sname`/`realm` name the acceptor.
    pub ticket: Ticket,
    /// Session key shared with the KDC-issued ticket.
    pub session_key: KerberosKey,
}

/// One long-term key of an acceptor service principal.
#[derive(Debug, Clone)]
pub struct KeytabEntry {
    pub realm: String,
    /// Name components of the service principal, e.g. `["HTTP", "host"]`.
    pub principal: Vec<String>,
    /// Key version; entries without one match any ticket kvno.
    pub kvno: Option<u32>,
    pub key: KerberosKey,
}
