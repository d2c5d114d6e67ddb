//! Per-message protection: MIC and Wrap in both token generations.

pub(crate) mod v1;
pub(crate) mod v2;

use picky_krb::constants::key_usages::{ACCEPTOR_SEAL, ACCEPTOR_SIGN, INITIATOR_SEAL, INITIATOR_SIGN};

use crate::context::ContextRole;
use crate::{Error, ErrorKind, Result};

/// (sign, seal) key usages for tokens a party emits.
/// [RFC 4121 §2](https://datatracker.ietf.org/doc/html/rfc4121#section-2)
pub(crate) fn send_usages(role: ContextRole) -> (i32, i32) {
    match role {
        ContextRole::Initiator => (INITIATOR_SIGN, INITIATOR_SEAL),
        ContextRole::Acceptor => (ACCEPTOR_SIGN, ACCEPTOR_SEAL),
    }
}

/// (sign, seal) key usages for tokens a party receives: the emitting peer
/// played the opposite role.
pub(crate) fn recv_usages(role: ContextRole) -> (i32, i32) {
    send_usages(role.opposite())
}

/// Replay window: a token is only accepted at exactly the expected sequence
/// number. Earlier and later numbers are reported without advancing state so
/// the caller can drop or reorder.
pub(crate) fn check_sequence_number(expected: u64, received: u64) -> Result<()> {
    if received == expected {
        Ok(())
    } else if received < expected {
        Err(Error::new(
            ErrorKind::DuplicateToken,
            format!("token sequence number {} was already processed", received),
        ))
    } else {
        Err(Error::new(
            ErrorKind::GapToken,
            format!("token sequence number {} skips ahead of {}", received, expected),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::check_sequence_number;
    use crate::ErrorKind;

    #[test]
    fn sequence_window() {
        assert!(check_sequence_number(5, 5).is_ok());
        assert_eq!(
            ErrorKind::DuplicateToken,
            check_sequence_number(5, 4).unwrap_err().error_type
        );
        assert_eq!(ErrorKind::GapToken, check_sequence_number(5, 6).unwrap_err().error_type);
    }
}
