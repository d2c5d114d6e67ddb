use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::IntegerAsn1;
use picky_krb::data_types::KerberosStringAsn1;
use time::OffsetDateTime;

use crate::Result;

/// [Microseconds](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.4)
///
/// ```not_rust
/// Microseconds    ::= INTEGER (0..999999)
/// ```
pub(crate) const MAX_MICROSECONDS: u32 = 999_999;

pub(crate) fn now_with_microseconds() -> (OffsetDateTime, u32) {
    let now = OffsetDateTime::now_utc();
    let microseconds = now.microsecond().min(MAX_MICROSECONDS);

    (now, microseconds)
}

/// Big-endian unsigned value of an ASN.1 INTEGER. Values wider than 64 bits
/// are truncated to their low-order bytes; Kerberos sequence numbers fit.
pub(crate) fn integer_as_u64(value: &IntegerAsn1) -> u64 {
    let bytes = value.0.as_slice();
    let bytes = if bytes.len() > 8 { &bytes[bytes.len() - 8..] } else { bytes };

    bytes.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}

pub(crate) fn kerberos_string(value: &str) -> Result<KerberosStringAsn1> {
    Ok(KerberosStringAsn1::from(IA5String::from_string(value.to_owned())?))
}
