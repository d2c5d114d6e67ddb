use oid::ObjectIdentifier;
use picky_asn1::wrapper::{Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, IntegerAsn1};
use picky_krb::constants::types::{NT_PRINCIPAL, NT_SRV_INST};
use picky_krb::data_types::{PrincipalName, Realm};

use crate::utils::kerberos_string;
use crate::{Error, ErrorKind, Result};

/// GSS_C_NT_USER_NAME
pub const NT_USER_NAME: &str = "1.2.840.113554.1.2.1.1";
/// GSS_C_NT_HOSTBASED_SERVICE
pub const NT_HOSTBASED_SERVICE: &str = "1.2.840.113554.1.2.1.4";
/// GSS_KRB5_NT_PRINCIPAL_NAME
pub const NT_KRB5_PRINCIPAL_NAME: &str = "1.2.840.113554.1.2.2.1";

/// Display forms a principal can be projected into.
///
/// [RFC 1964 §2.1](https://datatracker.ietf.org/doc/html/rfc1964#section-2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameForm {
    /// `GSS_C_NT_USER_NAME`: the bare login name of a user principal.
    User,
    /// `GSS_C_NT_HOSTBASED_SERVICE`: `service@host`.
    HostBasedService,
    /// `GSS_KRB5_NT_PRINCIPAL_NAME`: the full `comp1/comp2@REALM` form.
    KerberosPrincipal,
}

impl NameForm {
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        let oid = String::from(oid);

        match oid.as_str() {
            NT_USER_NAME => Ok(Self::User),
            NT_HOSTBASED_SERVICE => Ok(Self::HostBasedService),
            NT_KRB5_PRINCIPAL_NAME => Ok(Self::KerberosPrincipal),
            _ => Err(Error::new(
                ErrorKind::BadTargetOid,
                format!("unsupported name form OID: {}", oid),
            )),
        }
    }
}

/// A Kerberos principal in its internal representation: realm, name type,
/// and ordered name components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalIdentity {
    pub realm: String,
    pub name_type: u8,
    pub components: Vec<String>,
}

impl PrincipalIdentity {
    pub fn new(realm: impl Into<String>, name_type: u8, components: Vec<String>) -> Self {
        Self {
            realm: realm.into(),
            name_type,
            components,
        }
    }

    pub(crate) fn from_wire(realm: &Realm, name: &PrincipalName) -> Self {
        Self {
            realm: realm.to_string(),
            name_type: name.name_type.0 .0.first().copied().unwrap_or_default(),
            components: name.name_string.0 .0.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub(crate) fn to_principal_name(&self) -> Result<PrincipalName> {
        let mut components = Vec::with_capacity(self.components.len());
        for component in &self.components {
            components.push(kerberos_string(component)?);
        }

        Ok(PrincipalName {
            name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![self.name_type])),
            name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(components)),
        })
    }

    pub(crate) fn to_realm(&self) -> Result<Realm> {
        kerberos_string(&self.realm)
    }

    /// Projects the principal into the requested display form.
    pub fn translate(&self, form: NameForm) -> Result<String> {
        match form {
            NameForm::User => {
                if self.name_type != NT_PRINCIPAL || self.components.len() != 1 {
                    return Err(Error::new(
                        ErrorKind::BadNameForm,
                        "a user name requires an NT-PRINCIPAL with exactly one component",
                    ));
                }

                Ok(self.components[0].clone())
            }
            NameForm::HostBasedService => {
                if self.name_type != NT_SRV_INST || self.components.len() != 2 {
                    return Err(Error::new(
                        ErrorKind::BadNameForm,
                        "a host-based service name requires an NT-SRV-INST with exactly two components",
                    ));
                }

                Ok(format!("{}@{}", self.components[0], self.components[1]))
            }
            NameForm::KerberosPrincipal => Ok(format!("{}@{}", self.components.join("/"), self.realm)),
        }
    }
}

#[cfg(test)]
mod tests {
    use oid::ObjectIdentifier;
    use picky_krb::constants::types::{NT_PRINCIPAL, NT_SRV_INST};

    use super::{NameForm, PrincipalIdentity, NT_HOSTBASED_SERVICE};
    use crate::ErrorKind;

    fn http_service() -> PrincipalIdentity {
        PrincipalIdentity::new(
            "EXAMPLE.COM",
            NT_SRV_INST,
            vec!["HTTP".to_owned(), "host.example.com".to_owned()],
        )
    }

    #[test]
    fn service_name_projection() {
        assert_eq!(
            "HTTP@host.example.com",
            http_service().translate(NameForm::HostBasedService).unwrap()
        );
    }

    #[test]
    fn krb5_name_projection() {
        assert_eq!(
            "HTTP/host.example.com@EXAMPLE.COM",
            http_service().translate(NameForm::KerberosPrincipal).unwrap()
        );
    }

    #[test]
    fn user_name_projection() {
        let user = PrincipalIdentity::new("EXAMPLE.COM", NT_PRINCIPAL, vec!["alice".to_owned()]);

        assert_eq!("alice", user.translate(NameForm::User).unwrap());
    }

    #[test]
    fn user_form_rejects_service_principals() {
        let err = http_service().translate(NameForm::User).unwrap_err();

        assert_eq!(ErrorKind::BadNameForm, err.error_type);
    }

    #[test]
    fn name_form_from_oid() {
        let oid = ObjectIdentifier::try_from(NT_HOSTBASED_SERVICE).unwrap();
        assert_eq!(NameForm::HostBasedService, NameForm::from_oid(&oid).unwrap());

        let unknown = ObjectIdentifier::try_from("1.3.6.1.5.5.2").unwrap();
        let err = NameForm::from_oid(&unknown).unwrap_err();
        assert_eq!(ErrorKind::BadTargetOid, err.error_type);
    }

    #[test]
    fn wire_round_trip() {
        let service = http_service();

        let restored = PrincipalIdentity::from_wire(
            &service.to_realm().unwrap(),
            &service.to_principal_name().unwrap(),
        );

        assert_eq!(service, restored);
    }
}
