//! Matter operational certificates: distinguished names and X.509 encoding.

pub mod dn;
pub mod x509;

pub use dn::{CatValues, DistinguishedName, DnAttribute, DnAttributeType};
pub use x509::CertificateParams;
