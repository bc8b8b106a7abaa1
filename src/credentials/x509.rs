//! X.509 encoding of the Matter certificate chain.
//!
//! RCAC, ICAC and NOC are plain DER certificates signed with
//! ecdsa-with-SHA256. The Matter identity lives entirely in the subject and
//! issuer names, see [`DistinguishedName`].

use core::time::Duration;

use p256::{
    ecdsa::{signature::Verifier, DerSignature, Signature, VerifyingKey},
    PublicKey,
};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{
        asn1::{GeneralizedTime, UtcTime},
        Decode, Encode,
    },
    ext::pkix::ExtendedKeyUsage,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::{Time, Validity},
    Certificate,
};

use crate::{
    constants::*,
    credentials::dn::{DistinguishedName, DnAttributeType},
    crypto::{oid, subject_public_key_info, KeyPair},
    error::{IssuerError, IssuerResult},
};

/// Fields shared by every certificate in the chain.
#[derive(Debug, Clone, Copy)]
pub struct CertificateParams<'a> {
    pub serial_number: u64,
    /// Offsets from the UNIX epoch
    pub not_before: Duration,
    pub not_after: Duration,
    pub subject: &'a DistinguishedName,
    pub issuer: &'a DistinguishedName,
}

impl<'a> CertificateParams<'a> {
    pub fn new(
        serial_number: u64,
        effective_start_unix_secs: u64,
        validity_secs: u64,
        subject: &'a DistinguishedName,
        issuer: &'a DistinguishedName,
    ) -> Self {
        Self {
            serial_number,
            not_before: Duration::from_secs(effective_start_unix_secs),
            not_after: Duration::from_secs(effective_start_unix_secs.saturating_add(validity_secs)),
            subject,
            issuer,
        }
    }
}

/// Self-signed root certificate. Subject and issuer must be the same name
/// carrying a MatterRCACId.
pub fn new_root_cert(
    params: &CertificateParams<'_>,
    root_keypair: &KeyPair,
) -> IssuerResult<Vec<u8>> {
    let (id_type, _) = params.subject.cert_matter_id()?;
    if id_type != DnAttributeType::MatterRcacId {
        return Err(IssuerError::InvalidDistinguishedName(format!(
            "root certificate subject carries {id_type} instead of MatterRCACId"
        )));
    }
    if params.subject != params.issuer {
        return Err(IssuerError::InvalidDistinguishedName(
            "root certificate subject and issuer differ".to_string(),
        ));
    }

    build_certificate(
        Profile::Root,
        params,
        subject_public_key_info(&root_keypair.public_key())?,
        root_keypair,
        None,
    )
}

/// Intermediate certificate for `subject_public_key`, signed by the root.
pub fn new_icac(
    params: &CertificateParams<'_>,
    subject_public_key: &PublicKey,
    root_keypair: &KeyPair,
) -> IssuerResult<Vec<u8>> {
    let (id_type, _) = params.subject.cert_matter_id()?;
    if id_type != DnAttributeType::MatterIcacId {
        return Err(IssuerError::InvalidDistinguishedName(format!(
            "intermediate certificate subject carries {id_type} instead of MatterICACId"
        )));
    }
    params.issuer.get(DnAttributeType::MatterRcacId)?;
    check_fabric_ids(params)?;

    let profile = Profile::SubCA {
        issuer: params.issuer.to_name()?,
        path_len_constraint: Some(0),
    };
    build_certificate(
        profile,
        params,
        subject_public_key_info(subject_public_key)?,
        root_keypair,
        None,
    )
}

/// Node operational certificate for `subject_public_key`, signed by the
/// intermediate (or the root when the chain has no intermediate).
pub fn new_noc(
    params: &CertificateParams<'_>,
    subject_public_key: &PublicKey,
    issuer_keypair: &KeyPair,
) -> IssuerResult<Vec<u8>> {
    let (id_type, node_id) = params.subject.cert_matter_id()?;
    if id_type != DnAttributeType::MatterNodeId {
        return Err(IssuerError::InvalidDistinguishedName(format!(
            "NOC subject carries {id_type} instead of MatterNodeId"
        )));
    }
    if !(MIN_OPERATIONAL_NODE_ID..=MAX_OPERATIONAL_NODE_ID).contains(&node_id) {
        return Err(IssuerError::InvalidDistinguishedName(format!(
            "{node_id:016X} is not an operational node ID"
        )));
    }
    if params.subject.get(DnAttributeType::MatterFabricId)? == UNDEFINED_FABRIC_ID {
        return Err(IssuerError::InvalidDistinguishedName(
            "NOC subject has an undefined fabric ID".to_string(),
        ));
    }
    match params.issuer.cert_matter_id()? {
        (DnAttributeType::MatterIcacId, _) | (DnAttributeType::MatterRcacId, _) => {}
        (other, _) => {
            return Err(IssuerError::InvalidDistinguishedName(format!(
                "NOC issuer carries {other}"
            )))
        }
    }
    check_fabric_ids(params)?;

    let profile = Profile::Leaf {
        issuer: params.issuer.to_name()?,
        enable_key_agreement: false,
        enable_key_encipherment: false,
    };
    let eku = ExtendedKeyUsage(vec![oid(OID_KP_CLIENT_AUTH), oid(OID_KP_SERVER_AUTH)]);
    build_certificate(
        profile,
        params,
        subject_public_key_info(subject_public_key)?,
        issuer_keypair,
        Some(&eku),
    )
}

/// Subject and issuer must agree on the fabric when both name one.
fn check_fabric_ids(params: &CertificateParams<'_>) -> IssuerResult<()> {
    let subject_fabric = params.subject.get(DnAttributeType::MatterFabricId).ok();
    let issuer_fabric = params.issuer.get(DnAttributeType::MatterFabricId).ok();
    match (subject_fabric, issuer_fabric) {
        (Some(s), Some(i)) if s != i => Err(IssuerError::InvalidDistinguishedName(format!(
            "subject fabric {s:016X} does not match issuer fabric {i:016X}"
        ))),
        _ => Ok(()),
    }
}

fn build_certificate(
    profile: Profile,
    params: &CertificateParams<'_>,
    subject_public_key_info: SubjectPublicKeyInfoOwned,
    signer: &KeyPair,
    extended_key_usage: Option<&ExtendedKeyUsage>,
) -> IssuerResult<Vec<u8>> {
    let builder_error = |e: x509_cert::builder::Error| IssuerError::Certificate(e.to_string());

    let signing_key = signer.signing_key();
    let serial_number = SerialNumber::new(&params.serial_number.to_be_bytes())?;
    let validity = Validity {
        not_before: x509_time(params.not_before)?,
        not_after: x509_time(params.not_after)?,
    };

    let mut builder = CertificateBuilder::new(
        profile,
        serial_number,
        validity,
        params.subject.to_name()?,
        subject_public_key_info,
        &signing_key,
    )
    .map_err(builder_error)?;
    if let Some(eku) = extended_key_usage {
        builder.add_extension(eku).map_err(builder_error)?;
    }

    let certificate = builder.build::<DerSignature>().map_err(builder_error)?;
    let der = certificate.to_der()?;
    check_der_len(der.len())?;
    Ok(der)
}

/// UTCTime up to 2049, GeneralizedTime after that (RFC 5280 4.1.2.5).
fn x509_time(since_epoch: Duration) -> IssuerResult<Time> {
    match UtcTime::from_unix_duration(since_epoch) {
        Ok(time) => Ok(Time::UtcTime(time)),
        Err(_) => Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            since_epoch,
        )?)),
    }
}

pub(crate) fn check_der_len(len: usize) -> IssuerResult<()> {
    if len > MAX_DER_CERT_LEN {
        return Err(IssuerError::BufferTooSmall {
            needed: len,
            capacity: MAX_DER_CERT_LEN,
        });
    }
    Ok(())
}

fn parse(der: &[u8]) -> IssuerResult<Certificate> {
    check_der_len(der.len())?;
    Ok(Certificate::from_der(der)?)
}

pub fn extract_subject_dn(der: &[u8]) -> IssuerResult<DistinguishedName> {
    let certificate = parse(der)?;
    DistinguishedName::from_name(&certificate.tbs_certificate.subject)
}

pub fn extract_issuer_dn(der: &[u8]) -> IssuerResult<DistinguishedName> {
    let certificate = parse(der)?;
    DistinguishedName::from_name(&certificate.tbs_certificate.issuer)
}

pub fn extract_public_key(der: &[u8]) -> IssuerResult<PublicKey> {
    let certificate = parse(der)?;
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    PublicKey::from_sec1_bytes(spki.subject_public_key.raw_bytes())
        .map_err(|e| IssuerError::Certificate(format!("subject public key: {e}")))
}

/// Check that `der` was signed by `issuer_key`.
pub fn verify_signed_by(der: &[u8], issuer_key: &PublicKey) -> IssuerResult<()> {
    let certificate = parse(der)?;
    let tbs = certificate.tbs_certificate.to_der()?;
    let signature = Signature::from_der(certificate.signature.raw_bytes()).map_err(|_| {
        IssuerError::SignatureInvalid("certificate signature is not DER ECDSA".into())
    })?;
    VerifyingKey::from(*issuer_key)
        .verify(&tbs, &signature)
        .map_err(|_| IssuerError::SignatureInvalid("certificate not signed by issuer".into()))
}
