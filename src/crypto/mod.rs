use elliptic_curve::sec1::ToEncodedPoint;
use p256::{
    ecdsa::{signature::Verifier, Signature, VerifyingKey},
    PublicKey,
};
use tracing::debug;
use x509_cert::{
    der::{asn1::BitString, oid::ObjectIdentifier, Any, Decode, Encode, Tag, Tagged},
    request::CertReq,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
};

use crate::{
    constants::{OID_ECDSA_WITH_SHA256, OID_EC_PUBLIC_KEY, OID_PRIME256V1},
    error::{IssuerError, IssuerResult},
};

pub mod keypair;

pub use keypair::{KeyPair, SerializedKeyPair};

/// Parse one of the dotted OID constants. They are all compile-time literals.
pub(crate) const fn oid(dotted: &'static str) -> ObjectIdentifier {
    ObjectIdentifier::new_unwrap(dotted)
}

/// id-ecPublicKey / prime256v1 SubjectPublicKeyInfo for `public_key`.
pub(crate) fn subject_public_key_info(
    public_key: &PublicKey,
) -> IssuerResult<SubjectPublicKeyInfoOwned> {
    let point = public_key.to_encoded_point(false);
    Ok(SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: oid(OID_EC_PUBLIC_KEY),
            parameters: Some(Any::new(
                Tag::ObjectIdentifier,
                oid(OID_PRIME256V1).as_bytes(),
            )?),
        },
        subject_public_key: BitString::from_bytes(point.as_bytes())?,
    })
}

/// Verify a PKCS#10 request's self-signature and return the key it certifies.
///
/// Only ecdsa-with-SHA256 over P-256 is accepted; anything else, including
/// an unparseable request, is reported as [`IssuerError::SignatureInvalid`].
pub fn verify_csr(csr: &[u8]) -> IssuerResult<PublicKey> {
    let invalid = |reason: &str| IssuerError::SignatureInvalid(reason.to_string());

    let request = CertReq::from_der(csr)
        .map_err(|e| IssuerError::SignatureInvalid(format!("unparseable CSR: {e}")))?;

    if request.algorithm.oid != oid(OID_ECDSA_WITH_SHA256) {
        return Err(invalid("signature algorithm is not ecdsa-with-SHA256"));
    }

    let spki = &request.info.public_key;
    if spki.algorithm.oid != oid(OID_EC_PUBLIC_KEY) {
        return Err(invalid("public key is not an EC key"));
    }
    match &spki.algorithm.parameters {
        Some(curve)
            if curve.tag() == Tag::ObjectIdentifier
                && curve.value() == oid(OID_PRIME256V1).as_bytes() => {}
        _ => return Err(invalid("public key is not on prime256v1")),
    }

    let key_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| invalid("public key bit string is not octet aligned"))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(key_bytes)
        .map_err(|_| invalid("public key is not a valid P-256 point"))?;

    let signature_bytes = request
        .signature
        .as_bytes()
        .ok_or_else(|| invalid("signature bit string is not octet aligned"))?;
    let signature =
        Signature::from_der(signature_bytes).map_err(|_| invalid("signature is not DER ECDSA"))?;

    let message = request.info.to_der()?;
    verifying_key
        .verify(&message, &signature)
        .map_err(|_| invalid("signature does not match the request"))?;

    debug!("CSR signature verified");
    Ok(PublicKey::from(verifying_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_generated_csr() {
        let keypair = KeyPair::new();
        let csr = keypair.certificate_signing_request().unwrap();
        let public_key = verify_csr(&csr).unwrap();
        assert_eq!(public_key, keypair.public_key());
    }

    #[test]
    fn tampered_csr_is_rejected() {
        let keypair = KeyPair::new();
        let mut csr = keypair.certificate_signing_request().unwrap();
        // The subject value "CSR" sits inside the signed portion
        let pos = csr.windows(3).position(|w| w == b"CSR").unwrap();
        csr[pos] = b'X';
        let err = verify_csr(&csr).unwrap_err();
        assert!(matches!(err, IssuerError::SignatureInvalid(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = verify_csr(&[0x30, 0x03, 0x02, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, IssuerError::SignatureInvalid(_)));
    }
}
