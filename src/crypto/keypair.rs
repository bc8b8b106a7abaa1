use elliptic_curve::sec1::ToEncodedPoint;
use p256::{
    ecdsa::{signature::Signer, DerSignature, SigningKey},
    PublicKey, SecretKey,
};
use x509_cert::{
    attr::{AttributeTypeAndValue, AttributeValue},
    der::{asn1::BitString, Encode, Tag},
    name::{RdnSequence, RelativeDistinguishedName},
    request::{CertReq, CertReqInfo, Version},
    spki::AlgorithmIdentifierOwned,
};

use crate::{
    constants::*,
    error::{IssuerError, IssuerResult},
};

use super::{oid, subject_public_key_info};

/// Fixed-capacity serialized keypair: SEC1 uncompressed public key followed by the private scalar.
pub type SerializedKeyPair = heapless::Vec<u8, P256_SERIALIZED_KEYPAIR_LEN_BYTES>;

/// A P-256 signing keypair.
pub struct KeyPair {
    secret_key: SecretKey,
}

impl KeyPair {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let secret_key = SecretKey::random(&mut rng);

        Self { secret_key }
    }

    /// Restore a keypair from its serialized form, checking that both halves agree.
    pub fn deserialize(serialized: &[u8]) -> IssuerResult<Self> {
        if serialized.len() != P256_SERIALIZED_KEYPAIR_LEN_BYTES {
            return Err(IssuerError::InvalidKeyMaterial(format!(
                "serialized keypair is {} bytes, expected {P256_SERIALIZED_KEYPAIR_LEN_BYTES}",
                serialized.len()
            )));
        }
        let (pub_key, priv_key) = serialized.split_at(P256_PUBLIC_KEY_LEN_BYTES);
        let secret_key = SecretKey::from_slice(priv_key)
            .map_err(|e| IssuerError::InvalidKeyMaterial(format!("private key: {e}")))?;
        let public_key = PublicKey::from_sec1_bytes(pub_key)
            .map_err(|e| IssuerError::InvalidKeyMaterial(format!("public key: {e}")))?;
        if public_key != secret_key.public_key() {
            return Err(IssuerError::InvalidKeyMaterial(
                "public key does not belong to the private key".to_string(),
            ));
        }

        Ok(Self { secret_key })
    }

    pub fn serialize(&self) -> SerializedKeyPair {
        let mut out = SerializedKeyPair::new();
        // Both halves have fixed lengths that sum to the capacity
        let _ = out.extend_from_slice(&self.public_key_bytes());
        let _ = out.extend_from_slice(self.secret_key.to_bytes().as_slice());
        out
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public_key()
    }

    pub fn public_key_bytes(&self) -> [u8; P256_PUBLIC_KEY_LEN_BYTES] {
        let point = self.public_key().to_encoded_point(false);
        let mut out = [0u8; P256_PUBLIC_KEY_LEN_BYTES];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret_key)
    }

    /// Build a PKCS#10 request over this keypair's public key, as a commissionee does
    /// when answering a CSRRequest.
    pub fn certificate_signing_request(&self) -> IssuerResult<Vec<u8>> {
        let subject = RdnSequence(vec![RelativeDistinguishedName(
            vec![AttributeTypeAndValue {
                oid: oid(OID_ORGANIZATION_NAME),
                value: AttributeValue::new(Tag::Utf8String, "CSR".as_bytes())?,
            }]
            .try_into()?,
        )]);
        let info = CertReqInfo {
            version: Version::V1,
            subject,
            public_key: subject_public_key_info(&self.public_key())?,
            attributes: Default::default(),
        };
        let message = info.to_der()?;

        // The signature goes in the request DER-encoded
        let signature: DerSignature = self.signing_key().sign(&message);

        let request = CertReq {
            info,
            algorithm: AlgorithmIdentifierOwned {
                oid: oid(OID_ECDSA_WITH_SHA256),
                parameters: None,
            },
            signature: BitString::from_bytes(signature.as_bytes())?,
        };
        Ok(request.to_der()?)
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}
