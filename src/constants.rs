//! All the constants used by the issuer.
//! Storage key names are persisted on disk and must stay stable across versions.

/// Length of an uncompressed SEC1 P-256 public key (0x04 || X || Y).
pub const P256_PUBLIC_KEY_LEN_BYTES: usize = 65;
pub const P256_PRIVATE_KEY_LEN_BYTES: usize = 32;
/// Serialized keypair layout: public key followed by the private scalar.
pub const P256_SERIALIZED_KEYPAIR_LEN_BYTES: usize =
    P256_PUBLIC_KEY_LEN_BYTES + P256_PRIVATE_KEY_LEN_BYTES;

pub const CRYPTO_SYMMETRIC_KEY_LENGTH_BITS: usize = 128;
pub const CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES: usize = CRYPTO_SYMMETRIC_KEY_LENGTH_BITS / 8;

/// Largest DER certificate the issuer will produce or accept from storage.
pub const MAX_DER_CERT_LEN: usize = 600;
/// Storage values are length-prefixed with a u16 by most backends.
pub const MAX_STORAGE_VALUE_LEN: usize = u16::MAX as usize;

// Storage key prefixes. The full key is the prefix followed by the
// lowercase hex of CA_STORAGE_SENTINEL.
pub const ROOT_KEYPAIR_STORAGE_KEY: &str = "CARootKey";
pub const INTERMEDIATE_KEYPAIR_STORAGE_KEY: &str = "CAIntermediateKey";
pub const ROOT_CERT_STORAGE_KEY: &str = "CARootCert";
pub const INTERMEDIATE_CERT_STORAGE_KEY: &str = "CAIntermediateCert";
/// CA material does not depend on a fabric, so it is keyed by a fixed id.
pub const CA_STORAGE_SENTINEL: u64 = 0;

/// Maximum number of CASE Authenticated Tags in a NOC subject.
pub const MAX_SUBJECT_CATS: usize = 3;

pub const UNDEFINED_FABRIC_ID: u64 = 0;
pub const MIN_OPERATIONAL_NODE_ID: u64 = 0x0000_0000_0000_0001;
pub const MAX_OPERATIONAL_NODE_ID: u64 = 0xFFFF_FFEF_FFFF_FFFF;

/// 2021-06-10T00:00:00Z
pub const DEFAULT_EFFECTIVE_START_UNIX_SECS: u64 = 1_623_283_200;
pub const SECONDS_IN_ONE_YEAR: u64 = 365 * 24 * 60 * 60;
pub const DEFAULT_CERT_VALIDITY_SECS: u64 = 10 * SECONDS_IN_ONE_YEAR;

/// The group test IPK ("temporary ipk 01") handed out when no fabric key is configured.
pub const DEFAULT_IPK: [u8; CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES] = *b"temporary ipk 01";

// Matter DN attribute OIDs (6.5.6.1)
pub const OID_MATTER_NODE_ID: &str = "1.3.6.1.4.1.37244.1.1";
pub const OID_MATTER_FIRMWARE_SIGNING_ID: &str = "1.3.6.1.4.1.37244.1.2";
pub const OID_MATTER_ICAC_ID: &str = "1.3.6.1.4.1.37244.1.3";
pub const OID_MATTER_RCAC_ID: &str = "1.3.6.1.4.1.37244.1.4";
pub const OID_MATTER_FABRIC_ID: &str = "1.3.6.1.4.1.37244.1.5";
pub const OID_MATTER_CASE_AUTH_TAG: &str = "1.3.6.1.4.1.37244.1.6";
pub const OID_COMMON_NAME: &str = "2.5.4.3";
// Organization name: http://www.oid-info.com/get/2.5.4.10
pub const OID_ORGANIZATION_NAME: &str = "2.5.4.10";

// ecPublicKey(1) http://www.oid-info.com/get/1.2.840.10045.2.1
pub const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
// prime256v1 http://www.oid-info.com/get/1.2.840.10045.3.1.7
pub const OID_PRIME256V1: &str = "1.2.840.10045.3.1.7";
// ecdsa-with-SHA256(2) http://www.oid-info.com/get/1.2.840.10045.4.3.2
pub const OID_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
pub const OID_KP_SERVER_AUTH: &str = "1.3.6.1.5.5.7.3.1";
pub const OID_KP_CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.2";

/// Context tags of the NOCSRElements structure (11.18.5.6)
pub const CSR_ELEMENTS_TAG_CSR: u8 = 1;
pub const CSR_ELEMENTS_TAG_NONCE: u8 = 2;
