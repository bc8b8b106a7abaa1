//! Error types for credential issuance.
//!
//! Every failure is local to a single issuance. [`ErrorKind`] groups the
//! variants into the categories a host needs to decide what to do next;
//! nothing in this crate retries.

use thiserror::Error;

use crate::credentials::dn::DnAttributeType;

/// Errors raised while walking a TLV buffer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TlvError {
    /// The buffer ended inside an element or an open container
    #[error("TLV input truncated at offset {offset}")]
    Truncated { offset: usize },

    /// Element type bits outside the defined range
    #[error("invalid TLV element type {0:#04x}")]
    InvalidElementType(u8),

    /// End-of-container marker with no open container
    #[error("unexpected end of container at offset {offset}")]
    UnexpectedEndOfContainer { offset: usize },

    /// `enter_container` called while not positioned on a container
    #[error("reader is not positioned on a container")]
    NotAContainer,

    #[error("UTF-8 string element is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors from a [`PersistentStorage`](crate::storage::PersistentStorage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Value exceeds what the backend can hold
    #[error("value for `{key}` is {len} bytes, the store accepts at most {max}")]
    ValueTooLarge { key: String, len: usize, max: usize },

    /// Stored value could not be decoded
    #[error("corrupt value for `{key}`: {reason}")]
    Corrupt { key: String, reason: String },

    /// A thread panicked while holding the store lock
    #[error("storage lock poisoned")]
    Poisoned,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure categories reported to the completion sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or unusable pre-provisioned material. Fatal until an operator intervenes.
    Configuration,
    MalformedEnvelope,
    TruncatedInput,
    SignatureInvalid,
    /// Reading or writing cached CA material failed. Nothing was written.
    Storage,
    BufferTooSmall,
    /// Building or parsing a certificate or distinguished name failed.
    Certificate,
    /// The runtime dropped the issuance before it completed. Safe to retry.
    Cancelled,
}

impl ErrorKind {
    /// Stable numeric code handed to hosts that cannot carry the Rust type.
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::Configuration => 1,
            ErrorKind::MalformedEnvelope => 2,
            ErrorKind::TruncatedInput => 3,
            ErrorKind::SignatureInvalid => 4,
            ErrorKind::Storage => 5,
            ErrorKind::BufferTooSmall => 6,
            ErrorKind::Certificate => 7,
            ErrorKind::Cancelled => 8,
        }
    }
}

/// Errors that can occur while issuing an operational certificate chain.
#[derive(Debug, Error)]
pub enum IssuerError {
    /// Pre-provisioned key material or certificate is absent from storage
    #[error("missing pre-provisioned credential `{key}`")]
    MissingCredential { key: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stored keypair could not be deserialized or does not match itself
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("malformed CSR envelope: {0}")]
    MalformedEnvelope(String),

    #[error("CSR envelope truncated")]
    TruncatedInput,

    #[error("CSR signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("certificate needs {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("attribute {0} not found in distinguished name")]
    AttributeNotFound(DnAttributeType),

    #[error("invalid distinguished name: {0}")]
    InvalidDistinguishedName(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    /// The blocking issuance task ended without delivering an outcome
    #[error("issuance task was cancelled")]
    Cancelled,
}

impl IssuerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IssuerError::MissingCredential { .. }
            | IssuerError::Configuration(_)
            | IssuerError::InvalidKeyMaterial(_) => ErrorKind::Configuration,
            IssuerError::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            IssuerError::TruncatedInput => ErrorKind::TruncatedInput,
            IssuerError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            IssuerError::Storage(_) => ErrorKind::Storage,
            IssuerError::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            IssuerError::AttributeNotFound(_)
            | IssuerError::InvalidDistinguishedName(_)
            | IssuerError::Certificate(_) => ErrorKind::Certificate,
            IssuerError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    pub fn is_configuration_error(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

impl From<TlvError> for IssuerError {
    fn from(e: TlvError) -> Self {
        match e {
            TlvError::Truncated { .. } => IssuerError::TruncatedInput,
            other => IssuerError::MalformedEnvelope(other.to_string()),
        }
    }
}

impl From<x509_cert::der::Error> for IssuerError {
    fn from(e: x509_cert::der::Error) -> Self {
        IssuerError::Certificate(e.to_string())
    }
}

/// Result type for issuer operations.
pub type IssuerResult<T> = Result<T, IssuerError>;
