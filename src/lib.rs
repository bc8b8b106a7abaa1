//! Operational credential issuer for Matter commissioners.
//!
//! Holds a root and intermediate CA and turns a commissionee's CSR into the
//! NOC, ICAC and RCAC it needs to join a fabric. CA key material and
//! certificates are kept in a caller-supplied [`PersistentStorage`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use matter_credentials_issuer::{
//!     CallbackSink, FileStorage, IssuanceOutcome, IssuanceRequest, IssuerConfig,
//!     OperationalCredentialsIssuer,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(FileStorage::open("issuer.json")?);
//! let issuer = OperationalCredentialsIssuer::new(storage, IssuerConfig::default())?;
//! # let envelope: Vec<u8> = Vec::new();
//! issuer.issue(
//!     IssuanceRequest::new(&envelope).with_fabric_id(42),
//!     CallbackSink(|outcome: IssuanceOutcome| println!("{outcome:?}")),
//! );
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate num_derive;

pub mod config;
pub mod constants;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod issuer;
pub mod storage;
pub mod tlv;

/// Operational node identifier
pub type NodeId = u64;
pub type FabricId = u64;

pub use config::{IcacPolicy, IssuerConfig, KeypairPolicy};
pub use credentials::{CatValues, DistinguishedName, DnAttribute, DnAttributeType};
pub use crypto::{verify_csr, KeyPair};
pub use error::{ErrorKind, IssuerError, IssuerResult, StorageError, TlvError};
#[cfg(feature = "std-tokio")]
pub use issuer::{ChannelSink, Completion};
pub use issuer::{
    CallbackSink, CompletionSink, IssuanceOutcome, IssuanceRequest, IssuanceResult,
    OperationalCredentialsIssuer,
};
pub use storage::{FileStorage, MemoryStorage, PersistentStorage};
