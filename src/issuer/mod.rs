//! Operational credential issuance.
//!
//! [`OperationalCredentialsIssuer`] turns a commissionee's NOCSRElements
//! envelope into a NOC/ICAC/RCAC chain:
//!
//! 1. allocate the node ID,
//! 2. load the CA keypairs,
//! 3. decode the envelope and verify the CSR,
//! 4. resolve the RCAC and ICAC,
//! 5. sign the NOC,
//! 6. deliver the chain to the caller's [`CompletionSink`].
//!
//! Any failure ends the request and is delivered instead. The node ID
//! allocated in step 1 is consumed either way.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info};

use crate::{
    config::IssuerConfig,
    constants::{CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES, UNDEFINED_FABRIC_ID},
    credentials::dn::CatValues,
    crypto,
    error::{IssuerError, IssuerResult},
    storage::PersistentStorage,
    FabricId, NodeId,
};

pub mod allocator;
pub mod chain;
pub mod completion;
pub mod csr;
pub mod keypair_store;

pub use allocator::NodeIdAllocator;
pub use chain::{CaCertificate, CertificateChainBuilder};
pub use completion::{CallbackSink, CompletionSink};
#[cfg(feature = "std-tokio")]
pub use completion::{ChannelSink, Completion};
pub use keypair_store::{IssuerRole, KeypairStore};

/// One CSR to be turned into a chain.
#[derive(Debug, Clone)]
pub struct IssuanceRequest<'a> {
    envelope: &'a [u8],
    fabric_id: Option<FabricId>,
    node_id: Option<NodeId>,
    cats: CatValues,
}

impl<'a> IssuanceRequest<'a> {
    /// `envelope` is the NOCSRElements TLV from the CSRResponse.
    pub fn new(envelope: &'a [u8]) -> Self {
        Self {
            envelope,
            fabric_id: None,
            node_id: None,
            cats: CatValues::default(),
        }
    }

    /// Overrides [`IssuerConfig::fabric_id`] for this request.
    pub fn with_fabric_id(mut self, fabric_id: FabricId) -> Self {
        self.fabric_id = Some(fabric_id);
        self
    }

    /// Issue under this node ID instead of the next counter value.
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_cats(mut self, cats: CatValues) -> Self {
        self.cats = cats;
        self
    }

    pub fn envelope(&self) -> &'a [u8] {
        self.envelope
    }
}

/// An issued chain. Owned by whoever receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceResult {
    pub noc: Vec<u8>,
    pub icac: Vec<u8>,
    pub rcac: Vec<u8>,
    pub ipk: Option<[u8; CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES]>,
    pub node_id: NodeId,
    pub fabric_id: FabricId,
}

pub type IssuanceOutcome = Result<IssuanceResult, IssuerError>;

type CsrObserver = Box<dyn Fn(&[u8]) + Send + Sync>;

pub struct OperationalCredentialsIssuer {
    storage: Arc<dyn PersistentStorage>,
    config: IssuerConfig,
    keys: OnceCell<KeypairStore>,
    chain: CertificateChainBuilder,
    allocator: NodeIdAllocator,
    csr_observer: Option<CsrObserver>,
}

impl OperationalCredentialsIssuer {
    pub fn new(storage: Arc<dyn PersistentStorage>, config: IssuerConfig) -> IssuerResult<Self> {
        config.validate()?;
        let allocator = NodeIdAllocator::new(config.first_node_id)?;
        let chain = CertificateChainBuilder::new(Arc::clone(&storage), config.clone());

        Ok(Self {
            storage,
            config,
            keys: OnceCell::new(),
            chain,
            allocator,
            csr_observer: None,
        })
    }

    /// Call `observer` with the envelope of every request that was issued.
    pub fn with_csr_observer(mut self, observer: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.csr_observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Load the CA keypairs now rather than on the first request.
    pub fn initialize(&self) -> IssuerResult<()> {
        self.keys().map(|_| ())
    }

    fn keys(&self) -> IssuerResult<&KeypairStore> {
        self.keys.get_or_try_init(|| {
            KeypairStore::load(self.storage.as_ref(), self.config.keypair_policy)
        })
    }

    /// The next allocation, and only that one, uses `node_id`.
    pub fn set_node_id_for_next_request(&self, node_id: NodeId) -> IssuerResult<()> {
        self.allocator.request_node_id(node_id)
    }

    /// MatterRCACId of the root, once it has been resolved.
    pub fn root_issuer_id(&self) -> Option<u64> {
        self.chain.root_issuer_id()
    }

    /// MatterICACId of the intermediate, once it has been resolved.
    pub fn intermediate_issuer_id(&self) -> Option<u64> {
        self.chain.intermediate_issuer_id()
    }

    /// Build the chain for `request` without delivering it.
    pub fn generate_noc_chain(&self, request: &IssuanceRequest<'_>) -> IssuanceOutcome {
        let node_id = self.allocator.allocate_with(request.node_id)?;
        let fabric_id = request.fabric_id.unwrap_or(self.config.fabric_id);
        debug!(node_id, fabric_id, "Allocated node ID");
        if fabric_id == UNDEFINED_FABRIC_ID {
            return Err(IssuerError::Configuration(
                "fabric ID 0 is not a valid fabric".to_string(),
            ));
        }

        let keys = self.keys()?;

        let csr = csr::extract_csr(request.envelope)?;
        let device_key = crypto::verify_csr(csr)?;

        let rcac = self.chain.ensure_root(keys)?;
        let icac = self.chain.ensure_intermediate(keys)?;

        let noc = self.chain.generate_noc(
            keys,
            icac,
            &device_key,
            fabric_id,
            node_id,
            &request.cats,
        )?;

        Ok(IssuanceResult {
            noc,
            icac: icac.der().to_vec(),
            rcac: rcac.der().to_vec(),
            ipk: self.config.ipk,
            node_id,
            fabric_id,
        })
    }

    /// Build the chain for `request` and hand the outcome to `sink`.
    pub fn issue<S: CompletionSink>(&self, request: IssuanceRequest<'_>, sink: S) {
        let outcome = self.generate_noc_chain(&request);
        let issued = match &outcome {
            Ok(result) => {
                info!(
                    node_id = result.node_id,
                    fabric_id = result.fabric_id,
                    "Issued operational credentials"
                );
                true
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "Failed to issue operational credentials");
                false
            }
        };
        sink.complete(outcome);

        if issued {
            if let Some(observer) = &self.csr_observer {
                observer(request.envelope);
            }
        }
    }

    /// Issue on tokio's blocking pool and wait for the outcome.
    #[cfg(feature = "std-tokio")]
    pub async fn issue_async(self: Arc<Self>, request: IssuanceRequest<'_>) -> IssuanceOutcome {
        use tokio::sync::oneshot;

        let envelope = request.envelope.to_vec();
        let IssuanceRequest {
            fabric_id,
            node_id,
            cats,
            ..
        } = request;

        let (sender, receiver) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || {
            let request = IssuanceRequest {
                envelope: &envelope,
                fabric_id,
                node_id,
                cats,
            };
            self.issue(request, sender);
        });
        if let Err(e) = task.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }

        receiver.await.unwrap_or(Err(IssuerError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        config::{IcacPolicy, KeypairPolicy},
        crypto::KeyPair,
        error::ErrorKind,
        storage::MemoryStorage,
    };

    fn issuer() -> OperationalCredentialsIssuer {
        let config = IssuerConfig {
            keypair_policy: KeypairPolicy::AutoGenerate,
            icac_policy: IcacPolicy::GenerateFromRoot,
            ..Default::default()
        };
        OperationalCredentialsIssuer::new(Arc::new(MemoryStorage::new()), config).unwrap()
    }

    fn envelope() -> Vec<u8> {
        let csr = KeyPair::new().certificate_signing_request().unwrap();
        csr::encode_csr_elements(&csr, Some(&[0u8; 32]))
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = IssuerConfig {
            fabric_id: 0,
            ..Default::default()
        };
        let err = OperationalCredentialsIssuer::new(Arc::new(MemoryStorage::new()), config)
            .err()
            .unwrap();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn generate_chain() {
        let issuer = issuer();
        let envelope = envelope();
        let result = issuer
            .generate_noc_chain(&IssuanceRequest::new(&envelope))
            .unwrap();
        assert_eq!(result.node_id, 1);
        assert_eq!(result.fabric_id, 1);
        assert_eq!(result.ipk, Some(*b"temporary ipk 01"));
        assert!(issuer.root_issuer_id().is_some());
        assert!(issuer.intermediate_issuer_id().is_some());
    }

    #[test]
    fn fabric_zero_is_rejected_before_ca_material_is_touched() {
        let storage = Arc::new(MemoryStorage::new());
        let config = IssuerConfig {
            keypair_policy: KeypairPolicy::AutoGenerate,
            icac_policy: IcacPolicy::GenerateFromRoot,
            ..Default::default()
        };
        let issuer = OperationalCredentialsIssuer::new(storage.clone(), config).unwrap();
        let envelope = envelope();
        let err = issuer
            .generate_noc_chain(&IssuanceRequest::new(&envelope).with_fabric_id(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(storage.is_empty().unwrap());
        assert_eq!(issuer.root_issuer_id(), None);

        // The node ID is still consumed
        let result = issuer
            .generate_noc_chain(&IssuanceRequest::new(&envelope))
            .unwrap();
        assert_eq!(result.node_id, 2);
    }

    #[test]
    fn cancelled_is_not_a_configuration_error() {
        let err = IssuerError::Cancelled;
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.code(), 8);
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn observer_sees_issued_envelopes_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&seen);
        let issuer = issuer().with_csr_observer(move |envelope| {
            observed.lock().unwrap().push(envelope.to_vec());
        });

        let envelope = envelope();
        issuer.issue(IssuanceRequest::new(&envelope), CallbackSink(|outcome: IssuanceOutcome| {
            assert!(outcome.is_ok());
        }));
        issuer.issue(IssuanceRequest::new(&[0x15]), CallbackSink(|outcome: IssuanceOutcome| {
            assert!(outcome.is_err());
        }));

        assert_eq!(*seen.lock().unwrap(), vec![envelope]);
    }
}
