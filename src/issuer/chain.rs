use std::sync::Arc;

use once_cell::sync::OnceCell;
use p256::PublicKey;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::{
    config::{IcacPolicy, IssuerConfig},
    constants::*,
    credentials::{
        dn::{CatValues, DistinguishedName, DnAttribute, DnAttributeType},
        x509::{self, CertificateParams},
    },
    crypto::KeyPair,
    error::{IssuerError, IssuerResult},
    storage::{persistent_key, PersistentStorage},
    FabricId, NodeId,
};

use super::keypair_store::KeypairStore;

/// A resolved CA certificate and the identity parsed out of it.
#[derive(Debug, Clone)]
pub struct CaCertificate {
    der: Vec<u8>,
    subject: DistinguishedName,
    matter_id: u64,
}

impl CaCertificate {
    fn from_der(der: Vec<u8>, expected: DnAttributeType) -> IssuerResult<Self> {
        let subject = x509::extract_subject_dn(&der)?;
        let (id_type, matter_id) = subject.cert_matter_id()?;
        if id_type != expected {
            return Err(IssuerError::Certificate(format!(
                "CA certificate subject carries {id_type}, expected {expected}"
            )));
        }
        Ok(Self {
            der,
            subject,
            matter_id,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    /// MatterRCACId or MatterICACId of the certificate
    pub fn matter_id(&self) -> u64 {
        self.matter_id
    }
}

/// Resolves the RCAC and ICAC once, from storage or by generating them, and
/// signs fresh NOCs under them.
pub struct CertificateChainBuilder {
    storage: Arc<dyn PersistentStorage>,
    config: IssuerConfig,
    root: OnceCell<CaCertificate>,
    intermediate: OnceCell<CaCertificate>,
}

impl CertificateChainBuilder {
    pub fn new(storage: Arc<dyn PersistentStorage>, config: IssuerConfig) -> Self {
        Self {
            storage,
            config,
            root: OnceCell::new(),
            intermediate: OnceCell::new(),
        }
    }

    /// The RCAC, loaded or generated on first use. A failure leaves nothing
    /// cached so the next call looks again.
    pub fn ensure_root(&self, keys: &KeypairStore) -> IssuerResult<&CaCertificate> {
        self.root
            .get_or_try_init(|| self.load_or_generate_root(keys.root()))
    }

    /// The ICAC, resolving the RCAC first.
    pub fn ensure_intermediate(&self, keys: &KeypairStore) -> IssuerResult<&CaCertificate> {
        let root = self.ensure_root(keys)?;
        self.intermediate
            .get_or_try_init(|| self.load_or_generate_intermediate(keys, root))
    }

    pub fn root_issuer_id(&self) -> Option<u64> {
        self.root.get().map(CaCertificate::matter_id)
    }

    pub fn intermediate_issuer_id(&self) -> Option<u64> {
        self.intermediate.get().map(CaCertificate::matter_id)
    }

    /// Sign a NOC for `device_key` under `intermediate`. Never cached.
    pub fn generate_noc(
        &self,
        keys: &KeypairStore,
        intermediate: &CaCertificate,
        device_key: &PublicKey,
        fabric_id: FabricId,
        node_id: NodeId,
        cats: &CatValues,
    ) -> IssuerResult<Vec<u8>> {
        let mut subject = DistinguishedName::new([
            DnAttribute::MatterFabricId(fabric_id),
            DnAttribute::MatterNodeId(node_id),
        ])?;
        subject.add_cats(cats)?;

        info!(node_id, fabric_id, "Generating NOC");
        let params = self.params(node_id, &subject, intermediate.subject());
        let noc = x509::new_noc(&params, device_key, keys.intermediate())?;
        debug!(
            subject = %subject,
            fingerprint = %hex::encode(Sha256::digest(&noc)),
            len = noc.len(),
            "NOC generated"
        );
        Ok(noc)
    }

    fn params<'a>(
        &self,
        serial_number: u64,
        subject: &'a DistinguishedName,
        issuer: &'a DistinguishedName,
    ) -> CertificateParams<'a> {
        CertificateParams::new(
            serial_number,
            self.config.effective_start_unix_secs,
            self.config.validity_secs,
            subject,
            issuer,
        )
    }

    fn load_or_generate_root(&self, root_keypair: &KeyPair) -> IssuerResult<CaCertificate> {
        let key = persistent_key(ROOT_CERT_STORAGE_KEY, CA_STORAGE_SENTINEL);
        if let Some(der) = self.storage.get(&key)? {
            let rcac = CaCertificate::from_der(der, DnAttributeType::MatterRcacId)?;
            if x509::extract_issuer_dn(rcac.der())? != rcac.subject {
                return Err(IssuerError::Certificate(format!(
                    "stored `{key}` is not self-issued"
                )));
            }
            check_public_key(rcac.der(), root_keypair, &key)?;
            info!(rcac = %rcac.subject, "RCAC loaded");
            return Ok(rcac);
        }

        let rcac_id = self.config.root_ca_id.unwrap_or_else(random_ca_id);
        info!(rcac_id = %format_args!("{rcac_id:016X}"), "Generating RCAC");
        let subject = DistinguishedName::new([DnAttribute::MatterRcacId(rcac_id)])?;
        let der = x509::new_root_cert(&self.params(rcac_id, &subject, &subject), root_keypair)?;
        self.storage.set(&key, &der)?;

        Ok(CaCertificate {
            der,
            subject,
            matter_id: rcac_id,
        })
    }

    fn load_or_generate_intermediate(
        &self,
        keys: &KeypairStore,
        root: &CaCertificate,
    ) -> IssuerResult<CaCertificate> {
        let key = persistent_key(INTERMEDIATE_CERT_STORAGE_KEY, CA_STORAGE_SENTINEL);
        if let Some(der) = self.storage.get(&key)? {
            let icac = CaCertificate::from_der(der, DnAttributeType::MatterIcacId)?;
            check_public_key(icac.der(), keys.intermediate(), &key)?;
            let issuer = x509::extract_issuer_dn(icac.der())?;
            if issuer != root.subject {
                warn!(
                    icac_issuer = %issuer,
                    rcac = %root.subject,
                    "ICAC was not issued by the RCAC"
                );
            }
            info!(icac = %icac.subject, "ICAC loaded");
            return Ok(icac);
        }

        match self.config.icac_policy {
            IcacPolicy::RequirePreprovisioned => {
                error!(key = %key, "ICAC is not provisioned");
                Err(IssuerError::MissingCredential { key })
            }
            IcacPolicy::GenerateFromRoot => {
                let icac_id = self.config.intermediate_ca_id.unwrap_or_else(random_ca_id);
                info!(icac_id = %format_args!("{icac_id:016X}"), "Generating ICAC");
                let subject = DistinguishedName::new([DnAttribute::MatterIcacId(icac_id)])?;
                let der = x509::new_icac(
                    &self.params(icac_id, &subject, &root.subject),
                    &keys.intermediate().public_key(),
                    keys.root(),
                )?;
                self.storage.set(&key, &der)?;

                Ok(CaCertificate {
                    der,
                    subject,
                    matter_id: icac_id,
                })
            }
        }
    }
}

fn random_ca_id() -> u64 {
    rand::thread_rng().gen_range(1..=u64::MAX)
}

fn check_public_key(der: &[u8], keypair: &KeyPair, key: &str) -> IssuerResult<()> {
    if x509::extract_public_key(der)? != keypair.public_key() {
        return Err(IssuerError::Configuration(format!(
            "`{key}` does not certify the stored CA keypair"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::KeypairPolicy, storage::MemoryStorage};

    fn setup(config: IssuerConfig) -> (Arc<MemoryStorage>, KeypairStore, CertificateChainBuilder) {
        let storage = Arc::new(MemoryStorage::new());
        let keys = KeypairStore::load(storage.as_ref(), KeypairPolicy::AutoGenerate).unwrap();
        let chain = CertificateChainBuilder::new(storage.clone(), config);
        (storage, keys, chain)
    }

    fn generating() -> IssuerConfig {
        IssuerConfig {
            icac_policy: IcacPolicy::GenerateFromRoot,
            ..Default::default()
        }
    }

    #[test]
    fn root_is_generated_once() {
        let config = IssuerConfig {
            root_ca_id: Some(0xCACA_0001),
            ..Default::default()
        };
        let (storage, keys, chain) = setup(config.clone());
        assert_eq!(chain.root_issuer_id(), None);

        let rcac = chain.ensure_root(&keys).unwrap().clone();
        assert_eq!(rcac.matter_id(), 0xCACA_0001);
        assert_eq!(chain.root_issuer_id(), Some(0xCACA_0001));
        assert_eq!(storage.get("CARootCert0").unwrap().unwrap(), rcac.der());
        assert_eq!(chain.ensure_root(&keys).unwrap().der(), rcac.der());

        // A restarted issuer reuses the stored certificate
        let restarted = CertificateChainBuilder::new(storage.clone(), config);
        assert_eq!(restarted.ensure_root(&keys).unwrap().der(), rcac.der());
    }

    #[test]
    fn random_root_id_is_non_zero() {
        let (_, keys, chain) = setup(IssuerConfig::default());
        let rcac = chain.ensure_root(&keys).unwrap();
        assert_ne!(rcac.matter_id(), 0);
    }

    #[test]
    fn missing_icac_is_fatal_by_default() {
        let (storage, keys, chain) = setup(IssuerConfig::default());
        let err = chain.ensure_intermediate(&keys).unwrap_err();
        assert!(matches!(
            err,
            IssuerError::MissingCredential { ref key } if key == "CAIntermediateCert0"
        ));
        assert!(chain.root_issuer_id().is_some());
        assert_eq!(chain.intermediate_issuer_id(), None);

        // Provision the ICAC out of band; the next call picks it up
        let provisioner = CertificateChainBuilder::new(storage.clone(), generating());
        let icac = provisioner.ensure_intermediate(&keys).unwrap().clone();
        assert_eq!(chain.ensure_intermediate(&keys).unwrap().der(), icac.der());
        assert_eq!(chain.intermediate_issuer_id(), Some(icac.matter_id()));
    }

    #[test]
    fn generated_icac_is_signed_by_root() {
        let config = IssuerConfig {
            intermediate_ca_id: Some(0xCACA_0002),
            ..generating()
        };
        let (storage, keys, chain) = setup(config);
        let icac = chain.ensure_intermediate(&keys).unwrap();
        assert_eq!(icac.matter_id(), 0xCACA_0002);
        x509::verify_signed_by(icac.der(), &keys.root().public_key()).unwrap();
        assert_eq!(
            x509::extract_issuer_dn(icac.der()).unwrap(),
            *chain.ensure_root(&keys).unwrap().subject()
        );
        assert_eq!(
            x509::extract_public_key(icac.der()).unwrap(),
            keys.intermediate().public_key()
        );
        assert!(storage.get("CAIntermediateCert0").unwrap().is_some());
    }

    #[test]
    fn stored_root_must_match_keypair() {
        let (storage, keys, chain) = setup(IssuerConfig::default());
        chain.ensure_root(&keys).unwrap();

        let other_keys =
            KeypairStore::load(&MemoryStorage::new(), KeypairPolicy::AutoGenerate).unwrap();
        let restarted = CertificateChainBuilder::new(storage.clone(), IssuerConfig::default());
        let err = restarted.ensure_root(&other_keys).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn oversized_stored_root() {
        let (storage, keys, chain) = setup(IssuerConfig::default());
        storage.set("CARootCert0", &[0x30; 700]).unwrap();
        let err = chain.ensure_root(&keys).unwrap_err();
        assert!(matches!(err, IssuerError::BufferTooSmall { needed: 700, .. }));
        assert_eq!(chain.root_issuer_id(), None);
    }

    #[test]
    fn stored_root_with_wrong_identity() {
        let (storage, keys, chain) = setup(generating());
        let icac = chain.ensure_intermediate(&keys).unwrap().der().to_vec();
        storage.set("CARootCert0", &icac).unwrap();

        let restarted = CertificateChainBuilder::new(storage.clone(), IssuerConfig::default());
        let err = restarted.ensure_root(&keys).unwrap_err();
        assert!(matches!(err, IssuerError::Certificate(_)));
    }

    #[test]
    fn noc_under_intermediate() {
        let (_, keys, chain) = setup(generating());
        let icac = chain.ensure_intermediate(&keys).unwrap();
        let device = KeyPair::new();
        let cats = CatValues::new(&[0x0001_0001]).unwrap();

        let noc = chain
            .generate_noc(&keys, icac, &device.public_key(), 42, 7, &cats)
            .unwrap();
        x509::verify_signed_by(&noc, &keys.intermediate().public_key()).unwrap();
        let subject = x509::extract_subject_dn(&noc).unwrap();
        assert_eq!(subject.get(DnAttributeType::MatterFabricId).unwrap(), 42);
        assert_eq!(subject.get(DnAttributeType::MatterNodeId).unwrap(), 7);
        assert_eq!(subject.cats(), cats);
        assert_eq!(x509::extract_issuer_dn(&noc).unwrap(), *icac.subject());
    }
}
