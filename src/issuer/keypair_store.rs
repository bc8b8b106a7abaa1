use tracing::{info, warn};

use crate::{
    config::KeypairPolicy,
    constants::*,
    crypto::KeyPair,
    error::{IssuerError, IssuerResult},
    storage::{persistent_key, PersistentStorage},
};

/// Which CA keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerRole {
    RootIssuer,
    IntermediateIssuer,
}

impl IssuerRole {
    pub fn storage_key(self) -> String {
        let prefix = match self {
            IssuerRole::RootIssuer => ROOT_KEYPAIR_STORAGE_KEY,
            IssuerRole::IntermediateIssuer => INTERMEDIATE_KEYPAIR_STORAGE_KEY,
        };
        persistent_key(prefix, CA_STORAGE_SENTINEL)
    }
}

/// Read the keypair for `role`, generating one only under [`KeypairPolicy::AutoGenerate`].
pub fn load_or_provision(
    storage: &dyn PersistentStorage,
    role: IssuerRole,
    policy: KeypairPolicy,
) -> IssuerResult<KeyPair> {
    let key = role.storage_key();
    if let Some(serialized) = storage.get(&key)? {
        let keypair = KeyPair::deserialize(&serialized)?;
        info!(?role, key = %key, "Loaded CA keypair");
        return Ok(keypair);
    }

    match policy {
        KeypairPolicy::RequirePreprovisioned => {
            warn!(?role, key = %key, "CA keypair is not provisioned");
            Err(IssuerError::MissingCredential { key })
        }
        KeypairPolicy::AutoGenerate => {
            let keypair = KeyPair::new();
            storage.set(&key, &keypair.serialize())?;
            info!(?role, key = %key, "Generated CA keypair");
            Ok(keypair)
        }
    }
}

/// Persist `keypair` as the CA keypair for `role`, replacing any existing one.
pub fn store_keypair(
    storage: &dyn PersistentStorage,
    role: IssuerRole,
    keypair: &KeyPair,
) -> IssuerResult<()> {
    storage.set(&role.storage_key(), &keypair.serialize())?;
    Ok(())
}

/// The two live CA keypairs. Both are loaded together so a request never
/// proceeds with only half the chain available.
#[derive(Debug)]
pub struct KeypairStore {
    root: KeyPair,
    intermediate: KeyPair,
}

impl KeypairStore {
    pub fn load(storage: &dyn PersistentStorage, policy: KeypairPolicy) -> IssuerResult<Self> {
        let root = load_or_provision(storage, IssuerRole::RootIssuer, policy)?;
        let intermediate = load_or_provision(storage, IssuerRole::IntermediateIssuer, policy)?;
        Ok(Self { root, intermediate })
    }

    pub fn root(&self) -> &KeyPair {
        &self.root
    }

    pub fn intermediate(&self) -> &KeyPair {
        &self.intermediate
    }
}
