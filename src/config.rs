//! Issuer configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Call [`IssuerConfig::validate`] (done by
//! [`OperationalCredentialsIssuer::new`](crate::OperationalCredentialsIssuer::new))
//! before use.

use serde::{Deserialize, Serialize};

use crate::{
    constants::*,
    error::{IssuerError, IssuerResult},
    FabricId, NodeId,
};

/// What to do when a CA keypair is absent from storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypairPolicy {
    /// Keypairs are provisioned out of band; a missing one is a configuration error.
    #[default]
    RequirePreprovisioned,
    /// Generate and persist a fresh keypair. Meant for tests and development fabrics.
    AutoGenerate,
}

/// What to do when no intermediate certificate is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcacPolicy {
    #[default]
    RequirePreprovisioned,
    /// Have the root sign a new ICAC over the intermediate keypair.
    GenerateFromRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Fabric used when a request does not name one
    pub fabric_id: FabricId,
    /// First node ID handed out by the allocator
    pub first_node_id: NodeId,
    /// notBefore of every generated certificate
    pub effective_start_unix_secs: u64,
    pub validity_secs: u64,
    /// MatterRCACId for a newly generated root. Random when unset.
    pub root_ca_id: Option<u64>,
    /// MatterICACId for a newly generated intermediate. Random when unset.
    pub intermediate_ca_id: Option<u64>,
    /// Identity protection key returned with every chain
    #[serde(with = "ipk_hex")]
    pub ipk: Option<[u8; CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES]>,
    pub keypair_policy: KeypairPolicy,
    pub icac_policy: IcacPolicy,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            fabric_id: 1,
            first_node_id: MIN_OPERATIONAL_NODE_ID,
            effective_start_unix_secs: DEFAULT_EFFECTIVE_START_UNIX_SECS,
            validity_secs: DEFAULT_CERT_VALIDITY_SECS,
            root_ca_id: None,
            intermediate_ca_id: None,
            ipk: Some(DEFAULT_IPK),
            keypair_policy: KeypairPolicy::default(),
            icac_policy: IcacPolicy::default(),
        }
    }
}

impl IssuerConfig {
    pub fn from_json(json: &str) -> IssuerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IssuerError::Configuration(format!("invalid issuer config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IssuerResult<()> {
        if self.fabric_id == UNDEFINED_FABRIC_ID {
            return Err(IssuerError::Configuration(
                "fabric_id must not be 0".to_string(),
            ));
        }
        if !(MIN_OPERATIONAL_NODE_ID..=MAX_OPERATIONAL_NODE_ID).contains(&self.first_node_id) {
            return Err(IssuerError::Configuration(format!(
                "first_node_id {:#x} is outside the operational range",
                self.first_node_id
            )));
        }
        if self.validity_secs == 0 {
            return Err(IssuerError::Configuration(
                "validity_secs must be positive".to_string(),
            ));
        }
        if self.effective_start_unix_secs.checked_add(self.validity_secs).is_none() {
            return Err(IssuerError::Configuration(
                "certificate validity overflows".to_string(),
            ));
        }
        if self.root_ca_id == Some(0) || self.intermediate_ca_id == Some(0) {
            return Err(IssuerError::Configuration(
                "CA identifiers must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The IPK is written as 32 hex digits.
mod ipk_hex {
    use hex::FromHex;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::constants::CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES;

    type Ipk = [u8; CRYPTO_SYMMETRIC_KEY_LENGTH_BYTES];

    pub fn serialize<S: Serializer>(ipk: &Option<Ipk>, serializer: S) -> Result<S::Ok, S::Error> {
        match ipk {
            Some(ipk) => serializer.serialize_some(&hex::encode(ipk)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Ipk>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| Ipk::from_hex(s).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IssuerConfig::default();
        assert_eq!(config.fabric_id, 1);
        assert_eq!(config.first_node_id, 1);
        assert_eq!(config.ipk, Some(*b"temporary ipk 01"));
        assert_eq!(config.keypair_policy, KeypairPolicy::RequirePreprovisioned);
        assert_eq!(config.icac_policy, IcacPolicy::RequirePreprovisioned);
        config.validate().unwrap();
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(IssuerConfig::from_json("{}").unwrap(), IssuerConfig::default());
    }

    #[test]
    fn parse_json() {
        let config = IssuerConfig::from_json(
            r#"{
                "fabric_id": 42,
                "first_node_id": 100,
                "root_ca_id": 1,
                "ipk": "000102030405060708090a0b0c0d0e0f",
                "keypair_policy": "auto_generate",
                "icac_policy": "generate_from_root"
            }"#,
        )
        .unwrap();
        assert_eq!(config.fabric_id, 42);
        assert_eq!(config.first_node_id, 100);
        assert_eq!(config.root_ca_id, Some(1));
        assert_eq!(config.intermediate_ca_id, None);
        assert_eq!(config.ipk.unwrap()[15], 0x0f);
        assert_eq!(config.keypair_policy, KeypairPolicy::AutoGenerate);
        assert_eq!(config.icac_policy, IcacPolicy::GenerateFromRoot);

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(IssuerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn no_ipk() {
        let config = IssuerConfig::from_json(r#"{"ipk": null}"#).unwrap();
        assert_eq!(config.ipk, None);
    }

    #[test]
    fn invalid_values() {
        for json in [
            r#"{"fabric_id": 0}"#,
            r#"{"first_node_id": 0}"#,
            r#"{"first_node_id": 18446744004990074880}"#,
            r#"{"validity_secs": 0}"#,
            r#"{"root_ca_id": 0}"#,
            r#"{"ipk": "0011"}"#,
            r#"{"keypair_policy": "sometimes"}"#,
        ] {
            let err = IssuerConfig::from_json(json).unwrap_err();
            assert!(err.is_configuration_error(), "{json}");
        }
    }
}
