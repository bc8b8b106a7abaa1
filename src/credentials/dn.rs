//! Distinguished names as they appear in Matter operational certificates (6.5.6).
//!
//! Matter identifiers are carried in X.509 names as UTF8String attributes
//! holding fixed-width uppercase hex: 16 digits for 64-bit IDs and 8 digits
//! for CASE Authenticated Tags.

use core::fmt;

use x509_cert::{
    attr::{AttributeTypeAndValue, AttributeValue},
    der::{oid::ObjectIdentifier, Tag, Tagged},
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

use crate::{
    constants::*,
    crypto::oid,
    error::{IssuerError, IssuerResult},
};

/// Upper bound on attributes in one name: fabric, node and three CATs.
pub const MAX_DN_ATTRIBUTES: usize = 5;

/// Longest text attribute rendered by `Display`
const MAX_DISPLAY_TEXT_LEN: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnAttributeType {
    MatterNodeId,
    MatterFirmwareSigningId,
    MatterIcacId,
    MatterRcacId,
    MatterFabricId,
    MatterCaseAuthTag,
    CommonName,
    OrganizationName,
}

impl DnAttributeType {
    const ALL: [DnAttributeType; 8] = [
        DnAttributeType::MatterNodeId,
        DnAttributeType::MatterFirmwareSigningId,
        DnAttributeType::MatterIcacId,
        DnAttributeType::MatterRcacId,
        DnAttributeType::MatterFabricId,
        DnAttributeType::MatterCaseAuthTag,
        DnAttributeType::CommonName,
        DnAttributeType::OrganizationName,
    ];

    pub const fn oid(self) -> ObjectIdentifier {
        match self {
            DnAttributeType::MatterNodeId => oid(OID_MATTER_NODE_ID),
            DnAttributeType::MatterFirmwareSigningId => oid(OID_MATTER_FIRMWARE_SIGNING_ID),
            DnAttributeType::MatterIcacId => oid(OID_MATTER_ICAC_ID),
            DnAttributeType::MatterRcacId => oid(OID_MATTER_RCAC_ID),
            DnAttributeType::MatterFabricId => oid(OID_MATTER_FABRIC_ID),
            DnAttributeType::MatterCaseAuthTag => oid(OID_MATTER_CASE_AUTH_TAG),
            DnAttributeType::CommonName => oid(OID_COMMON_NAME),
            DnAttributeType::OrganizationName => oid(OID_ORGANIZATION_NAME),
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.oid() == *oid)
    }

    pub const fn name(self) -> &'static str {
        match self {
            DnAttributeType::MatterNodeId => "MatterNodeId",
            DnAttributeType::MatterFirmwareSigningId => "MatterFirmwareSigningId",
            DnAttributeType::MatterIcacId => "MatterICACId",
            DnAttributeType::MatterRcacId => "MatterRCACId",
            DnAttributeType::MatterFabricId => "MatterFabricId",
            DnAttributeType::MatterCaseAuthTag => "MatterCASEAuthTag",
            DnAttributeType::CommonName => "CommonName",
            DnAttributeType::OrganizationName => "OrganizationName",
        }
    }

    pub const fn is_matter_64bit(self) -> bool {
        matches!(
            self,
            DnAttributeType::MatterNodeId
                | DnAttributeType::MatterFirmwareSigningId
                | DnAttributeType::MatterIcacId
                | DnAttributeType::MatterRcacId
                | DnAttributeType::MatterFabricId
        )
    }

    pub const fn is_matter_32bit(self) -> bool {
        matches!(self, DnAttributeType::MatterCaseAuthTag)
    }

    /// Attributes that identify the certificate holder itself
    const fn is_cert_identity(self) -> bool {
        matches!(
            self,
            DnAttributeType::MatterNodeId
                | DnAttributeType::MatterFirmwareSigningId
                | DnAttributeType::MatterIcacId
                | DnAttributeType::MatterRcacId
        )
    }
}

impl fmt::Display for DnAttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DnAttribute {
    MatterNodeId(u64),
    MatterFirmwareSigningId(u64),
    MatterIcacId(u64),
    MatterRcacId(u64),
    MatterFabricId(u64),
    MatterCaseAuthTag(u32),
    CommonName(String),
    OrganizationName(String),
}

impl DnAttribute {
    pub fn attribute_type(&self) -> DnAttributeType {
        match self {
            DnAttribute::MatterNodeId(_) => DnAttributeType::MatterNodeId,
            DnAttribute::MatterFirmwareSigningId(_) => DnAttributeType::MatterFirmwareSigningId,
            DnAttribute::MatterIcacId(_) => DnAttributeType::MatterIcacId,
            DnAttribute::MatterRcacId(_) => DnAttributeType::MatterRcacId,
            DnAttribute::MatterFabricId(_) => DnAttributeType::MatterFabricId,
            DnAttribute::MatterCaseAuthTag(_) => DnAttributeType::MatterCaseAuthTag,
            DnAttribute::CommonName(_) => DnAttributeType::CommonName,
            DnAttribute::OrganizationName(_) => DnAttributeType::OrganizationName,
        }
    }

    fn numeric_value(&self) -> Option<u64> {
        match *self {
            DnAttribute::MatterNodeId(v)
            | DnAttribute::MatterFirmwareSigningId(v)
            | DnAttribute::MatterIcacId(v)
            | DnAttribute::MatterRcacId(v)
            | DnAttribute::MatterFabricId(v) => Some(v),
            DnAttribute::MatterCaseAuthTag(v) => Some(v as u64),
            DnAttribute::CommonName(_) | DnAttribute::OrganizationName(_) => None,
        }
    }

    /// Value as carried in the certificate
    fn encoded_value(&self) -> String {
        match self {
            DnAttribute::MatterCaseAuthTag(v) => format!("{v:08X}"),
            DnAttribute::CommonName(s) | DnAttribute::OrganizationName(s) => s.clone(),
            other => format!("{:016X}", other.numeric_value().unwrap_or_default()),
        }
    }

    fn parse(attribute_type: DnAttributeType, value: &str) -> IssuerResult<Self> {
        let hex_field = |digits: usize| -> IssuerResult<u64> {
            if value.len() != digits || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(IssuerError::InvalidDistinguishedName(format!(
                    "{attribute_type} must be {digits} hex digits, got {value:?}"
                )));
            }
            u64::from_str_radix(value, 16)
                .map_err(|e| IssuerError::InvalidDistinguishedName(e.to_string()))
        };

        let attribute = match attribute_type {
            DnAttributeType::MatterNodeId => DnAttribute::MatterNodeId(hex_field(16)?),
            DnAttributeType::MatterFirmwareSigningId => {
                DnAttribute::MatterFirmwareSigningId(hex_field(16)?)
            }
            DnAttributeType::MatterIcacId => DnAttribute::MatterIcacId(hex_field(16)?),
            DnAttributeType::MatterRcacId => DnAttribute::MatterRcacId(hex_field(16)?),
            DnAttributeType::MatterFabricId => DnAttribute::MatterFabricId(hex_field(16)?),
            DnAttributeType::MatterCaseAuthTag => {
                DnAttribute::MatterCaseAuthTag(hex_field(8)? as u32)
            }
            DnAttributeType::CommonName => DnAttribute::CommonName(value.to_string()),
            DnAttributeType::OrganizationName => DnAttribute::OrganizationName(value.to_string()),
        };
        Ok(attribute)
    }
}

/// CASE Authenticated Tags for a NOC subject: at most three, each with a
/// non-zero version and a distinct identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatValues(heapless::Vec<u32, MAX_SUBJECT_CATS>);

impl CatValues {
    pub fn new(cats: &[u32]) -> IssuerResult<Self> {
        let mut values = Self::default();
        for &cat in cats {
            values.push(cat)?;
        }
        Ok(values)
    }

    fn push(&mut self, cat: u32) -> IssuerResult<()> {
        if cat & 0xFFFF == 0 {
            return Err(IssuerError::InvalidDistinguishedName(format!(
                "CASE Authenticated Tag {cat:08X} has version 0"
            )));
        }
        if self.0.iter().any(|existing| existing >> 16 == cat >> 16) {
            return Err(IssuerError::InvalidDistinguishedName(format!(
                "duplicate CASE Authenticated Tag identifier {:04X}",
                cat >> 16
            )));
        }
        self.0.push(cat).map_err(|_| {
            IssuerError::InvalidDistinguishedName(format!(
                "more than {MAX_SUBJECT_CATS} CASE Authenticated Tags"
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Subject or issuer identity of a certificate.
///
/// Attribute order is preserved for encoding and display; equality ignores it.
#[derive(Debug, Clone, Default)]
pub struct DistinguishedName {
    attributes: Vec<DnAttribute>,
}

impl DistinguishedName {
    pub fn new(attributes: impl IntoIterator<Item = DnAttribute>) -> IssuerResult<Self> {
        let mut dn = Self::default();
        for attribute in attributes {
            dn.add_attribute(attribute)?;
        }
        Ok(dn)
    }

    pub fn add_attribute(&mut self, attribute: DnAttribute) -> IssuerResult<()> {
        if self.attributes.len() >= MAX_DN_ATTRIBUTES {
            return Err(IssuerError::InvalidDistinguishedName(format!(
                "more than {MAX_DN_ATTRIBUTES} attributes"
            )));
        }
        match attribute {
            DnAttribute::MatterCaseAuthTag(cat) => {
                // Validate against the CATs already present
                let mut cats = self.cats();
                cats.push(cat)?;
            }
            ref other if other.attribute_type().is_matter_64bit() => {
                let attribute_type = other.attribute_type();
                if self.contains(attribute_type) {
                    return Err(IssuerError::InvalidDistinguishedName(format!(
                        "{attribute_type} appears more than once"
                    )));
                }
            }
            _ => {}
        }
        self.attributes.push(attribute);
        Ok(())
    }

    pub fn add_cats(&mut self, cats: &CatValues) -> IssuerResult<()> {
        for cat in cats.iter() {
            self.add_attribute(DnAttribute::MatterCaseAuthTag(cat))?;
        }
        Ok(())
    }

    pub fn attributes(&self) -> &[DnAttribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn contains(&self, attribute_type: DnAttributeType) -> bool {
        self.attributes
            .iter()
            .any(|a| a.attribute_type() == attribute_type)
    }

    /// Value of a 64-bit Matter attribute.
    pub fn get(&self, attribute_type: DnAttributeType) -> IssuerResult<u64> {
        if !attribute_type.is_matter_64bit() {
            return Err(IssuerError::AttributeNotFound(attribute_type));
        }
        self.attributes
            .iter()
            .find(|a| a.attribute_type() == attribute_type)
            .and_then(DnAttribute::numeric_value)
            .ok_or(IssuerError::AttributeNotFound(attribute_type))
    }

    pub fn cats(&self) -> CatValues {
        let mut cats = CatValues::default();
        for attribute in &self.attributes {
            if let DnAttribute::MatterCaseAuthTag(cat) = attribute {
                // Every CAT went through CatValues::push on insertion
                let _ = cats.0.push(*cat);
            }
        }
        cats
    }

    /// The identity attribute of the certificate holder: its node, firmware
    /// signing, ICAC or RCAC identifier. Exactly one must be present.
    pub fn cert_matter_id(&self) -> IssuerResult<(DnAttributeType, u64)> {
        let mut found = None;
        for attribute in &self.attributes {
            let attribute_type = attribute.attribute_type();
            if !attribute_type.is_cert_identity() {
                continue;
            }
            if found.is_some() {
                return Err(IssuerError::InvalidDistinguishedName(
                    "more than one certificate identity attribute".to_string(),
                ));
            }
            found = attribute.numeric_value().map(|v| (attribute_type, v));
        }
        found.ok_or_else(|| {
            IssuerError::InvalidDistinguishedName(
                "no certificate identity attribute".to_string(),
            )
        })
    }

    /// Encode as an X.509 name, one attribute per RDN.
    pub fn to_name(&self) -> IssuerResult<Name> {
        let mut rdns = Vec::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            let value = attribute.encoded_value();
            let atv = AttributeTypeAndValue {
                oid: attribute.attribute_type().oid(),
                value: AttributeValue::new(Tag::Utf8String, value.as_bytes())?,
            };
            rdns.push(RelativeDistinguishedName(vec![atv].try_into()?));
        }
        Ok(RdnSequence(rdns))
    }

    pub fn from_name(name: &Name) -> IssuerResult<Self> {
        let mut dn = Self::default();
        for rdn in name.0.iter() {
            for atv in rdn.0.iter() {
                let attribute_type = DnAttributeType::from_oid(&atv.oid).ok_or_else(|| {
                    IssuerError::InvalidDistinguishedName(format!(
                        "unsupported attribute {}",
                        atv.oid
                    ))
                })?;
                let tag = atv.value.tag();
                if tag != Tag::Utf8String && tag != Tag::PrintableString {
                    return Err(IssuerError::InvalidDistinguishedName(format!(
                        "{attribute_type} has unsupported string type {tag}"
                    )));
                }
                let value = core::str::from_utf8(atv.value.value()).map_err(|_| {
                    IssuerError::InvalidDistinguishedName(format!(
                        "{attribute_type} is not valid UTF-8"
                    ))
                })?;
                dn.add_attribute(DnAttribute::parse(attribute_type, value)?)?;
            }
        }
        Ok(dn)
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.attributes.len() == other.attributes.len()
            && self.attributes.iter().all(|a| other.attributes.contains(a))
            && other.attributes.iter().all(|a| self.attributes.contains(a))
    }
}

impl Eq for DistinguishedName {}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[[ ")?;
        for (i, attribute) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let mut value = attribute.encoded_value();
            if value.len() > MAX_DISPLAY_TEXT_LEN {
                let mut end = MAX_DISPLAY_TEXT_LEN;
                while !value.is_char_boundary(end) {
                    end -= 1;
                }
                value.truncate(end);
            }
            write!(f, "{} = {}", attribute.attribute_type(), value)?;
        }
        f.write_str(" ]]")
    }
}
