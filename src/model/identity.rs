use std::fmt::{Debug, Formatter};

use data_encoding::HEXLOWER;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

use super::{digest::Digest, election::ElectionId};

/// A voter's public membership commitment: `H(salt || H(identityKey))`.
pub type Leaf = Digest;

/// An opaque identity key, e.g. a national identifier.
///
/// Never persisted by the relayer except in the audit trail, and never logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Wrap an identity key, rejecting empty ones.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::invalid_identity());
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `H(identityKey)`, over the exact UTF-8 bytes.
    pub fn digest(&self) -> Digest {
        Digest::hash(&[self.0.as_bytes()])
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = Error;

    fn try_from(key: String) -> Result<Self> {
        Self::new(key)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

impl Debug for IdentityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityKey(<redacted>)")
    }
}

/// Per-voter secret salt, issued by the registry after a successful match.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InputValidation("salt must not be empty".to_string()));
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::new(super::digest::decode_hex(hex)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Salt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt(<{} bytes>)", self.0.len())
    }
}

impl Serialize for Salt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", HEXLOWER.encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for Salt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Biometric evidence, forwarded verbatim to the registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BiometricEvidence(String);

impl BiometricEvidence {
    pub fn new(evidence: impl Into<String>) -> Result<Self> {
        let evidence = evidence.into();
        if evidence.is_empty() {
            return Err(Error::InputValidation(
                "biometric evidence must not be empty".to_string(),
            ));
        }
        Ok(Self(evidence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for BiometricEvidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("BiometricEvidence(<redacted>)")
    }
}

/// A verified identity: the key plus the salt the registry issued for it.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub key: IdentityKey,
    pub salt: Salt,
}

impl IdentityRecord {
    pub fn new(key: IdentityKey, salt: Salt) -> Self {
        Self { key, salt }
    }

    /// Derive this voter's leaf.
    pub fn leaf(&self) -> Leaf {
        derive_leaf(&self.key, &self.salt)
    }

    /// Derive this voter's nullifier for the given election.
    pub fn nullifier(&self, election: ElectionId) -> Nullifier {
        Nullifier::from_leaf(election, &self.leaf())
    }
}

/// `Leaf = H(salt || H(identityKey))`.
pub fn derive_leaf(key: &IdentityKey, salt: &Salt) -> Leaf {
    Digest::hash(&[salt.as_bytes(), key.digest().as_bytes()])
}

/// A one-time, per-election vote token: `H(be32(electionId) || Leaf)`.
///
/// The ledger records these to refuse repeat votes without learning who voted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nullifier(pub Digest);

impl Nullifier {
    pub fn derive(election: ElectionId, key: &IdentityKey, salt: &Salt) -> Self {
        Self::from_leaf(election, &derive_leaf(key, salt))
    }

    pub fn from_leaf(election: ElectionId, leaf: &Leaf) -> Self {
        Self(Digest::hash(&[&election.to_be32(), leaf.as_bytes()]))
    }

    pub fn digest(&self) -> &Digest {
        &self.0
    }
}
