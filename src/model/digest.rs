use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use ethers::utils::keccak256;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Width of every hash this system handles.
pub const DIGEST_LEN: usize = 32;

/// A fixed-width Keccak-256 output.
///
/// Leaves, roots and nullifiers are all digests; they are rendered as
/// `0x`-prefixed lower-case hex on the wire.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub const ZERO: Digest = Digest([0; DIGEST_LEN]);

    /// Hash the concatenation of the given byte strings.
    pub fn hash(parts: &[&[u8]]) -> Self {
        let input = parts.concat();
        Self(keccak256(input))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    /// A short prefix, safe for logs.
    pub fn short(&self) -> String {
        format!("0x{}…", &self.to_hex()[..8])
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            Error::InputValidation(format!(
                "expected a {DIGEST_LEN}-byte digest, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl From<ethers::types::H256> for Digest {
    fn from(hash: ethers::types::H256) -> Self {
        Self(hash.0)
    }
}

impl From<Digest> for ethers::types::H256 {
    fn from(digest: Digest) -> Self {
        Self(digest.0)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        Self::try_from(bytes.as_slice())
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Decode hex in either case, with or without a `0x` prefix.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, Error> {
    let trimmed = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    HEXLOWER_PERMISSIVE
        .decode(trimmed.as_bytes())
        .map_err(|e| Error::InputValidation(format!("invalid hex {s:?}: {e}")))
}
