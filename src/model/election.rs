use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Inconsistency, Result};

use super::digest::Digest;

/// A ledger-assigned election number. Zero means "no election".
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElectionId(pub u64);

impl ElectionId {
    /// The 32-byte big-endian uint256 encoding.
    pub fn to_be32(self) -> [u8; 32] {
        let mut out = [0; 32];
        out[24..].copy_from_slice(&self.0.to_be_bytes());
        out
    }
}

impl Display for ElectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An election as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub id: ElectionId,
    pub active: bool,
    /// The only root submissions are checked against. `None` until first published.
    pub persisted_root: Option<Digest>,
}

impl Election {
    /// The election id, if this election can currently take votes.
    pub fn require_active(&self) -> Result<ElectionId> {
        if self.active {
            Ok(self.id)
        } else {
            Err(Inconsistency::NoActiveElection.into())
        }
    }
}

/// A candidate number as understood by the ballot contract.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl FromStr for CandidateId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(CandidateId)
            .map_err(|_| Error::InputValidation(format!("invalid candidate id {s:?}")))
    }
}

impl Display for CandidateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a ledger transaction, e.g. its hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl Display for TxRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_id_is_uint256_encoded() {
        let encoded = ElectionId(0x0102).to_be32();
        assert_eq!(encoded[..30], [0; 30]);
        assert_eq!(encoded[30..], [1, 2]);
    }

    #[test]
    fn candidate_ids_parse() {
        assert_eq!("2".parse::<CandidateId>().unwrap(), CandidateId(2));
        assert!(matches!(
            "two".parse::<CandidateId>(),
            Err(Error::InputValidation(_))
        ));
        assert!(matches!(
            "-1".parse::<CandidateId>(),
            Err(Error::InputValidation(_))
        ));
    }

    #[test]
    fn inactive_elections_take_no_votes() {
        let election = Election {
            id: ElectionId(0),
            active: false,
            persisted_root: None,
        };
        assert!(matches!(
            election.require_active(),
            Err(Error::StateInconsistency(Inconsistency::NoActiveElection))
        ));
    }
}
