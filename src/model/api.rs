//! API-compatible request and response types.
//!
//! Field names are camelCase and digests are `0x`-prefixed hex.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{
    accumulator::{InclusionProof, Root},
    election::{CandidateId, ElectionId, TxRef},
    identity::{BiometricEvidence, IdentityKey, Leaf},
};

/// The credentials a voter presents with a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub identity_key: String,
    pub biometric_evidence: String,
}

impl VoteRequest {
    /// Check the request is well formed before anything leaves the relayer.
    pub fn validate(self) -> Result<(IdentityKey, BiometricEvidence)> {
        let key = IdentityKey::new(self.identity_key)?;
        let evidence = BiometricEvidence::new(self.biometric_evidence)?;
        Ok((key, evidence))
    }
}

/// A vote request naming the candidate in the body rather than the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateVoteRequest {
    pub candidate_id: CandidateId,
    #[serde(flatten)]
    pub credentials: VoteRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub tx_ref: TxRef,
    pub election_id: ElectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleRootResponse {
    pub root: Root,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProofResponse {
    pub leaf: Leaf,
    pub root: Root,
    pub proof: InclusionProof,
}

/// Result of an administrative root sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRootResponse {
    pub election_id: ElectionId,
    pub root: Root,
    /// `None` when the ledger already held this root and nothing was sent.
    pub tx_ref: Option<TxRef>,
    pub unchanged: bool,
}

/// A read-only comparison of the local and persisted roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootStatusResponse {
    pub election_id: ElectionId,
    pub active: bool,
    pub persisted_root: Option<Root>,
    pub local_root: Root,
    pub count: usize,
    pub in_sync: bool,
}
