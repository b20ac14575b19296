use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::{
    accumulator::InclusionProof,
    election::{CandidateId, ElectionId, TxRef},
    identity::{Leaf, Nullifier},
};

/// What the ledger receives. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub election: ElectionId,
    pub nullifier: Nullifier,
    pub candidate: CandidateId,
    pub proof: InclusionProof,
    pub leaf: Leaf,
}

/// Progress of a single vote request. Stages only move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum VoteStage {
    Received,
    Verified,
    ProofBuilt,
    RootReconciled,
    DuplicateChecked,
    Submitted,
    Confirmed,
    Rejected,
}

impl VoteStage {
    /// Whether the ledger may already hold this vote. Failures from here on
    /// must not be retried without a fresh duplicate check.
    pub fn reached_ledger(self) -> bool {
        self >= VoteStage::Submitted
    }
}

impl Display for VoteStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Proof that a vote was confirmed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub election: ElectionId,
    pub tx_ref: TxRef,
}
