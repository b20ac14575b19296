//! Sequences one vote from credentials to a confirmed ledger transaction.
//!
//! Each request walks
//! `Received -> Verified -> ProofBuilt -> RootReconciled -> DuplicateChecked -> Submitted -> Confirmed`
//! strictly in order, stopping at the first failure. Nothing is retried:
//! failures before submission leave no trace on the ledger, and failures
//! after it leave the vote's fate unknown until the caller checks again.

use crate::audit::{AuditLog, ParticipationRecord};
use crate::eligibility::AccumulatorPolicy;
use crate::error::{Error, Result};
use crate::ledger::{self, Ledger};
use crate::model::{
    election::CandidateId,
    identity::{BiometricEvidence, IdentityKey, IdentityRecord},
    vote::{Vote, VoteReceipt, VoteStage},
};
use crate::reconciler::RootReconciler;
use crate::registry::{Registry, Verification};

pub struct VoteOrchestrator<'a> {
    registry: &'a dyn Registry,
    ledger: &'a dyn Ledger,
    policy: &'a AccumulatorPolicy,
    audit: &'a dyn AuditLog,
}

/// Where a single request has got to. Only used for logging.
struct Progress {
    stage: VoteStage,
    /// A log-safe tag for the voter, known once the leaf is.
    tag: String,
}

impl Progress {
    fn new() -> Self {
        debug!("vote: {}", VoteStage::Received);
        Self {
            stage: VoteStage::Received,
            tag: String::new(),
        }
    }

    fn advance(&mut self, next: VoteStage) {
        debug!("vote{}: {} -> {next}", self.tag, self.stage);
        self.stage = next;
    }

    fn reject(&self, err: &Error) {
        if self.stage.reached_ledger() {
            warn!(
                "vote{}: rejected after submission, on-chain outcome unknown: {err}",
                self.tag
            );
        } else {
            info!(
                "vote{}: rejected at {}: {}",
                self.tag,
                self.stage,
                err.reason()
            );
        }
        debug!("vote{}: {} -> {}", self.tag, self.stage, VoteStage::Rejected);
    }
}

impl<'a> VoteOrchestrator<'a> {
    pub fn new(
        registry: &'a dyn Registry,
        ledger: &'a dyn Ledger,
        policy: &'a AccumulatorPolicy,
        audit: &'a dyn AuditLog,
    ) -> Self {
        Self {
            registry,
            ledger,
            policy,
            audit,
        }
    }

    /// Cast a vote for `candidate` on behalf of the verified voter.
    pub async fn cast(
        &self,
        key: IdentityKey,
        evidence: BiometricEvidence,
        candidate: CandidateId,
    ) -> Result<VoteReceipt> {
        let mut progress = Progress::new();
        match self.run(&mut progress, key, evidence, candidate).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                progress.reject(&err);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        progress: &mut Progress,
        key: IdentityKey,
        evidence: BiometricEvidence,
        candidate: CandidateId,
    ) -> Result<VoteReceipt> {
        // Nothing is derived, and the ledger is not touched, until the registry vouches for the voter.
        let salt = match self.registry.verify(&key, &evidence).await? {
            Verification::Matched(salt) => salt,
            Verification::Rejected => {
                return Err(Error::AuthenticationFailure(
                    "biometric evidence did not match".to_string(),
                ));
            }
        };
        let identity = IdentityRecord::new(key, salt);
        let leaf = identity.leaf();
        progress.tag = format!("[{}]", leaf.short());
        progress.advance(VoteStage::Verified);

        let reconciler = RootReconciler::new(self.registry, self.ledger, self.policy);
        let accumulator = reconciler.accumulator().await?;
        let proof = accumulator.proof(&leaf).ok_or_else(|| {
            Error::NotEligible("voter is not in the current eligibility set".to_string())
        })?;
        progress.advance(VoteStage::ProofBuilt);

        // One ledger read yields both the election and the root it is checked against.
        let active = ledger::active_election(self.ledger).await?;
        let election = active.require_active()?;
        reconciler.reconcile_root(&active, accumulator.root())?;
        progress.advance(VoteStage::RootReconciled);

        let nullifier = identity.nullifier(election);
        // Advisory only. A concurrent request for the same voter can pass this
        // check too; the ledger's own check-and-record at submission is what
        // actually refuses the second vote.
        if self.ledger.nullifier_used(election, &nullifier).await? == Some(true) {
            return Err(Error::DuplicateVote(election));
        }
        progress.advance(VoteStage::DuplicateChecked);

        let vote = Vote {
            election,
            nullifier,
            candidate,
            proof,
            leaf,
        };
        progress.advance(VoteStage::Submitted);
        let tx_ref = self.ledger.submit_vote(&vote).await?;
        progress.advance(VoteStage::Confirmed);
        info!("vote{}: confirmed in {tx_ref}", progress.tag);

        let entry = ParticipationRecord::now(identity.key, tx_ref.clone());
        if let Err(e) = self.audit.record(&entry).await {
            warn!("Failed to record participation for {tx_ref}: {e}");
        }

        Ok(VoteReceipt { election, tx_ref })
    }
}
