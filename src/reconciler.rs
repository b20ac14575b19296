//! Keeps the locally computed eligibility root honest against the ledger.
//!
//! The ledger's persisted root is the only root a vote is ever checked
//! against. Votes are refused while the local tree disagrees with it, and
//! only the administrative sync may move it.

use std::sync::Arc;

use crate::eligibility::AccumulatorPolicy;
use crate::error::{Inconsistency, Result};
use crate::ledger::{self, Ledger};
use crate::model::{
    accumulator::{Accumulator, Root},
    api::RootStatusResponse,
    election::{Election, ElectionId, TxRef},
};
use crate::registry::Registry;

/// Outcome of publishing a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// The ledger already held this root; nothing was sent.
    Unchanged,
    Published(TxRef),
}

pub struct RootReconciler<'a> {
    registry: &'a dyn Registry,
    ledger: &'a dyn Ledger,
    policy: &'a AccumulatorPolicy,
}

impl<'a> RootReconciler<'a> {
    pub fn new(
        registry: &'a dyn Registry,
        ledger: &'a dyn Ledger,
        policy: &'a AccumulatorPolicy,
    ) -> Self {
        Self {
            registry,
            ledger,
            policy,
        }
    }

    /// The accumulator over the current eligibility set.
    pub async fn accumulator(&self) -> Result<Arc<Accumulator>> {
        self.policy.current(self.registry).await
    }

    pub async fn compute_root(&self) -> Result<Root> {
        Ok(self.accumulator().await?.root())
    }

    /// Check the current local root against the election's persisted root.
    pub async fn reconcile(&self, election: ElectionId) -> Result<Root> {
        let local = self.compute_root().await?;
        compare(election, local, self.ledger.root_of(election).await?)?;
        Ok(local)
    }

    /// Check an already computed root against the root the election was read with.
    pub fn reconcile_root(&self, election: &Election, local: Root) -> Result<()> {
        compare(election.id, local, election.persisted_root)
    }

    /// Make `root` the persisted root of the election. A no-op when it already is.
    pub async fn publish(&self, election: ElectionId, root: Root) -> Result<Publication> {
        if self.ledger.root_of(election).await? == Some(root) {
            info!("Election {election} already has root {}", root.short());
            return Ok(Publication::Unchanged);
        }
        let tx_ref = self.ledger.publish_root(election, root).await?;
        info!(
            "Published root {} for election {election} in {tx_ref}",
            root.short()
        );
        Ok(Publication::Published(tx_ref))
    }

    /// Recompute the root from a fresh registry read and publish it.
    pub async fn sync(&self, election: ElectionId) -> Result<(Root, Publication)> {
        self.policy.invalidate().await;
        let root = self.compute_root().await?;
        let publication = self.publish(election, root).await?;
        Ok((root, publication))
    }

    /// A read-only reconciliation of the active election, for operators.
    pub async fn status(&self) -> Result<RootStatusResponse> {
        let accumulator = self.accumulator().await?;
        let election = ledger::active_election(self.ledger).await?;
        let local_root = accumulator.root();
        Ok(RootStatusResponse {
            election_id: election.id,
            active: election.active,
            persisted_root: election.persisted_root,
            local_root,
            count: accumulator.len(),
            in_sync: election.persisted_root == Some(local_root),
        })
    }
}

fn compare(election: ElectionId, local: Root, persisted: Option<Root>) -> Result<()> {
    match persisted {
        None => Err(Inconsistency::RootNotSet(election).into()),
        Some(persisted) if persisted != local => Err(Inconsistency::RootMismatch {
            election,
            local,
            persisted,
        }
        .into()),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::model::digest::Digest;
    use crate::testing::{MemoryLedger, MemoryRegistry};

    use super::*;

    fn leaves() -> Vec<Digest> {
        vec![Digest([1; 32]), Digest([2; 32])]
    }

    #[test]
    fn comparison() {
        let election = ElectionId(1);
        let a = Digest([1; 32]);
        let b = Digest([2; 32]);
        assert!(compare(election, a, Some(a)).is_ok());
        assert!(matches!(
            compare(election, a, None),
            Err(Error::StateInconsistency(Inconsistency::RootNotSet(_)))
        ));
        assert!(matches!(
            compare(election, a, Some(b)),
            Err(Error::StateInconsistency(Inconsistency::RootMismatch { local, persisted, .. }))
                if local == a && persisted == b
        ));
    }

    #[rocket::async_test]
    async fn publish_is_idempotent() {
        let registry = MemoryRegistry::with_leaves(leaves());
        let ledger = MemoryLedger::with_election(1);
        let policy = AccumulatorPolicy::Rebuild;
        let reconciler = RootReconciler::new(&registry, &ledger, &policy);
        let election = ElectionId(1);

        assert!(matches!(
            reconciler.reconcile(election).await,
            Err(Error::StateInconsistency(Inconsistency::RootNotSet(_)))
        ));

        let (root, first) = reconciler.sync(election).await.unwrap();
        assert!(matches!(first, Publication::Published(_)));
        assert_eq!(reconciler.reconcile(election).await.unwrap(), root);

        let (_, second) = reconciler.sync(election).await.unwrap();
        assert_eq!(second, Publication::Unchanged);
        assert_eq!(ledger.publications(), 1);
    }

    #[rocket::async_test]
    async fn registry_change_is_a_mismatch_until_synced() {
        let registry = MemoryRegistry::with_leaves(leaves());
        let ledger = MemoryLedger::with_election(1);
        let policy = AccumulatorPolicy::Rebuild;
        let reconciler = RootReconciler::new(&registry, &ledger, &policy);
        let election = ElectionId(1);
        reconciler.sync(election).await.unwrap();

        registry.add_leaf(Digest([3; 32]));
        assert!(matches!(
            reconciler.reconcile(election).await,
            Err(Error::StateInconsistency(Inconsistency::RootMismatch { .. }))
        ));
        let status = reconciler.status().await.unwrap();
        assert!(!status.in_sync);
        assert_eq!(status.count, 3);

        reconciler.sync(election).await.unwrap();
        assert!(reconciler.reconcile(election).await.is_ok());
        assert!(reconciler.status().await.unwrap().in_sync);
    }

    #[rocket::async_test]
    async fn sync_sees_past_the_cache() {
        let registry = MemoryRegistry::with_leaves(leaves());
        let ledger = MemoryLedger::with_election(1);
        let policy = AccumulatorPolicy::with_ttl(std::time::Duration::from_secs(3600));
        let reconciler = RootReconciler::new(&registry, &ledger, &policy);
        let election = ElectionId(1);

        let (before, _) = reconciler.sync(election).await.unwrap();
        registry.add_leaf(Digest([3; 32]));
        // Still served from the cache, so still in sync.
        assert_eq!(reconciler.reconcile(election).await.unwrap(), before);

        let (after, publication) = reconciler.sync(election).await.unwrap();
        assert_ne!(before, after);
        assert!(matches!(publication, Publication::Published(_)));
    }
}
