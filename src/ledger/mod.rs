//! The ballot contract, seen through one abstract operation per concern.
//!
//! Deployed contracts expose several call shapes for the same concern. The
//! [`capability`] module picks one consistent set of shapes, and
//! [`contract::ContractLedger`] dispatches on it, so nothing else in the
//! crate knows which shape the deployment uses.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    accumulator::Root,
    election::{Election, ElectionId, TxRef},
    identity::Nullifier,
    vote::Vote,
};

pub mod capability;
pub mod contract;

pub use capability::Capabilities;
pub use contract::ContractLedger;

pub type SharedLedger = Arc<dyn Ledger>;

#[rocket::async_trait]
pub trait Ledger: Send + Sync {
    /// The active election id, or `None` if no election is running.
    async fn current_election(&self) -> Result<Option<ElectionId>>;

    /// The persisted root for the election, or `None` if unset (zero).
    async fn root_of(&self, election: ElectionId) -> Result<Option<Root>>;

    /// Replace the persisted root. Administrative; never called on the vote path.
    async fn publish_root(&self, election: ElectionId, root: Root) -> Result<TxRef>;

    /// Whether the nullifier is already recorded, or `None` if the contract
    /// cannot answer. Advisory only: the answer may be stale by the time a
    /// vote is submitted.
    async fn nullifier_used(
        &self,
        election: ElectionId,
        nullifier: &Nullifier,
    ) -> Result<Option<bool>>;

    /// Submit the vote and wait for confirmation. The ledger atomically
    /// checks and records the nullifier; a repeat surfaces as `DuplicateVote`.
    async fn submit_vote(&self, vote: &Vote) -> Result<TxRef>;
}

/// Look up the active election together with its persisted root.
pub async fn active_election(ledger: &dyn Ledger) -> Result<Election> {
    match ledger.current_election().await? {
        Some(id) => Ok(Election {
            id,
            active: true,
            persisted_root: ledger.root_of(id).await?,
        }),
        None => Ok(Election {
            id: ElectionId(0),
            active: false,
            persisted_root: None,
        }),
    }
}
