//! In-memory collaborators and the HTTP test harness behind `#[backend_test]`.
//!
//! Each double is a cheap handle onto shared state, so a test can keep one
//! copy to arrange and inspect while the Rocket instance holds another.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::LevelFilter;
use rocket::local::asynchronous::Client;

use crate::audit::{AuditLog, ParticipationRecord};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{
    accumulator::Root,
    election::{ElectionId, TxRef},
    identity::{BiometricEvidence, IdentityKey, IdentityRecord, Leaf, Nullifier, Salt},
    vote::Vote,
};
use crate::reconciler::RootReconciler;
use crate::registry::{Registry, Verification};

/// The admin key every test instance is configured with.
pub const ADMIN_KEY: &str = "test-admin-key";

#[derive(Default)]
struct RegistryState {
    leaves: Mutex<Vec<Leaf>>,
    /// identity key -> (salt, expected evidence)
    enrolled: Mutex<HashMap<String, (Salt, String)>>,
    unavailable: AtomicBool,
    leaf_fetches: AtomicUsize,
    verify_calls: AtomicUsize,
}

/// A registry whose eligibility set and enrolments are set by the test.
#[derive(Clone, Default)]
pub struct MemoryRegistry(Arc<RegistryState>);

impl MemoryRegistry {
    pub fn with_leaves(leaves: Vec<Leaf>) -> Self {
        let registry = Self::default();
        *registry.0.leaves.lock().unwrap() = leaves;
        registry
    }

    pub fn add_leaf(&self, leaf: Leaf) {
        self.0.leaves.lock().unwrap().push(leaf);
    }

    /// Make `identity` verifiable with `evidence`. Does not touch the eligibility set.
    pub fn enroll(&self, identity: &IdentityRecord, evidence: &str) {
        self.0.enrolled.lock().unwrap().insert(
            identity.key.as_str().to_string(),
            (identity.salt.clone(), evidence.to_string()),
        );
    }

    pub fn set_available(&self, available: bool) {
        self.0.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn leaf_fetches(&self) -> usize {
        self.0.leaf_fetches.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.0.verify_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.0.unavailable.load(Ordering::SeqCst) {
            Err(Error::RegistryUnavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[rocket::async_trait]
impl Registry for MemoryRegistry {
    async fn leaves(&self) -> Result<Vec<Leaf>> {
        self.check_available()?;
        self.0.leaf_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.leaves.lock().unwrap().clone())
    }

    async fn verify(
        &self,
        key: &IdentityKey,
        evidence: &BiometricEvidence,
    ) -> Result<Verification> {
        self.check_available()?;
        self.0.verify_calls.fetch_add(1, Ordering::SeqCst);
        let enrolled = self.0.enrolled.lock().unwrap();
        Ok(match enrolled.get(key.as_str()) {
            Some((salt, expected)) if expected == evidence.as_str() => {
                Verification::Matched(salt.clone())
            }
            _ => Verification::Rejected,
        })
    }
}

#[derive(Default)]
struct LedgerState {
    election: Mutex<Option<ElectionId>>,
    roots: Mutex<HashMap<ElectionId, Root>>,
    /// Recorded nullifiers and the votes they belong to, updated together.
    recorded: Mutex<(HashSet<(ElectionId, Nullifier)>, Vec<Vote>)>,
    no_nullifier_lookup: AtomicBool,
    calls: AtomicUsize,
    root_reads: AtomicUsize,
    publications: AtomicUsize,
    nullifier_checks: AtomicUsize,
    submissions: AtomicUsize,
    transactions: AtomicUsize,
}

/// A ledger that checks and records nullifiers atomically, like the contract does.
#[derive(Clone, Default)]
pub struct MemoryLedger(Arc<LedgerState>);

impl MemoryLedger {
    pub fn with_election(id: u64) -> Self {
        let ledger = Self::default();
        ledger.set_election(Some(id));
        ledger
    }

    pub fn set_election(&self, id: Option<u64>) {
        *self.0.election.lock().unwrap() = id.map(ElectionId);
    }

    pub fn root(&self, election: ElectionId) -> Option<Root> {
        self.0.roots.lock().unwrap().get(&election).copied()
    }

    /// Whether the contract exposes a nullifier lookup. On by default.
    pub fn set_nullifier_lookup(&self, supported: bool) {
        self.0.no_nullifier_lookup.store(!supported, Ordering::SeqCst);
    }

    pub fn votes(&self) -> Vec<Vote> {
        self.0.recorded.lock().unwrap().1.clone()
    }

    /// Every call made, of any kind.
    pub fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }

    pub fn root_reads(&self) -> usize {
        self.0.root_reads.load(Ordering::SeqCst)
    }

    pub fn publications(&self) -> usize {
        self.0.publications.load(Ordering::SeqCst)
    }

    pub fn nullifier_checks(&self) -> usize {
        self.0.nullifier_checks.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.0.submissions.load(Ordering::SeqCst)
    }

    fn call(&self) {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn next_tx(&self) -> TxRef {
        let n = self.0.transactions.fetch_add(1, Ordering::SeqCst) + 1;
        TxRef(format!("0x{n:064x}"))
    }
}

#[rocket::async_trait]
impl Ledger for MemoryLedger {
    async fn current_election(&self) -> Result<Option<ElectionId>> {
        self.call();
        Ok(*self.0.election.lock().unwrap())
    }

    async fn root_of(&self, election: ElectionId) -> Result<Option<Root>> {
        self.call();
        self.0.root_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.root(election))
    }

    async fn publish_root(&self, election: ElectionId, root: Root) -> Result<TxRef> {
        self.call();
        self.0.publications.fetch_add(1, Ordering::SeqCst);
        self.0.roots.lock().unwrap().insert(election, root);
        Ok(self.next_tx())
    }

    async fn nullifier_used(
        &self,
        election: ElectionId,
        nullifier: &Nullifier,
    ) -> Result<Option<bool>> {
        self.call();
        if self.0.no_nullifier_lookup.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.0.nullifier_checks.fetch_add(1, Ordering::SeqCst);
        let recorded = self.0.recorded.lock().unwrap();
        Ok(Some(recorded.0.contains(&(election, *nullifier))))
    }

    async fn submit_vote(&self, vote: &Vote) -> Result<TxRef> {
        self.call();
        self.0.submissions.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent submissions genuinely overlap.
        rocket::tokio::task::yield_now().await;

        if self.root(vote.election).map_or(true, |root| !vote.proof.verify(&vote.leaf, &root)) {
            return Err(Error::Chain("execution reverted: invalid proof".to_string()));
        }
        let mut recorded = self.0.recorded.lock().unwrap();
        if !recorded.0.insert((vote.election, vote.nullifier)) {
            return Err(Error::DuplicateVote(vote.election));
        }
        recorded.1.push(vote.clone());
        Ok(self.next_tx())
    }
}

#[derive(Default)]
struct AuditState {
    records: Mutex<Vec<ParticipationRecord>>,
    failing: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryAudit(Arc<AuditState>);

impl MemoryAudit {
    pub fn records(&self) -> Vec<ParticipationRecord> {
        self.0.records.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.failing.store(failing, Ordering::SeqCst);
    }
}

#[rocket::async_trait]
impl AuditLog for MemoryAudit {
    async fn record(&self, entry: &ParticipationRecord) -> io::Result<()> {
        if self.0.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.0.records.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// A running test instance and handles onto its collaborators.
pub struct Harness {
    pub client: Client,
    pub registry: MemoryRegistry,
    pub ledger: MemoryLedger,
    pub audit: MemoryAudit,
}

/// A test voter, enrolled in the harness registry with evidence `"fingerprint"`.
pub fn voter() -> IdentityRecord {
    IdentityRecord::new(
        IdentityKey::new("D1").unwrap(),
        Salt::from_hex("0x5a17").unwrap(),
    )
}

/// Another eligible leaf, so the tree has more than one node.
pub fn other_leaf() -> Leaf {
    crate::model::identity::derive_leaf(
        &IdentityKey::new("D2").unwrap(),
        &Salt::from_hex("0x0d02").unwrap(),
    )
}

/// A Rocket instance over fresh in-memory collaborators.
///
/// Election 1 is active and the registry holds [`voter`] and [`other_leaf`].
/// When `synced`, their root has already been published for election 1.
pub async fn harness(synced: bool) -> Harness {
    log4rs_test_utils::test_logging::init_logging_once_for(
        ["ballot_relayer"],
        LevelFilter::Debug,
        None,
    );

    let voter = voter();
    let registry = MemoryRegistry::with_leaves(vec![voter.leaf(), other_leaf()]);
    registry.enroll(&voter, "fingerprint");
    let ledger = MemoryLedger::with_election(1);
    let audit = MemoryAudit::default();

    let config = Config::new(ADMIN_KEY, 0);
    if synced {
        let policy = config.accumulator_policy();
        RootReconciler::new(&registry, &ledger, &policy)
            .sync(ElectionId(1))
            .await
            .unwrap();
    }

    let rocket = crate::rocket_for(
        rocket::Config::debug_default(),
        config,
        Arc::new(registry.clone()),
        Arc::new(ledger.clone()),
        Arc::new(audit.clone()),
    );
    let client = Client::tracked(rocket).await.unwrap();

    Harness {
        client,
        registry,
        ledger,
        audit,
    }
}
