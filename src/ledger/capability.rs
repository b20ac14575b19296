//! Detection of which known call shapes a deployed ballot contract exposes.
//!
//! A contract's call surface is the set of 4-byte selectors it dispatches on.
//! It is read from the contract's ABI when one is configured, or else scanned
//! out of the deployed bytecode. Each concern then takes the first supported
//! variant in preference order.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use ethers::abi::Abi;
use ethers::utils::keccak256;
use rocket::serde::json::serde_json::{self, Value};

use crate::error::{Error, Result};

pub type Selector = [u8; 4];

/// The first four bytes of the Keccak-256 of a canonical signature.
pub fn selector(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

const PUSH1: u8 = 0x60;
const PUSH4: u8 = 0x63;
const PUSH32: u8 = 0x7f;

/// The selectors a contract answers to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSurface {
    selectors: HashSet<Selector>,
}

impl CallSurface {
    pub fn from_signatures<'a>(signatures: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            selectors: signatures.into_iter().map(selector).collect(),
        }
    }

    pub fn from_abi(abi: &Abi) -> Self {
        Self {
            selectors: abi.functions().map(|f| f.short_signature()).collect(),
        }
    }

    /// Parse either a bare ABI array or a build artifact with an `abi` field.
    pub fn from_abi_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("contract ABI is not JSON: {e}")))?;
        let abi_value = match value {
            Value::Object(mut artifact) => artifact
                .remove("abi")
                .ok_or_else(|| Error::Configuration("artifact has no `abi` field".to_string()))?,
            other => other,
        };
        let abi: Abi = serde_json::from_value(abi_value)
            .map_err(|e| Error::Configuration(format!("invalid contract ABI: {e}")))?;
        Ok(Self::from_abi(&abi))
    }

    /// Collect every `PUSH4` immediate in runtime bytecode.
    ///
    /// Solidity and Vyper dispatchers compare the call's selector against
    /// `PUSH4` constants, so this over-approximates the surface but never
    /// misses a dispatched function. Other push immediates are skipped so
    /// their data is not misread as opcodes.
    pub fn from_bytecode(code: &[u8]) -> Self {
        let mut selectors = HashSet::new();
        let mut pc = 0;
        while pc < code.len() {
            let op = code[pc];
            if (PUSH1..=PUSH32).contains(&op) {
                let width = usize::from(op - PUSH1) + 1;
                if op == PUSH4 && pc + 4 < code.len() {
                    selectors.insert([code[pc + 1], code[pc + 2], code[pc + 3], code[pc + 4]]);
                }
                pc += width;
            }
            pc += 1;
        }
        Self { selectors }
    }

    pub fn supports(&self, selector: &Selector) -> bool {
        self.selectors.contains(selector)
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// The first variant, in preference order, that this surface supports.
    fn first<V: Variant>(&self, allowed: impl Fn(V) -> bool) -> Option<V> {
        V::ALL
            .iter()
            .copied()
            .find(|v| allowed(*v) && self.supports(&v.selector()))
    }
}

/// A known call shape for one concern.
pub trait Variant: Copy + Display + 'static {
    /// Human name of the concern, for errors.
    const CONCERN: &'static str;
    /// Every known variant, most preferred first.
    const ALL: &'static [Self];

    /// Canonical signature, e.g. `rootOf(uint256)`.
    fn signature(self) -> &'static str;

    /// Human-readable ABI declaration, including outputs.
    fn declaration(self) -> &'static str;

    fn selector(self) -> Selector {
        selector(self.signature())
    }
}

macro_rules! variants {
    (
        $(#[$meta:meta])*
        $name:ident, $concern:literal {
            $( $variant:ident => $signature:literal, $declaration:literal; )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum $name {
            $( $variant, )+
        }

        impl Variant for $name {
            const CONCERN: &'static str = $concern;
            const ALL: &'static [Self] = &[$( Self::$variant, )+];

            fn signature(self) -> &'static str {
                match self {
                    $( Self::$variant => $signature, )+
                }
            }

            fn declaration(self) -> &'static str {
                match self {
                    $( Self::$variant => $declaration, )+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.signature())
            }
        }
    };
}

variants! {
    /// Zero-argument lookup of the active election id.
    ElectionLookup, "current-election lookup" {
        CurrentElectionId => "currentElectionId()",
            "function currentElectionId() view returns (uint256)";
        ActiveElectionId => "activeElectionId()",
            "function activeElectionId() view returns (uint256)";
        GetCurrentElection => "getCurrentElection()",
            "function getCurrentElection() view returns (uint256)";
    }
}

variants! {
    /// Lookup of the persisted eligibility root.
    RootLookup, "root lookup" {
        RootOf => "rootOf(uint256)",
            "function rootOf(uint256 electionId) view returns (bytes32)";
        ElectionRoots => "electionRoots(uint256)",
            "function electionRoots(uint256 electionId) view returns (bytes32)";
        MerkleRoot => "merkleRoot()",
            "function merkleRoot() view returns (bytes32)";
    }
}

variants! {
    /// Replacement of the persisted eligibility root.
    RootPublication, "root publication" {
        PublishRoot => "publishRoot(bytes32)",
            "function publishRoot(bytes32 root)";
        SetElectionRoot => "setElectionRoot(uint256,bytes32)",
            "function setElectionRoot(uint256 electionId, bytes32 root)";
        SetMerkleRoot => "setMerkleRoot(bytes32)",
            "function setMerkleRoot(bytes32 root)";
    }
}

variants! {
    /// Read-only nullifier usage lookup.
    NullifierLookup, "nullifier lookup" {
        HasNullifierBeenUsed => "hasNullifierBeenUsed(uint256,bytes32)",
            "function hasNullifierBeenUsed(uint256 electionId, bytes32 nullifier) view returns (bool)";
        NullifierUsed => "nullifierUsed(bytes32)",
            "function nullifierUsed(bytes32 nullifier) view returns (bool)";
    }
}

variants! {
    /// Vote submission, proof-carrying shapes first.
    VoteSubmission, "vote submission" {
        SubmitVote => "submitVote(bytes32,uint256,bytes32[],bytes32)",
            "function submitVote(bytes32 nullifier, uint256 candidateId, bytes32[] proof, bytes32 leaf)";
        CastVote => "castVote(uint256,uint256,bytes32,bytes32[],bytes32)",
            "function castVote(uint256 electionId, uint256 candidateId, bytes32 nullifier, bytes32[] proof, bytes32 leaf)";
        Vote => "vote(uint256,bytes32)",
            "function vote(uint256 candidateId, bytes32 nullifier)";
    }
}

impl RootLookup {
    /// Whether the contract keeps one root per election rather than a single one.
    pub fn election_scoped(self) -> bool {
        !matches!(self, Self::MerkleRoot)
    }
}

impl RootPublication {
    /// Whether this setter writes the same storage the lookup reads.
    pub fn consistent_with(self, lookup: RootLookup) -> bool {
        match self {
            // Writes the current election's root on scoped contracts and the only root otherwise.
            Self::PublishRoot => true,
            Self::SetElectionRoot => lookup.election_scoped(),
            Self::SetMerkleRoot => !lookup.election_scoped(),
        }
    }
}

impl VoteSubmission {
    /// Whether the submission carries the inclusion proof for on-chain checking.
    pub fn carries_proof(self) -> bool {
        !matches!(self, Self::Vote)
    }
}

/// One consistent set of call shapes for a deployment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub election: ElectionLookup,
    pub root: RootLookup,
    pub publication: Option<RootPublication>,
    pub nullifier: Option<NullifierLookup>,
    pub submission: VoteSubmission,
}

impl Capabilities {
    /// Select variants, failing if a required concern has no known shape.
    pub fn detect(surface: &CallSurface) -> Result<Self> {
        let election = require::<ElectionLookup>(surface)?;
        let root = require::<RootLookup>(surface)?;
        let submission = require::<VoteSubmission>(surface)?;
        let publication = surface.first(|p: RootPublication| p.consistent_with(root));
        let nullifier = surface.first(|_: NullifierLookup| true);
        Ok(Self {
            election,
            root,
            publication,
            nullifier,
            submission,
        })
    }

    /// The publication shape, which only administrative calls need.
    pub fn require_publication(&self) -> Result<RootPublication> {
        self.publication.ok_or_else(|| {
            Error::UnsupportedLedgerContract(format!(
                "no {} consistent with {}",
                RootPublication::CONCERN,
                self.root
            ))
        })
    }
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "election: {}, root: {}, publication: {}, nullifier: {}, submission: {}",
            self.election,
            self.root,
            self.publication
                .map_or("unsupported".to_string(), |p| p.to_string()),
            self.nullifier
                .map_or("unsupported".to_string(), |n| n.to_string()),
            self.submission,
        )
    }
}

fn require<V: Variant>(surface: &CallSurface) -> Result<V> {
    surface.first(|_: V| true).ok_or_else(|| {
        let known = V::ALL
            .iter()
            .map(|v| v.signature())
            .collect::<Vec<_>>()
            .join(", ");
        Error::UnsupportedLedgerContract(format!(
            "no known {} (expected one of {known})",
            V::CONCERN
        ))
    })
}
