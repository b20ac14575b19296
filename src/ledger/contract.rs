//! The ballot contract on an EVM chain, driven through a single relaying account.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::{
    abi::{Function, Token},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, TransactionRequest, U256,
        U64,
    },
};
use rocket::tokio::{self, sync::Mutex, time::timeout};

use crate::error::{Error, Result};
use crate::model::{
    accumulator::Root,
    digest::Digest,
    election::{ElectionId, TxRef},
    identity::Nullifier,
    vote::Vote,
};

use super::{
    capability::{
        CallSurface, Capabilities, ElectionLookup, NullifierLookup, RootLookup, RootPublication,
        Variant, VoteSubmission,
    },
    Ledger,
};

type RelayClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Everything needed to reach the contract.
pub struct LedgerSettings {
    pub rpc_url: String,
    pub contract: Address,
    pub chain_id: u64,
    pub private_key: String,
    /// Bound on every RPC call, and on waiting for a submission to confirm.
    pub timeout: Duration,
    pub confirmations: usize,
    /// Contract ABI JSON; when absent the call surface is read from bytecode.
    pub abi_json: Option<String>,
}

pub struct ContractLedger {
    client: Arc<RelayClient>,
    address: Address,
    capabilities: Capabilities,
    timeout: Duration,
    confirmations: usize,
    /// Held while a transaction is assigned its nonce and broadcast.
    nonces: Arc<Mutex<NonceCounter>>,
}

impl ContractLedger {
    /// Connect, check the chain, and resolve the contract's capabilities.
    pub async fn connect(settings: LedgerSettings) -> Result<Self> {
        info!("Connecting to ledger RPC at {}", settings.rpc_url);
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
            .map_err(|e| Error::Configuration(format!("invalid ledger RPC url: {e}")))?;

        let chain_id = within(settings.timeout, "eth_chainId", provider.get_chainid()).await?;
        if chain_id != U256::from(settings.chain_id) {
            return Err(Error::Configuration(format!(
                "chain id mismatch: expected {}, node reports {chain_id}",
                settings.chain_id
            )));
        }

        let wallet = settings
            .private_key
            .parse::<LocalWallet>()
            .map_err(|e| Error::Configuration(format!("invalid relayer private key: {e}")))?
            .with_chain_id(settings.chain_id);
        let relayer = wallet.address();
        let client = SignerMiddleware::new(provider, wallet);

        let surface = match &settings.abi_json {
            Some(json) => CallSurface::from_abi_json(json)?,
            None => {
                let code = within(
                    settings.timeout,
                    "eth_getCode",
                    client.get_code(settings.contract, None),
                )
                .await?;
                if code.is_empty() {
                    return Err(Error::UnsupportedLedgerContract(format!(
                        "no contract deployed at {:?}",
                        settings.contract
                    )));
                }
                CallSurface::from_bytecode(&code)
            }
        };
        let capabilities = Capabilities::detect(&surface)?;
        info!(
            "Ledger contract {:?} on chain {}, relaying as {relayer:?}",
            settings.contract, settings.chain_id
        );
        info!("Ledger capabilities: {capabilities}");
        if !capabilities.submission.carries_proof() {
            warn!("Contract takes votes without inclusion proofs; membership is only checked by this relayer");
        }

        Ok(Self {
            client: Arc::new(client),
            address: settings.contract,
            capabilities,
            timeout: settings.timeout,
            confirmations: settings.confirmations,
            nonces: Arc::new(Mutex::new(NonceCounter::default())),
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn transaction(&self, function: &Function, args: &[Token]) -> Result<TypedTransaction> {
        let data = function
            .encode_input(args)
            .map_err(|e| Error::Chain(format!("cannot encode {}: {e}", function.name)))?;
        Ok(TransactionRequest::new().to(self.address).data(data).into())
    }

    /// Read-only call.
    async fn call<V: Variant>(&self, variant: V, args: &[Token]) -> Result<Vec<Token>> {
        let function = function(variant)?;
        let tx = self.transaction(&function, args)?;
        let output = within(self.timeout, variant.signature(), self.client.call(&tx, None)).await?;
        function
            .decode_output(&output)
            .map_err(|e| Error::Chain(format!("cannot decode {variant} output: {e}")))
    }

    /// State-mutating call, awaited until confirmed.
    ///
    /// The transaction is driven by a detached task: if this call times out or
    /// its caller goes away, the task still tracks the transaction to its end
    /// and logs the outcome.
    async fn send<V: Variant>(&self, variant: V, args: &[Token]) -> Result<TxRef> {
        let function = function(variant)?;
        let tx = self.transaction(&function, args)?;
        let client = self.client.clone();
        let nonces = self.nonces.clone();
        let confirmations = self.confirmations;
        let limit = self.timeout;
        let what = variant.signature();

        detached(self.timeout, what, async move {
            send_and_confirm(&client, &nonces, tx, confirmations, limit, what).await
        })
        .await
    }
}

/// Run `work` on its own task and wait at most `limit` for it.
///
/// The task is not cancelled on timeout; it runs to completion and logs its outcome.
async fn detached<T, F>(limit: Duration, what: &'static str, work: F) -> Result<T>
where
    T: Display + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let result = work.await;
        match &result {
            Ok(outcome) => info!("{what} confirmed as {outcome}"),
            Err(e) => warn!("{what} failed: {e}"),
        }
        result
    });

    match timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Chain(format!("{what} task failed: {e}"))),
        Err(_) => Err(Error::Chain(format!(
            "{what} not confirmed within {limit:?}; its outcome is unknown, \
             check for the vote before resubmitting"
        ))),
    }
}

/// The relaying account's next nonce, as far as this process knows it.
///
/// Unknown until first needed, then seeded from the node's pending count.
#[derive(Debug, Default)]
struct NonceCounter {
    next: Option<U256>,
}

impl NonceCounter {
    /// The nonce for the next broadcast.
    async fn reserve<F>(&mut self, pending_count: impl FnOnce() -> F) -> Result<U256>
    where
        F: Future<Output = Result<U256>>,
    {
        let nonce = match self.next {
            Some(nonce) => nonce,
            None => pending_count().await?,
        };
        self.next = Some(nonce);
        Ok(nonce)
    }

    /// The reserved nonce was broadcast.
    fn advance(&mut self) {
        self.next = self.next.map(|nonce| nonce + U256::one());
    }

    /// A broadcast failed; take the node's word for the next nonce.
    async fn resync(&mut self, pending_count: impl Future<Output = Result<U256>>) {
        match pending_count.await {
            Ok(count) => {
                debug!("Relayer nonce resynchronised to {count}");
                self.next = Some(count);
            }
            Err(e) => {
                error!("Failed to resynchronise relayer nonce: {e}");
                self.next = None;
            }
        }
    }
}

async fn send_and_confirm(
    client: &RelayClient,
    nonces: &Mutex<NonceCounter>,
    mut tx: TypedTransaction,
    confirmations: usize,
    limit: Duration,
    what: &str,
) -> Result<TxRef> {
    let pending_count = move || {
        within(
            limit,
            "eth_getTransactionCount",
            client.get_transaction_count(client.address(), Some(BlockNumber::Pending.into())),
        )
    };

    let pending = {
        // One broadcast at a time keeps this account's nonces gap-free and ordered.
        let mut nonces = nonces.lock().await;
        tx.set_nonce(nonces.reserve(pending_count).await?);
        // Broadcast exactly once. A vote is never re-sent on failure.
        match within(limit, what, client.send_transaction(tx, None)).await {
            Ok(pending) => {
                nonces.advance();
                pending
            }
            Err(e) => {
                nonces.resync(pending_count()).await;
                return Err(e);
            }
        }
    };

    let tx_hash = *pending;
    debug!("{what} broadcast as {tx_hash:?}, awaiting {confirmations} confirmation(s)");
    let receipt = pending
        .confirmations(confirmations)
        .await
        .map_err(|e| Error::Chain(format!("{what} {tx_hash:?}: {e}")))?
        .ok_or_else(|| Error::Chain(format!("{what} {tx_hash:?} was dropped")))?;

    if receipt.status != Some(U64::from(1)) {
        return Err(Error::Chain(format!("{what} {tx_hash:?} reverted")));
    }
    Ok(TxRef(format!("{tx_hash:?}")))
}

#[rocket::async_trait]
impl Ledger for ContractLedger {
    async fn current_election(&self) -> Result<Option<ElectionId>> {
        let variant = self.capabilities.election;
        let output = self.call(variant, &election_arguments(variant)).await?;
        let id = single_uint(&output, variant)?;
        Ok((id != 0).then_some(ElectionId(id)))
    }

    async fn root_of(&self, election: ElectionId) -> Result<Option<Root>> {
        let variant = self.capabilities.root;
        let output = self.call(variant, &root_arguments(variant, election)).await?;
        let root = single_bytes32(&output, variant)?;
        Ok((!root.is_zero()).then_some(root))
    }

    async fn publish_root(&self, election: ElectionId, root: Root) -> Result<TxRef> {
        let variant = self.capabilities.require_publication()?;
        self.send(variant, &publication_arguments(variant, election, root))
            .await
    }

    async fn nullifier_used(
        &self,
        election: ElectionId,
        nullifier: &Nullifier,
    ) -> Result<Option<bool>> {
        let Some(variant) = self.capabilities.nullifier else {
            return Ok(None);
        };
        let output = self
            .call(variant, &nullifier_arguments(variant, election, nullifier))
            .await?;
        single_bool(&output, variant).map(Some)
    }

    async fn submit_vote(&self, vote: &Vote) -> Result<TxRef> {
        let variant = self.capabilities.submission;
        match self.send(variant, &vote_arguments(variant, vote)).await {
            Err(Error::Chain(message)) if reverted_as_duplicate(&message) => {
                Err(Error::DuplicateVote(vote.election))
            }
            other => other,
        }
    }
}

/// Await an RPC future, bounded by `limit`.
async fn within<T, E: Display>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::Chain(format!("{what} failed: {e}"))),
        Err(_) => Err(Error::Chain(format!("{what} timed out after {limit:?}"))),
    }
}

fn function<V: Variant>(variant: V) -> Result<Function> {
    ethers::abi::parse_abi(&[variant.declaration()])
        .ok()
        .and_then(|abi| abi.functions().next().cloned())
        .ok_or_else(|| Error::Configuration(format!("unparseable declaration for {variant}")))
}

/// Revert reasons that mean the ledger already recorded this nullifier.
fn reverted_as_duplicate(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("already voted")
        || (message.contains("nullifier")
            && (message.contains("used") || message.contains("already")))
}

fn uint(value: u64) -> Token {
    Token::Uint(U256::from(value))
}

fn bytes32(digest: &Digest) -> Token {
    Token::FixedBytes(digest.as_bytes().to_vec())
}

fn election_arguments(variant: ElectionLookup) -> Vec<Token> {
    match variant {
        ElectionLookup::CurrentElectionId
        | ElectionLookup::ActiveElectionId
        | ElectionLookup::GetCurrentElection => vec![],
    }
}

fn root_arguments(variant: RootLookup, election: ElectionId) -> Vec<Token> {
    match variant {
        RootLookup::RootOf | RootLookup::ElectionRoots => vec![uint(election.0)],
        RootLookup::MerkleRoot => vec![],
    }
}

fn publication_arguments(variant: RootPublication, election: ElectionId, root: Root) -> Vec<Token> {
    match variant {
        RootPublication::PublishRoot | RootPublication::SetMerkleRoot => vec![bytes32(&root)],
        RootPublication::SetElectionRoot => vec![uint(election.0), bytes32(&root)],
    }
}

fn nullifier_arguments(
    variant: NullifierLookup,
    election: ElectionId,
    nullifier: &Nullifier,
) -> Vec<Token> {
    match variant {
        NullifierLookup::HasNullifierBeenUsed => {
            vec![uint(election.0), bytes32(nullifier.digest())]
        }
        NullifierLookup::NullifierUsed => vec![bytes32(nullifier.digest())],
    }
}

fn vote_arguments(variant: VoteSubmission, vote: &Vote) -> Vec<Token> {
    let proof = || Token::Array(vote.proof.siblings.iter().map(bytes32).collect());
    match variant {
        VoteSubmission::SubmitVote => vec![
            bytes32(vote.nullifier.digest()),
            uint(vote.candidate.0),
            proof(),
            bytes32(&vote.leaf),
        ],
        VoteSubmission::CastVote => vec![
            uint(vote.election.0),
            uint(vote.candidate.0),
            bytes32(vote.nullifier.digest()),
            proof(),
            bytes32(&vote.leaf),
        ],
        VoteSubmission::Vote => vec![uint(vote.candidate.0), bytes32(vote.nullifier.digest())],
    }
}

fn single_uint(output: &[Token], variant: impl Variant) -> Result<u64> {
    match output {
        [Token::Uint(value)] if *value <= U256::from(u64::MAX) => Ok(value.as_u64()),
        _ => Err(unexpected_output(variant)),
    }
}

fn single_bytes32(output: &[Token], variant: impl Variant) -> Result<Digest> {
    match output {
        [Token::FixedBytes(bytes)] => Digest::try_from(bytes.as_slice()),
        _ => Err(unexpected_output(variant)),
    }
}

fn single_bool(output: &[Token], variant: impl Variant) -> Result<bool> {
    match output {
        [Token::Bool(value)] => Ok(*value),
        _ => Err(unexpected_output(variant)),
    }
}

fn unexpected_output(variant: impl Variant) -> Error {
    Error::Chain(format!("unexpected output from {variant}"))
}
