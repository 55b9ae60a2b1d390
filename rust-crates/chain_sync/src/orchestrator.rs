//! Signed writes as explicit per-attempt state machines.
//!
//! ```text
//! Idle -> AwaitingSignature -> Submitted -> Confirmed
//!                          \-> Rejected  \-> Failed
//! ```
//!
//! Only a confirmed write touches the cache, through the same `invalidate` path the
//! block trigger uses.

use crate::{
    cache::{
        RefreshOutcome,
        SnapshotCache,
        SnapshotSource,
    },
    error::{
        Error,
        ReadError,
    },
    lock,
    snapshot::{
        BlockHeight,
        CacheKey,
        TokenBalanceSnapshot,
    },
};
use deployments::NetworkProfile;
use game_abi::{
    Address,
    GameId,
    TokenAmount,
    TxHash,
    WriteCall,
};
use std::{
    collections::HashSet,
    future::Future,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::sync::{
    Notify,
    watch,
};
use tracing::{
    error,
    info,
    warn,
};

pub mod operation;

#[cfg(test)]
mod tests;

pub use operation::{
    Intent,
    Operation,
    TxKind,
};

/// The connected wallet's account and chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletSession {
    pub account: Address,
    pub chain_id: u64,
}

/// A write ready to be handed to the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub from: Address,
    pub to: Address,
    pub call: WriteCall,
    pub chain_id: u64,
}

impl PreparedTransaction {
    pub fn data(&self) -> Vec<u8> {
        self.call.encode()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("user rejected the request")]
    Rejected,
    #[error("wallet transport failed: {0}")]
    Transport(String),
}

pub trait TransactionSigner: Send + Sync + 'static {
    /// Session as last seen.
    fn session(&self) -> Option<WalletSession>;

    /// Asks the wallet again which account and chain it is on.
    fn refresh_session(&self) -> impl Future<Output = Result<Option<WalletSession>, Error>> + Send;

    /// Prompts for a signature and broadcasts the signed transaction.
    fn sign_and_submit(
        &self,
        tx: &PreparedTransaction,
    ) -> impl Future<Output = Result<TxHash, SignError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub hash: TxHash,
    pub block_number: BlockHeight,
    pub succeeded: bool,
}

pub trait ReceiptWatcher: Send + Sync + 'static {
    /// Resolves once the transaction is mined.
    fn wait_for_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Receipt, ReadError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Reverted,
    Network(String),
    TimedOut,
    /// The caller stopped waiting; the transaction itself may still be mined.
    WaitCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    AwaitingSignature,
    Submitted {
        hash: TxHash,
    },
    Confirmed {
        hash: TxHash,
        block: BlockHeight,
    },
    Rejected,
    Failed {
        hash: Option<TxHash>,
        reason: FailureReason,
    },
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed { .. } | TxStatus::Rejected | TxStatus::Failed { .. }
        )
    }

    pub fn hash(&self) -> Option<TxHash> {
        match self {
            TxStatus::Submitted { hash } | TxStatus::Confirmed { hash, .. } => Some(*hash),
            TxStatus::Failed { hash, .. } => *hash,
            TxStatus::Idle | TxStatus::AwaitingSignature | TxStatus::Rejected => None,
        }
    }

    pub fn into_result(self) -> Result<(TxHash, BlockHeight), Error> {
        match self {
            TxStatus::Confirmed { hash, block } => Ok((hash, block)),
            TxStatus::Rejected => Err(Error::UserRejected),
            TxStatus::Failed { hash, reason } => Err(match (reason, hash) {
                (FailureReason::Reverted, Some(hash)) => Error::Reverted { hash },
                (FailureReason::WaitCancelled, Some(hash)) => Error::WaitCancelled { hash },
                (FailureReason::Network(detail), _) => Error::Network(detail),
                (FailureReason::TimedOut, Some(hash)) => {
                    Error::Network(format!("no receipt for {hash} before timeout"))
                }
                (reason, None) => Error::Network(format!("transaction failed: {reason:?}")),
            }),
            TxStatus::Idle | TxStatus::AwaitingSignature | TxStatus::Submitted { .. } => {
                Err(Error::Network("transaction has not settled".to_string()))
            }
        }
    }
}

/// Snapshot of one write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: u64,
    pub kind: TxKind,
    pub intent: Intent,
    pub status: TxStatus,
    pub hash: Option<TxHash>,
    pub related_keys: Vec<CacheKey>,
}

/// Caller's view of a running attempt.
#[derive(Clone)]
pub struct TransactionHandle {
    id: u64,
    kind: TxKind,
    intent: Intent,
    related_keys: Arc<[CacheKey]>,
    status: watch::Receiver<TxStatus>,
    cancel: Arc<Notify>,
}

impl TransactionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TxKind {
        self.kind
    }

    pub fn status(&self) -> TxStatus {
        self.status.borrow().clone()
    }

    pub fn record(&self) -> TransactionRecord {
        let status = self.status();
        TransactionRecord {
            id: self.id,
            kind: self.kind,
            intent: self.intent.clone(),
            hash: status.hash(),
            status,
            related_keys: self.related_keys.to_vec(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TxStatus> {
        self.status.clone()
    }

    /// Waits for a terminal status.
    pub async fn settled(&self) -> TxStatus {
        let mut status = self.status.clone();
        if let Ok(terminal) = status.wait_for(TxStatus::is_terminal).await {
            return terminal.clone();
        }
        let last = status.borrow().clone();
        last
    }

    /// Stops waiting for the receipt. The submitted transaction is not affected.
    pub fn cancel_wait(&self) {
        self.cancel.notify_one();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub chain_id: u64,
    pub game_contract: Address,
    pub token_contract: Address,
    pub confirmation_timeout: Duration,
    pub share_price: TokenAmount,
}

impl OrchestratorConfig {
    pub fn from_profile(profile: &NetworkProfile) -> Self {
        Self {
            chain_id: profile.chain_id,
            game_contract: profile.game_contract,
            token_contract: profile.token_contract,
            confirmation_timeout: profile.sync.confirmation_timeout(),
            share_price: profile.sync.share_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub shares: u64,
    pub prize_address: Option<Address>,
}

/// Steps of a share purchase; `approval` runs first when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasePlan {
    pub cost: TokenAmount,
    pub approval: Option<Operation>,
    pub purchase: Operation,
}

pub fn plan_purchase(
    position: &TokenBalanceSnapshot,
    request: &PurchaseRequest,
    share_price: TokenAmount,
) -> Result<PurchasePlan, Error> {
    let cost = u128::from(request.shares).saturating_mul(share_price);
    if position.balance < cost {
        return Err(Error::InsufficientBalance {
            required: cost,
            available: position.balance,
        });
    }
    Ok(PurchasePlan {
        cost,
        approval: (position.allowance < cost).then_some(Operation::Approve { amount: cost }),
        purchase: Operation::BuyShares {
            amount: cost,
            prize_address: request.prize_address,
        },
    })
}

/// Handles of a purchase; `purchase` is only launched after `approval` confirmed.
#[derive(Clone)]
pub struct PurchaseHandles {
    pub approval: Option<TransactionHandle>,
    pub purchase: TransactionHandle,
}

/// A purchase between its approval and the purchase transaction itself.
///
/// Dropping the flow releases the purchase intent without sending anything further.
pub struct PurchaseFlow<S, W, R> {
    orchestrator: TransactionOrchestrator<S, W, R>,
    plan: PurchasePlan,
    approval: Option<TransactionHandle>,
    guard: IntentGuard,
}

impl<S, W, R> PurchaseFlow<S, W, R>
where
    S: SnapshotSource,
    W: TransactionSigner,
    R: ReceiptWatcher,
{
    pub fn plan(&self) -> &PurchasePlan {
        &self.plan
    }

    pub fn approval(&self) -> Option<&TransactionHandle> {
        self.approval.as_ref()
    }

    /// Waits for the approval to confirm, then sends the purchase.
    pub async fn complete(self) -> Result<PurchaseHandles, Error> {
        let PurchaseFlow {
            orchestrator,
            plan,
            approval,
            guard,
        } = self;
        if let Some(approval) = &approval {
            approval.settled().await.into_result()?;
        }
        let session = orchestrator.current_session().await?;
        let purchase = orchestrator.launch(session, plan.purchase, guard);
        Ok(PurchaseHandles { approval, purchase })
    }
}

/// Releases its intent when dropped.
struct IntentGuard {
    intents: Arc<Mutex<HashSet<Intent>>>,
    intent: Intent,
}

impl Drop for IntentGuard {
    fn drop(&mut self) {
        lock(&self.intents).remove(&self.intent);
    }
}

struct Inner<S, W, R> {
    cache: SnapshotCache<S>,
    signer: W,
    receipts: R,
    config: OrchestratorConfig,
    intents: Arc<Mutex<HashSet<Intent>>>,
    next_id: AtomicU64,
}

pub struct TransactionOrchestrator<S, W, R> {
    inner: Arc<Inner<S, W, R>>,
}

impl<S, W, R> Clone for TransactionOrchestrator<S, W, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, W, R> TransactionOrchestrator<S, W, R>
where
    S: SnapshotSource,
    W: TransactionSigner,
    R: ReceiptWatcher,
{
    pub fn new(
        cache: SnapshotCache<S>,
        signer: W,
        receipts: R,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                signer,
                receipts,
                config,
                intents: Arc::new(Mutex::new(HashSet::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &SnapshotCache<S> {
        &self.inner.cache
    }

    pub fn signer(&self) -> &W {
        &self.inner.signer
    }

    /// Connected session on the expected chain, as last seen.
    pub fn session(&self) -> Result<WalletSession, Error> {
        self.check_chain(self.inner.signer.session())
    }

    /// Like [`Self::session`], but re-reads the wallet first. Called before every
    /// signature request.
    pub async fn current_session(&self) -> Result<WalletSession, Error> {
        let session = self.inner.signer.refresh_session().await?;
        self.check_chain(session)
    }

    fn check_chain(&self, session: Option<WalletSession>) -> Result<WalletSession, Error> {
        let session = session.ok_or(Error::NotConnected)?;
        if session.chain_id != self.inner.config.chain_id {
            return Err(Error::WrongNetwork {
                expected: self.inner.config.chain_id,
                actual: session.chain_id,
            });
        }
        Ok(session)
    }

    pub fn token_position_key(&self, account: Address) -> CacheKey {
        CacheKey::TokenPosition {
            holder: account,
            spender: self.inner.config.game_contract,
        }
    }

    /// Cached balance and allowance, read once if nothing is cached yet.
    pub async fn token_position(&self, account: Address) -> Result<TokenBalanceSnapshot, Error> {
        let key = self.token_position_key(account);
        if self.inner.cache.get(&key).is_none() {
            if let RefreshOutcome::Failed(err) = self.inner.cache.refresh(key.clone()).await {
                return Err(err.into());
            }
        }
        self.inner
            .cache
            .get(&key)
            .and_then(|cached| cached.value.as_token_position().copied())
            .ok_or_else(|| Error::Network("token position unavailable".to_string()))
    }

    fn current_game(&self) -> Option<GameId> {
        self.inner
            .cache
            .get(&CacheKey::CurrentGameId)
            .and_then(|cached| cached.value.as_game_id())
    }

    fn claim(&self, intent: Intent) -> Result<IntentGuard, Error> {
        let mut intents = lock(&self.inner.intents);
        if !intents.insert(intent.clone()) {
            return Err(Error::ConcurrentOperation(intent));
        }
        Ok(IntentGuard {
            intents: Arc::clone(&self.inner.intents),
            intent,
        })
    }

    /// Starts one write.
    ///
    /// Refused before any signature request when no wallet is connected, the wallet is
    /// on another chain, the same intent is already in flight, or a purchase is not
    /// covered by the cached balance and allowance.
    pub async fn execute(&self, op: Operation) -> Result<TransactionHandle, Error> {
        let session = self.current_session().await?;
        let guard = self.claim(op.intent(session.account))?;
        if let Operation::BuyShares { amount, .. } = &op {
            let position = self.token_position(session.account).await?;
            if position.balance < *amount {
                return Err(Error::InsufficientBalance {
                    required: *amount,
                    available: position.balance,
                });
            }
            if position.allowance < *amount {
                return Err(Error::InsufficientAllowance {
                    required: *amount,
                    approved: position.allowance,
                });
            }
        }
        Ok(self.launch(session, op, guard))
    }

    /// Buys shares, approving the token spend first when the allowance is short.
    ///
    /// The purchase is only sent for signing after the approval is confirmed.
    pub async fn buy_shares(&self, request: PurchaseRequest) -> Result<PurchaseHandles, Error> {
        self.start_purchase(request).await?.complete().await
    }

    /// First half of [`Self::buy_shares`]: checks the balance, claims the purchase and
    /// sends the approval if one is needed. The approval can be watched or cancelled
    /// through [`PurchaseFlow::approval`] before the purchase is sent.
    pub async fn start_purchase(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseFlow<S, W, R>, Error> {
        let session = self.current_session().await?;
        let position = self.token_position(session.account).await?;
        let plan = plan_purchase(&position, &request, self.inner.config.share_price)?;
        let guard = self.claim(plan.purchase.intent(session.account))?;

        let approval = match &plan.approval {
            Some(approve) => {
                info!(cost = plan.cost, allowance = position.allowance, "approving spend first");
                Some(self.execute(approve.clone()).await?)
            }
            None => None,
        };
        Ok(PurchaseFlow {
            orchestrator: self.clone(),
            plan,
            approval,
            guard,
        })
    }

    fn launch(
        &self,
        session: WalletSession,
        op: Operation,
        guard: IntentGuard,
    ) -> TransactionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let keys: Arc<[CacheKey]> = op
            .invalidation_keys(
                session.account,
                self.inner.config.game_contract,
                self.current_game(),
            )
            .into();
        let (status, receiver) = watch::channel(TxStatus::Idle);
        let cancel = Arc::new(Notify::new());
        let handle = TransactionHandle {
            id,
            kind: op.kind(),
            intent: guard.intent.clone(),
            related_keys: Arc::clone(&keys),
            status: receiver,
            cancel: Arc::clone(&cancel),
        };

        let this = self.clone();
        tokio::spawn(async move {
            let terminal = this.attempt(id, session, &op, &keys, &status, &cancel).await;
            drop(guard);
            status.send_replace(terminal);
        });
        handle
    }

    async fn attempt(
        &self,
        id: u64,
        session: WalletSession,
        op: &Operation,
        keys: &[CacheKey],
        status: &watch::Sender<TxStatus>,
        cancel: &Notify,
    ) -> TxStatus {
        let call = op.call(self.inner.config.game_contract);
        let to = if call.targets_token() {
            self.inner.config.token_contract
        } else {
            self.inner.config.game_contract
        };
        let tx = PreparedTransaction {
            from: session.account,
            to,
            call,
            chain_id: session.chain_id,
        };

        status.send_replace(TxStatus::AwaitingSignature);
        info!(id, operation = op.name(), "requesting signature");
        let hash = match self.inner.signer.sign_and_submit(&tx).await {
            Ok(hash) => hash,
            Err(SignError::Rejected) => {
                info!(id, operation = op.name(), "signature declined");
                return TxStatus::Rejected;
            }
            Err(SignError::Transport(detail)) => {
                warn!(id, operation = op.name(), %detail, "wallet failed to submit");
                return TxStatus::Failed {
                    hash: None,
                    reason: FailureReason::Network(detail),
                };
            }
        };

        status.send_replace(TxStatus::Submitted { hash });
        info!(id, operation = op.name(), %hash, "submitted");
        let timeout = self.inner.config.confirmation_timeout;
        let waited = tokio::select! {
            biased;
            _ = cancel.notified() => None,
            result = tokio::time::timeout(timeout, self.inner.receipts.wait_for_receipt(hash)) => {
                Some(result)
            }
        };

        match waited {
            None => {
                info!(id, %hash, "stopped waiting for confirmation");
                TxStatus::Failed {
                    hash: Some(hash),
                    reason: FailureReason::WaitCancelled,
                }
            }
            Some(Err(_elapsed)) => {
                warn!(id, %hash, ?timeout, "no receipt before timeout");
                TxStatus::Failed {
                    hash: Some(hash),
                    reason: FailureReason::TimedOut,
                }
            }
            Some(Ok(Err(err))) => {
                warn!(id, %hash, %err, "receipt lookup failed");
                TxStatus::Failed {
                    hash: Some(hash),
                    reason: FailureReason::Network(err.to_string()),
                }
            }
            Some(Ok(Ok(receipt))) if !receipt.succeeded => {
                error!(id, %hash, block = receipt.block_number, "transaction reverted");
                TxStatus::Failed {
                    hash: Some(hash),
                    reason: FailureReason::Reverted,
                }
            }
            Some(Ok(Ok(receipt))) => {
                info!(id, %hash, block = receipt.block_number, "confirmed");
                self.inner.cache.advance_head(receipt.block_number);
                // refreshes run on their own tasks
                drop(self.inner.cache.invalidate(keys.iter().cloned()));
                TxStatus::Confirmed {
                    hash,
                    block: receipt.block_number,
                }
            }
        }
    }
}
