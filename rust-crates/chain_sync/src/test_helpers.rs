//! In-memory stand-ins for the node, the wallet and receipt delivery.
//!
//! All three fakes can share one [`Timeline`] so tests can assert the relative order
//! of reads, signature requests and mined receipts.

use crate::{
    cache::{
        CachedSnapshot,
        SnapshotCache,
        SnapshotSource,
    },
    error::{
        Error,
        ReadError,
    },
    lock,
    orchestrator::{
        OrchestratorConfig,
        PreparedTransaction,
        Receipt,
        ReceiptWatcher,
        SignError,
        TransactionOrchestrator,
        TransactionSigner,
        WalletSession,
    },
    snapshot::{
        BlockHeight,
        CacheKey,
        GameSnapshot,
        Snapshot,
        TokenBalanceSnapshot,
    },
    trigger::EventSource,
};
use game_abi::{
    Address,
    ContractEvent,
    GameId,
    TokenAmount,
    TxHash,
    Word,
    WriteCall,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    future::Future,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::sync::oneshot;

pub const GAME_CONTRACT: Address = Address([0x01; 20]);
pub const TOKEN_CONTRACT: Address = Address([0x02; 20]);
pub const PLAYER: Address = Address([0xaa; 20]);
pub const CHAIN_ID: u64 = 421_614;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    Read { key: CacheKey, block: BlockHeight },
    SignatureRequested { call: WriteCall },
    Mined { hash: TxHash, succeeded: bool },
}

#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<TimelineEvent>>>);

impl Timeline {
    fn push(&self, event: TimelineEvent) {
        lock(&self.0).push(event);
    }

    pub fn events(&self) -> Vec<TimelineEvent> {
        lock(&self.0).clone()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }

    /// Keys read after the first event matching `after`, in order.
    pub fn reads_after(&self, after: impl Fn(&TimelineEvent) -> bool) -> Vec<CacheKey> {
        lock(&self.0)
            .iter()
            .skip_while(|event| !after(event))
            .filter_map(|event| match event {
                TimelineEvent::Read { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Holds a scripted future until released.
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (send, recv) = oneshot::channel();
        (Self(send), recv)
    }

    pub fn release(self) {
        let _ = self.0.send(());
    }
}

#[derive(Default)]
struct FakeChainState {
    values: HashMap<CacheKey, Snapshot>,
    failures: HashMap<CacheKey, VecDeque<ReadError>>,
    gates: HashMap<CacheKey, VecDeque<oneshot::Receiver<()>>>,
    reads: Vec<(CacheKey, BlockHeight)>,
    logs: Vec<(BlockHeight, ContractEvent)>,
    log_queries: Vec<(BlockHeight, BlockHeight)>,
}

/// Contract state keyed like the cache. Values are captured when a read is issued.
#[derive(Clone, Default)]
pub struct FakeChain {
    state: Arc<Mutex<FakeChainState>>,
    timeline: Timeline,
}

impl FakeChain {
    pub fn with_timeline(timeline: Timeline) -> Self {
        Self {
            state: Arc::default(),
            timeline,
        }
    }

    pub fn set(&self, key: CacheKey, value: Snapshot) {
        lock(&self.state).values.insert(key, value);
    }

    pub fn fail_next(&self, key: CacheKey, err: ReadError) {
        lock(&self.state)
            .failures
            .entry(key)
            .or_default()
            .push_back(err);
    }

    /// The next read of `key` completes only once the returned gate is released.
    pub fn gate_next(&self, key: CacheKey) -> Gate {
        let (gate, recv) = Gate::new();
        lock(&self.state)
            .gates
            .entry(key)
            .or_default()
            .push_back(recv);
        gate
    }

    /// Records `event` as emitted in `block`, for later log queries.
    pub fn emit(&self, block: BlockHeight, event: ContractEvent) {
        lock(&self.state).logs.push((block, event));
    }

    pub fn log_queries(&self) -> Vec<(BlockHeight, BlockHeight)> {
        lock(&self.state).log_queries.clone()
    }

    pub fn reads(&self) -> Vec<(CacheKey, BlockHeight)> {
        lock(&self.state).reads.clone()
    }

    pub fn read_keys(&self) -> Vec<CacheKey> {
        self.reads().into_iter().map(|(key, _)| key).collect()
    }

    pub fn call_count(&self, key: &CacheKey) -> usize {
        lock(&self.state)
            .reads
            .iter()
            .filter(|(read, _)| read == key)
            .count()
    }
}

impl SnapshotSource for FakeChain {
    fn fetch(
        &self,
        key: &CacheKey,
        at: BlockHeight,
    ) -> impl Future<Output = Result<Snapshot, ReadError>> + Send + 'static {
        let (gate, result) = {
            let mut state = lock(&self.state);
            state.reads.push((key.clone(), at));
            let gate = state.gates.get_mut(key).and_then(VecDeque::pop_front);
            let failure = state.failures.get_mut(key).and_then(VecDeque::pop_front);
            let result = match failure {
                Some(err) => Err(err),
                None => state.values.get(key).cloned().ok_or_else(|| {
                    ReadError::Network(format!("no value scripted for {key:?}"))
                }),
            };
            (gate, result)
        };
        self.timeline.push(TimelineEvent::Read {
            key: key.clone(),
            block: at,
        });
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }
    }
}

impl EventSource for FakeChain {
    fn events(
        &self,
        from: BlockHeight,
        to: BlockHeight,
    ) -> impl Future<Output = Result<Vec<ContractEvent>, ReadError>> + Send {
        let mut state = lock(&self.state);
        state.log_queries.push((from, to));
        let events = state
            .logs
            .iter()
            .filter(|(block, _)| (from..=to).contains(block))
            .map(|(_, event)| event.clone())
            .collect();
        std::future::ready(Ok(events))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignResponse {
    Accept,
    Reject,
    Fail(String),
}

struct FakeWalletState {
    /// What the wallet is actually on.
    live: Option<WalletSession>,
    /// What the orchestrator last saw; catches up on `refresh_session`.
    seen: Option<WalletSession>,
    refreshes: usize,
    responses: VecDeque<SignResponse>,
    requests: Vec<PreparedTransaction>,
    submitted: u8,
}

/// Accepts every request unless told otherwise. The n-th submission gets hash `[n; 32]`.
#[derive(Clone)]
pub struct FakeWallet {
    state: Arc<Mutex<FakeWalletState>>,
    timeline: Timeline,
}

impl FakeWallet {
    pub fn connected(account: Address, chain_id: u64, timeline: Timeline) -> Self {
        Self::with_session(
            Some(WalletSession {
                account,
                chain_id,
            }),
            timeline,
        )
    }

    pub fn disconnected(timeline: Timeline) -> Self {
        Self::with_session(None, timeline)
    }

    fn with_session(session: Option<WalletSession>, timeline: Timeline) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeWalletState {
                live: session,
                seen: session,
                refreshes: 0,
                responses: VecDeque::new(),
                requests: Vec::new(),
                submitted: 0,
            })),
            timeline,
        }
    }

    /// Moves the wallet to another chain; visible after the next `refresh_session`.
    pub fn switch_chain(&self, chain_id: u64) {
        if let Some(session) = lock(&self.state).live.as_mut() {
            session.chain_id = chain_id;
        }
    }

    pub fn disconnect(&self) {
        let mut state = lock(&self.state);
        state.live = None;
        state.seen = None;
    }

    pub fn refreshes(&self) -> usize {
        lock(&self.state).refreshes
    }

    pub fn respond_next(&self, response: SignResponse) {
        lock(&self.state).responses.push_back(response);
    }

    pub fn requests(&self) -> Vec<PreparedTransaction> {
        lock(&self.state).requests.clone()
    }

    pub fn hash_of(submission: u8) -> TxHash {
        TxHash([submission; 32])
    }
}

impl TransactionSigner for FakeWallet {
    fn session(&self) -> Option<WalletSession> {
        lock(&self.state).seen
    }

    fn refresh_session(
        &self,
    ) -> impl Future<Output = Result<Option<WalletSession>, Error>> + Send {
        let mut state = lock(&self.state);
        state.refreshes += 1;
        state.seen = state.live;
        std::future::ready(Ok(state.seen))
    }

    fn sign_and_submit(
        &self,
        tx: &PreparedTransaction,
    ) -> impl Future<Output = Result<TxHash, SignError>> + Send {
        let result = {
            let mut state = lock(&self.state);
            state.requests.push(tx.clone());
            match state.responses.pop_front().unwrap_or(SignResponse::Accept) {
                SignResponse::Accept => {
                    state.submitted += 1;
                    Ok(Self::hash_of(state.submitted))
                }
                SignResponse::Reject => Err(SignError::Rejected),
                SignResponse::Fail(detail) => Err(SignError::Transport(detail)),
            }
        };
        self.timeline.push(TimelineEvent::SignatureRequested {
            call: tx.call.clone(),
        });
        std::future::ready(result)
    }
}

enum ReceiptScript {
    Confirm,
    Revert,
    Hold(oneshot::Receiver<()>),
    Never,
    Fail(ReadError),
}

struct FakeReceiptsState {
    last_block: BlockHeight,
    scripts: VecDeque<ReceiptScript>,
    waits: Vec<TxHash>,
}

/// Mines every transaction in its own block (starting after 100) unless scripted.
#[derive(Clone)]
pub struct FakeReceipts {
    state: Arc<Mutex<FakeReceiptsState>>,
    timeline: Timeline,
}

impl FakeReceipts {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeReceiptsState {
                last_block: 100,
                scripts: VecDeque::new(),
                waits: Vec::new(),
            })),
            timeline,
        }
    }

    fn script(&self, script: ReceiptScript) {
        lock(&self.state).scripts.push_back(script);
    }

    pub fn revert_next(&self) {
        self.script(ReceiptScript::Revert);
    }

    /// The next receipt is delivered (as success) once the gate is released.
    pub fn hold_next(&self) -> Gate {
        let (gate, recv) = Gate::new();
        self.script(ReceiptScript::Hold(recv));
        gate
    }

    pub fn never_settle_next(&self) {
        self.script(ReceiptScript::Never);
    }

    pub fn fail_next(&self, err: ReadError) {
        self.script(ReceiptScript::Fail(err));
    }

    pub fn waits(&self) -> Vec<TxHash> {
        lock(&self.state).waits.clone()
    }
}

impl ReceiptWatcher for FakeReceipts {
    fn wait_for_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Receipt, ReadError>> + Send {
        let script = {
            let mut state = lock(&self.state);
            state.waits.push(hash);
            state.scripts.pop_front().unwrap_or(ReceiptScript::Confirm)
        };
        let state = Arc::clone(&self.state);
        let timeline = self.timeline.clone();
        async move {
            let succeeded = match script {
                ReceiptScript::Confirm => true,
                ReceiptScript::Revert => false,
                ReceiptScript::Hold(gate) => {
                    let _ = gate.await;
                    true
                }
                ReceiptScript::Never => std::future::pending::<bool>().await,
                ReceiptScript::Fail(err) => return Err(err),
            };
            let block_number = {
                let mut state = lock(&state);
                state.last_block += 1;
                state.last_block
            };
            timeline.push(TimelineEvent::Mined { hash, succeeded });
            Ok(Receipt {
                hash,
                block_number,
                succeeded,
            })
        }
    }
}

pub type TestOrchestrator = TransactionOrchestrator<FakeChain, FakeWallet, FakeReceipts>;

/// Fakes wired together around one cache and orchestrator.
pub struct TestContext {
    pub timeline: Timeline,
    pub chain: FakeChain,
    pub wallet: FakeWallet,
    pub receipts: FakeReceipts,
    pub cache: SnapshotCache<FakeChain>,
    pub orchestrator: TestOrchestrator,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Self::default_config())
    }

    /// One token unit per share, so costs read as share counts.
    pub fn default_config() -> OrchestratorConfig {
        OrchestratorConfig {
            chain_id: CHAIN_ID,
            game_contract: GAME_CONTRACT,
            token_contract: TOKEN_CONTRACT,
            confirmation_timeout: Duration::from_secs(5),
            share_price: 1,
        }
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let timeline = Timeline::default();
        let chain = FakeChain::with_timeline(timeline.clone());
        let wallet = FakeWallet::connected(PLAYER, CHAIN_ID, timeline.clone());
        let receipts = FakeReceipts::new(timeline.clone());
        let cache = SnapshotCache::new(chain.clone());
        let orchestrator =
            TransactionOrchestrator::new(cache.clone(), wallet.clone(), receipts.clone(), config);
        Self {
            timeline,
            chain,
            wallet,
            receipts,
            cache,
            orchestrator,
        }
    }

    pub fn position_key(&self) -> CacheKey {
        CacheKey::TokenPosition {
            holder: PLAYER,
            spender: GAME_CONTRACT,
        }
    }

    pub fn set_token_position(&self, balance: TokenAmount, allowance: TokenAmount) {
        self.chain.set(
            self.position_key(),
            Snapshot::TokenPosition(TokenBalanceSnapshot {
                holder: PLAYER,
                spender: GAME_CONTRACT,
                balance,
                allowance,
            }),
        );
    }

    pub fn set_current_game(&self, game_id: GameId, phase_code: u8) {
        self.chain
            .set(CacheKey::CurrentGameId, Snapshot::GameId(game_id));
        self.chain.set(
            CacheKey::Game(game_id),
            Snapshot::Game(game_snapshot(game_id, phase_code)),
        );
    }

    /// Waits until `key` holds a value read at `block` or later.
    pub async fn cached_at(&self, key: &CacheKey, block: BlockHeight) -> CachedSnapshot {
        let wait = async {
            loop {
                if let Some(cached) = self.cache.get(key).filter(|c| c.block >= block) {
                    return cached;
                }
                tokio::task::yield_now().await;
            }
        };
        match tokio::time::timeout(Duration::from_secs(1), wait).await {
            Ok(cached) => cached,
            Err(_) => panic!("{key:?} never reached block {block}"),
        }
    }

    /// Loads `keys` into the cache, then forgets the reads it took.
    pub async fn prime(&self, keys: impl IntoIterator<Item = CacheKey>) {
        self.cache.invalidate(keys).await;
        self.timeline.clear();
    }
}

pub fn game_snapshot(game_id: GameId, phase_code: u8) -> GameSnapshot {
    GameSnapshot {
        game_id,
        token_cap: 1_000,
        total_revenue: 0,
        prize_pool: 0,
        platform_fee: 0,
        elimination_random_seed: Word::default(),
        start_time: 0,
        end_time: 0,
        voting_deadline: 0,
        phase_code,
    }
}
