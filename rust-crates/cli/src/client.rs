use crate::render::{
    AccountView,
    GameView,
    render_status,
};
use chain_sync::{
    CacheKey,
    ChainReader,
    HttpTransport,
    OrchestratorConfig,
    PollingTrigger,
    RefreshOutcome,
    Snapshot,
    SnapshotCache,
    SyncDriver,
    TransactionHandle,
    TransactionOrchestrator,
    TxStatus,
    classify,
    orchestrator::{
        Operation,
        PurchaseRequest,
    },
    view::{
        AccessLevel,
        VoteSplit,
        unix_now,
    },
    wallet::{
        RpcReceiptWatcher,
        RpcWallet,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::NetworkProfile;
use game_abi::{
    Address,
    GameId,
};
use std::{
    future::Future,
    sync::{
        Arc,
        Mutex,
    },
};
use tracing::{
    info,
    warn,
};

pub type NodeReader = ChainReader<HttpTransport>;
pub type Orchestrator =
    TransactionOrchestrator<NodeReader, RpcWallet<HttpTransport>, RpcReceiptWatcher<HttpTransport>>;

/// Read side: one reader and one cache shared by every command.
pub struct Client {
    profile: NetworkProfile,
    reader: NodeReader,
    cache: SnapshotCache<NodeReader>,
}

/// A connected wallet able to send writes.
pub struct Writer {
    pub orchestrator: Orchestrator,
    pub account: Address,
}

fn snapshot_of<T>(
    cache: &SnapshotCache<NodeReader>,
    key: &CacheKey,
    pick: impl FnOnce(&Snapshot) -> Option<T>,
) -> Result<T> {
    cache
        .get(key)
        .and_then(|cached| pick(cached.value.as_ref()))
        .ok_or_else(|| eyre!("no value loaded for {key:?}"))
}

impl Client {
    pub fn new(profile: NetworkProfile) -> Result<Self> {
        let transport =
            HttpTransport::with_timeout(profile.rpc_url.clone(), profile.sync.rpc_timeout())
                .wrap_err("building RPC client")?;
        let reader = ChainReader::new(transport, profile.game_contract, profile.token_contract);
        let cache = SnapshotCache::new(reader.clone());
        Ok(Self {
            profile,
            reader,
            cache,
        })
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    /// Refuses to continue when the node serves a different chain than the profile.
    pub async fn check_chain(&self) -> Result<()> {
        let chain_id = self.reader.chain_id().await.wrap_err("querying chain id")?;
        if chain_id != self.profile.chain_id {
            return Err(eyre!(
                "RPC endpoint is on chain {chain_id}, expected {} ({})",
                self.profile.chain_id,
                self.profile.name
            ));
        }
        let head = self.reader.block_number().await.wrap_err("querying block number")?;
        self.cache.advance_head(head);
        Ok(())
    }

    async fn load(&self, keys: Vec<CacheKey>) -> Result<()> {
        for (key, outcome) in self.cache.invalidate(keys).await {
            if let RefreshOutcome::Failed(err) = outcome {
                return Err(err).wrap_err_with(|| format!("reading {key:?}"));
            }
        }
        Ok(())
    }

    pub async fn current_game(&self) -> Result<GameId> {
        self.load(vec![CacheKey::CurrentGameId]).await?;
        snapshot_of(&self.cache, &CacheKey::CurrentGameId, Snapshot::as_game_id)
    }

    pub async fn token_decimals(&self) -> Result<u8> {
        self.load(vec![CacheKey::TokenDecimals]).await?;
        snapshot_of(&self.cache, &CacheKey::TokenDecimals, Snapshot::as_decimals)
    }

    pub async fn game_view(&self, account: Option<Address>) -> Result<GameView> {
        let game_id = self.current_game().await?;
        let mut keys = vec![
            CacheKey::Game(game_id),
            CacheKey::ParticipantCount(game_id),
            CacheKey::ActiveParticipants(game_id),
            CacheKey::VoteTally(game_id),
            CacheKey::TotalPrizePool,
            CacheKey::Paused,
            CacheKey::TokenDecimals,
        ];
        if let Some(account) = account {
            keys.push(CacheKey::Participant { game_id, account });
            keys.push(CacheKey::TokenPosition {
                holder: account,
                spender: self.profile.game_contract,
            });
        }
        self.load(keys).await?;
        let symbol = self.reader.symbol(None).await.wrap_err("reading token symbol")?;

        let cache = &self.cache;
        let account = match account {
            Some(account) => Some(AccountView {
                account,
                participant: cache
                    .get(&CacheKey::Participant { game_id, account })
                    .and_then(|cached| cached.value.as_participant().cloned()),
                position: snapshot_of(
                    cache,
                    &CacheKey::TokenPosition {
                        holder: account,
                        spender: self.profile.game_contract,
                    },
                    |s| s.as_token_position().copied(),
                )?,
            }),
            None => None,
        };
        Ok(GameView {
            game: snapshot_of(cache, &CacheKey::Game(game_id), |s| s.as_game().cloned())?,
            participant_count: snapshot_of(
                cache,
                &CacheKey::ParticipantCount(game_id),
                Snapshot::as_count,
            )?,
            active: snapshot_of(cache, &CacheKey::ActiveParticipants(game_id), |s| {
                s.as_addresses().map(<[Address]>::to_vec)
            })?,
            tally: snapshot_of(cache, &CacheKey::VoteTally(game_id), Snapshot::as_vote_tally)?,
            total_prize_pool: snapshot_of(cache, &CacheKey::TotalPrizePool, Snapshot::as_amount)?,
            paused: snapshot_of(cache, &CacheKey::Paused, Snapshot::as_flag)?,
            decimals: snapshot_of(cache, &CacheKey::TokenDecimals, Snapshot::as_decimals)?,
            symbol,
            account,
        })
    }

    pub async fn access_level(&self, account: Address) -> Result<AccessLevel> {
        self.load(vec![CacheKey::Owner, CacheKey::Operator(account)])
            .await?;
        let owner = snapshot_of(&self.cache, &CacheKey::Owner, Snapshot::as_address)?;
        let is_operator =
            snapshot_of(&self.cache, &CacheKey::Operator(account), Snapshot::as_flag)?;
        Ok(AccessLevel::evaluate(account, owner, is_operator))
    }

    /// Prints the game, then phase and vote changes as blocks arrive, until `shutdown`.
    pub async fn watch(
        &self,
        account: Option<Address>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let view = self.game_view(account).await?;
        for line in render_status(&view, unix_now()) {
            println!("{line}");
        }

        let last_phase = Mutex::new(view.phase());
        let _phase = self
            .cache
            .subscribe(CacheKey::Game(view.game.game_id), move |_, cached| {
                let Some(game) = cached.value.as_game() else {
                    return;
                };
                let phase = classify(game);
                if let Ok(mut last) = last_phase.lock() {
                    if *last != phase {
                        println!("[block {}] phase: {} -> {}", cached.block, *last, phase);
                        *last = phase;
                    }
                }
            });
        let last_tally = Mutex::new(view.tally);
        let _tally = self
            .cache
            .subscribe(CacheKey::VoteTally(view.game.game_id), move |_, cached| {
                let Some(tally) = cached.value.as_vote_tally() else {
                    return;
                };
                if let Ok(mut last) = last_tally.lock() {
                    if *last != tally {
                        let split = VoteSplit::from_tally(&tally);
                        println!(
                            "[block {}] votes: {} continue / {} stop ({} bps continue)",
                            cached.block, tally.continue_votes, tally.stop_votes, split.continue_bps
                        );
                        *last = tally;
                    }
                }
            });
        let game_id = view.game.game_id;
        let _next_game = self
            .cache
            .subscribe(CacheKey::CurrentGameId, move |_, cached| {
                if let Some(current) = cached.value.as_game_id().filter(|id| *id != game_id) {
                    println!("[block {}] game #{current} has started", cached.block);
                }
            });

        let trigger = PollingTrigger::new(self.reader.clone(), self.profile.sync.block_poll_interval());
        info!(every = ?self.profile.sync.block_poll_interval(), "watching for new blocks");
        SyncDriver::new(self.cache.clone(), trigger)
            .with_events(self.reader.clone())
            .run(shutdown)
            .await;
        Ok(())
    }

    /// Connects to the wallet endpoint and builds an orchestrator over the shared cache.
    pub async fn connect(&self, wallet_rpc: &str) -> Result<Writer> {
        // signature prompts wait on the user
        let wallet_transport = HttpTransport::with_timeout(
            wallet_rpc,
            self.profile.sync.confirmation_timeout(),
        )
        .wrap_err("building wallet RPC client")?;
        let wallet = RpcWallet::new(Arc::new(wallet_transport));
        let session = wallet.connect().await.wrap_err("connecting wallet")?;
        let receipts = RpcReceiptWatcher::new(
            Arc::clone(self.reader.transport()),
            self.profile.sync.receipt_poll_interval(),
        );
        let orchestrator = TransactionOrchestrator::new(
            self.cache.clone(),
            wallet,
            receipts,
            OrchestratorConfig::from_profile(&self.profile),
        );
        Ok(Writer {
            orchestrator,
            account: session.account,
        })
    }

    pub async fn buy(&self, writer: &Writer, request: PurchaseRequest) -> Result<()> {
        let view = self.game_view(Some(writer.account)).await?;
        if !view.phase().facets().is_buying {
            return Err(eyre!("game #{} is not selling shares ({})", view.game.game_id, view.phase()));
        }
        let flow = writer
            .orchestrator
            .start_purchase(request)
            .await
            .wrap_err("buying shares")?;
        if let Some(approval) = flow.approval() {
            self.follow(approval).await?;
        }
        let handles = flow.complete().await.wrap_err("buying shares")?;
        self.follow(&handles.purchase).await
    }

    pub async fn vote(&self, writer: &Writer, continue_game: bool) -> Result<()> {
        let view = self.game_view(Some(writer.account)).await?;
        let eligibility = view.eligibility(unix_now());
        if !eligibility.is_eligible() {
            return Err(eyre!("cannot vote in game #{}: {eligibility:?}", view.game.game_id));
        }
        let handle = writer
            .orchestrator
            .execute(Operation::SubmitVote {
                game_id: view.game.game_id,
                continue_game,
            })
            .await?;
        self.follow(&handle).await
    }

    pub async fn admin(&self, writer: &Writer, op: Operation) -> Result<()> {
        let level = self.access_level(writer.account).await?;
        let required = op.required_access();
        if !level.permits(required) {
            return Err(eyre!(
                "{} requires {required:?} access; {} has {level:?}",
                op.name(),
                writer.account
            ));
        }
        let handle = writer.orchestrator.execute(op).await?;
        self.follow(&handle).await
    }

    /// Prints each status until the write settles. Ctrl-C stops waiting for the receipt.
    async fn follow(&self, handle: &TransactionHandle) -> Result<()> {
        let mut updates = handle.subscribe();
        let terminal = loop {
            let status = updates.borrow_and_update().clone();
            report(&status, &self.profile);
            if status.is_terminal() {
                break status;
            }
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break handle.status();
                    }
                }
                interrupted = tokio::signal::ctrl_c() => {
                    if let Err(err) = interrupted {
                        warn!(%err, "could not listen for interrupt");
                    }
                    handle.cancel_wait();
                }
            }
        };
        let intent = handle.record().intent;
        terminal
            .into_result()
            .map(|_| ())
            .wrap_err_with(|| format!("{intent} did not complete"))
    }
}

fn report(status: &TxStatus, profile: &NetworkProfile) {
    match status {
        TxStatus::Idle => {}
        TxStatus::AwaitingSignature => println!("waiting for signature..."),
        TxStatus::Submitted { hash } => match profile.tx_url(hash) {
            Some(url) => println!("submitted {hash} ({url})"),
            None => println!("submitted {hash}"),
        },
        TxStatus::Confirmed { hash, block } => println!("confirmed {hash} in block {block}"),
        TxStatus::Rejected => println!("signature declined"),
        TxStatus::Failed { hash, reason } => match hash {
            Some(hash) => println!("failed {hash}: {reason:?}"),
            None => println!("failed before submission: {reason:?}"),
        },
    }
}
