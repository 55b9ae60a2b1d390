use crate::{
    cache::{
        RefreshOutcome,
        SnapshotCache,
        SnapshotSource,
    },
    error::ReadError,
    reader::{
        ChainReader,
        RpcTransport,
    },
    snapshot::{
        BlockHeight,
        CacheKey,
    },
};
use game_abi::{
    Address,
    ContractEvent,
    GameId,
};
use std::{
    future::Future,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time::{
        Interval,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

/// Source of "a new block exists" signals. `None` means the source is exhausted.
pub trait RefreshTrigger {
    fn next_block(&mut self) -> impl Future<Output = Option<BlockHeight>> + Send;
}

/// Polls `eth_blockNumber` and yields each increase.
pub struct PollingTrigger<T> {
    reader: ChainReader<T>,
    interval: Interval,
    last_seen: Option<BlockHeight>,
}

impl<T: RpcTransport> PollingTrigger<T> {
    pub fn new(reader: ChainReader<T>, every: Duration) -> Self {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            reader,
            interval,
            last_seen: None,
        }
    }
}

impl<T: RpcTransport> RefreshTrigger for PollingTrigger<T> {
    async fn next_block(&mut self) -> Option<BlockHeight> {
        loop {
            self.interval.tick().await;
            match self.reader.block_number().await {
                Ok(height) if self.last_seen.is_none_or(|seen| height > seen) => {
                    self.last_seen = Some(height);
                    return Some(height);
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "block number poll failed"),
            }
        }
    }
}

/// Contract events over an inclusive block range.
pub trait EventSource: Send + Sync + 'static {
    fn events(
        &self,
        from: BlockHeight,
        to: BlockHeight,
    ) -> impl Future<Output = Result<Vec<ContractEvent>, ReadError>> + Send;
}

/// No event feed; only tracked keys are refreshed on each block.
impl EventSource for () {
    async fn events(
        &self,
        _from: BlockHeight,
        _to: BlockHeight,
    ) -> Result<Vec<ContractEvent>, ReadError> {
        Ok(Vec::new())
    }
}

impl<T: RpcTransport> EventSource for ChainReader<T> {
    fn events(
        &self,
        from: BlockHeight,
        to: BlockHeight,
    ) -> impl Future<Output = Result<Vec<ContractEvent>, ReadError>> + Send {
        ChainReader::events(self, from, to)
    }
}

/// Pushed block heights, e.g. from a subscription or a manual refresh command.
pub struct ChannelTrigger {
    recv: mpsc::Receiver<BlockHeight>,
}

impl ChannelTrigger {
    pub fn new_with_sender(capacity: usize) -> (Self, mpsc::Sender<BlockHeight>) {
        let (send, recv) = mpsc::channel(capacity);
        (Self { recv }, send)
    }
}

impl RefreshTrigger for ChannelTrigger {
    async fn next_block(&mut self) -> Option<BlockHeight> {
        self.recv.recv().await
    }
}

/// Feeds block signals and contract events into the cache's invalidation path.
pub struct SyncDriver<S, R, E = ()> {
    cache: SnapshotCache<S>,
    trigger: R,
    events: E,
}

impl<S: SnapshotSource, R: RefreshTrigger> SyncDriver<S, R> {
    pub fn new(cache: SnapshotCache<S>, trigger: R) -> Self {
        Self {
            cache,
            trigger,
            events: (),
        }
    }
}

impl<S: SnapshotSource, R: RefreshTrigger, E: EventSource> SyncDriver<S, R, E> {
    /// Also fetches the logs of every new block range and invalidates what they touch.
    pub fn with_events<E2: EventSource>(self, events: E2) -> SyncDriver<S, R, E2> {
        SyncDriver {
            cache: self.cache,
            trigger: self.trigger,
            events,
        }
    }

    pub fn cache(&self) -> &SnapshotCache<S> {
        &self.cache
    }

    /// Re-reads every tracked key at `height`.
    pub fn on_block(
        &self,
        height: BlockHeight,
    ) -> impl Future<Output = Vec<(CacheKey, RefreshOutcome)>> + Send + 'static {
        refresh_tracked(&self.cache, height)
    }

    /// Invalidates the keys each event touches, in event order.
    pub fn apply_events(
        &self,
        events: &[ContractEvent],
    ) -> impl Future<Output = Vec<(CacheKey, RefreshOutcome)>> + Send + 'static {
        invalidate_for_events(&self.cache, events)
    }

    /// Handles one new block: tracked keys first, then whatever the logs in
    /// `(previous head, height]` touch.
    pub async fn on_new_block(&self, height: BlockHeight) {
        follow_block(&self.cache, &self.events, height).await;
    }

    /// Runs until the trigger is exhausted or `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let SyncDriver {
            cache,
            mut trigger,
            events,
        } = self;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("sync driver stopping");
                    break;
                }
                next = trigger.next_block() => match next {
                    Some(height) => follow_block(&cache, &events, height).await,
                    None => {
                        info!("refresh trigger closed");
                        break;
                    }
                },
            }
        }
    }
}

fn refresh_tracked<S: SnapshotSource>(
    cache: &SnapshotCache<S>,
    height: BlockHeight,
) -> impl Future<Output = Vec<(CacheKey, RefreshOutcome)>> + Send + 'static {
    cache.advance_head(height);
    let keys = cache.tracked_keys();
    debug!(height, keys = keys.len(), "refreshing tracked keys");
    cache.invalidate(keys)
}

fn invalidate_for_events<S: SnapshotSource>(
    cache: &SnapshotCache<S>,
    events: &[ContractEvent],
) -> impl Future<Output = Vec<(CacheKey, RefreshOutcome)>> + Send + 'static {
    let tracked = cache.tracked_keys();
    let mut keys: Vec<CacheKey> = Vec::new();
    for event in events {
        for key in keys_for_event(event, &tracked) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    cache.invalidate(keys)
}

/// Reads run on their own tasks; only the log fetch is awaited. Nothing is fetched for a
/// height at or below the head, or before any head is known.
async fn follow_block<S: SnapshotSource, E: EventSource>(
    cache: &SnapshotCache<S>,
    source: &E,
    height: BlockHeight,
) {
    let previous = cache.head();
    drop(refresh_tracked(cache, height));
    if previous == 0 || height <= previous {
        return;
    }
    let from = previous + 1;
    match source.events(from, height).await {
        Ok(events) if events.is_empty() => {}
        Ok(events) => {
            debug!(from, to = height, count = events.len(), "applying contract events");
            drop(invalidate_for_events(cache, &events));
        }
        Err(err) => warn!(%err, from, to = height, "could not fetch contract events"),
    }
}

fn account_keys(
    tracked: &[CacheKey],
    game_id: GameId,
    account: Address,
) -> impl Iterator<Item = CacheKey> + '_ {
    tracked
        .iter()
        .filter(move |key| match key {
            CacheKey::Participant {
                game_id: g,
                account: a,
            } => *g == game_id && *a == account,
            CacheKey::TokenPosition { holder, .. } => *holder == account,
            _ => false,
        })
        .cloned()
}

/// Cache keys whose value may change because of `event`.
pub fn keys_for_event(event: &ContractEvent, tracked: &[CacheKey]) -> Vec<CacheKey> {
    let game_id = event.game_id();
    match event {
        ContractEvent::SharesPurchased { user, .. } => {
            let mut keys = vec![
                CacheKey::Game(game_id),
                CacheKey::ParticipantCount(game_id),
                CacheKey::TotalPrizePool,
            ];
            keys.extend(account_keys(tracked, game_id, *user));
            keys
        }
        ContractEvent::GameStatusChanged { .. } => {
            let mut keys = vec![
                CacheKey::Game(game_id),
                CacheKey::ActiveParticipants(game_id),
                CacheKey::VoteTally(game_id),
                CacheKey::GameWinner(game_id),
            ];
            // a new stage resets every participant's voted flag
            keys.extend(
                tracked
                    .iter()
                    .filter(|key| {
                        matches!(key, CacheKey::Participant { game_id: g, .. } if *g == game_id)
                    })
                    .cloned(),
            );
            keys
        }
        ContractEvent::VoteCast { voter, .. } => {
            let mut keys = vec![CacheKey::VoteTally(game_id)];
            keys.extend(
                account_keys(tracked, game_id, *voter)
                    .filter(|k| matches!(k, CacheKey::Participant { .. })),
            );
            keys
        }
        ContractEvent::PrizeDistributed { winner, .. } => {
            let mut keys = vec![
                CacheKey::GameWinner(game_id),
                CacheKey::ConsolationPrizePool(game_id),
                CacheKey::FinalPrizePool(game_id),
                CacheKey::TotalPrizePool,
            ];
            keys.extend(
                account_keys(tracked, game_id, *winner).filter(|k| matches!(k, CacheKey::TokenPosition { .. })),
            );
            keys
        }
        ContractEvent::GameCreated { .. } => {
            vec![CacheKey::CurrentGameId, CacheKey::Game(game_id)]
        }
    }
}
