//! Keyed, block-ordered snapshot cache.
//!
//! Reads are pinned to the current head block. A value is only ever replaced by one
//! fetched at the same or a later block, so a slow read cannot overwrite a newer one.
//! At most one read per key is in flight for a given head; later callers attach to it.

use crate::{
    error::ReadError,
    lock,
    snapshot::{
        BlockHeight,
        CacheKey,
        Snapshot,
    },
};
use futures::{
    FutureExt,
    future::{
        BoxFuture,
        Shared,
        join_all,
    },
};
use std::{
    collections::{
        BTreeSet,
        HashMap,
    },
    future::Future,
    sync::{
        Arc,
        Mutex,
        Weak,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};
use tracing::{
    debug,
    error,
    warn,
};

/// Where the cache gets its values from.
///
/// `fetch` is called synchronously while a refresh is being registered; any I/O belongs
/// in the returned future.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(
        &self,
        key: &CacheKey,
        at: BlockHeight,
    ) -> impl Future<Output = Result<Snapshot, ReadError>> + Send + 'static;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied { block: BlockHeight },
    /// A value from a later block was already in place; this result was dropped.
    Superseded {
        fetched_at: BlockHeight,
        applied_block: BlockHeight,
    },
    Failed(ReadError),
}

/// Read-only view of a cached value.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub value: Arc<Snapshot>,
    pub block: BlockHeight,
    pub is_stale: bool,
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;
type Listener = Arc<dyn Fn(&CacheKey, &CachedSnapshot) + Send + Sync>;

struct Entry {
    value: Arc<Snapshot>,
    block: BlockHeight,
    is_stale: bool,
}

impl Entry {
    fn view(&self) -> CachedSnapshot {
        CachedSnapshot {
            value: Arc::clone(&self.value),
            block: self.block,
            is_stale: self.is_stale,
        }
    }
}

struct InFlight {
    block: BlockHeight,
    ticket: u64,
    outcome: SharedRefresh,
}

#[derive(Default)]
struct State {
    head: BlockHeight,
    entries: HashMap<CacheKey, Entry>,
    in_flight: HashMap<CacheKey, InFlight>,
    next_ticket: u64,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_key: HashMap<CacheKey, Vec<(u64, Listener)>>,
}

struct Inner<S> {
    source: S,
    state: Mutex<State>,
    listeners: Arc<Mutex<Listeners>>,
}

/// Shared handle; clones refer to the same cache.
pub struct SnapshotCache<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SnapshotCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SnapshotSource> SnapshotCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(State::default()),
                listeners: Arc::new(Mutex::new(Listeners::default())),
            }),
        }
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Last known value for `key`. Never waits.
    pub fn get(&self, key: &CacheKey) -> Option<CachedSnapshot> {
        lock(&self.inner.state).entries.get(key).map(Entry::view)
    }

    pub fn head(&self) -> BlockHeight {
        lock(&self.inner.state).head
    }

    /// Moves the head forward; returns whether it moved.
    pub fn advance_head(&self, height: BlockHeight) -> bool {
        let mut state = lock(&self.inner.state);
        if height > state.head {
            debug!(from = state.head, to = height, "cache head advanced");
            state.head = height;
            true
        } else {
            false
        }
    }

    /// Keys that hold a value or have a subscriber.
    pub fn tracked_keys(&self) -> Vec<CacheKey> {
        let mut keys: BTreeSet<CacheKey> =
            lock(&self.inner.state).entries.keys().cloned().collect();
        keys.extend(lock(&self.inner.listeners).by_key.keys().cloned());
        keys.into_iter().collect()
    }

    /// Starts (or joins) a read of `key` at the current head.
    ///
    /// The read is registered before this returns and runs on the tokio runtime whether
    /// or not the returned future is awaited.
    pub fn refresh(&self, key: CacheKey) -> impl Future<Output = RefreshOutcome> + Send + 'static {
        let mut state = lock(&self.inner.state);
        let head = state.head;
        if let Some(in_flight) = state.in_flight.get(&key).filter(|f| f.block >= head) {
            debug!(?key, block = in_flight.block, "joining in-flight refresh");
            return in_flight.outcome.clone();
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let fetch = self.inner.source.fetch(&key, head);
        let cache = self.clone();
        let settle_key = key.clone();
        let task = tokio::spawn(async move {
            let result = fetch.await;
            cache.settle(settle_key, head, ticket, result)
        });
        let outcome: BoxFuture<'static, RefreshOutcome> = async move {
            task.await.unwrap_or_else(|e| {
                RefreshOutcome::Failed(ReadError::Network(format!("refresh task ended: {e}")))
            })
        }
        .boxed();
        let outcome = outcome.shared();
        debug!(?key, block = head, "refresh issued");
        state.in_flight.insert(
            key,
            InFlight {
                block: head,
                ticket,
                outcome: outcome.clone(),
            },
        );
        outcome
    }

    /// Marks `keys` stale and refreshes each of them, in order.
    ///
    /// The reads are issued before this returns; the future resolves once all settle.
    pub fn invalidate(
        &self,
        keys: impl IntoIterator<Item = CacheKey>,
    ) -> impl Future<Output = Vec<(CacheKey, RefreshOutcome)>> + Send + 'static {
        let pending: Vec<_> = keys
            .into_iter()
            .map(|key| {
                if let Some(entry) = lock(&self.inner.state).entries.get_mut(&key) {
                    entry.is_stale = true;
                }
                let outcome = self.refresh(key.clone());
                async move { (key, outcome.await) }
            })
            .collect();
        join_all(pending)
    }

    /// Calls `listener` after every successful refresh of `key`.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe(
        &self,
        key: CacheKey,
        listener: impl Fn(&CacheKey, &CachedSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let mut listeners = lock(&self.inner.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners
            .by_key
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            key,
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
            active: AtomicBool::new(true),
        }
    }

    fn settle(
        &self,
        key: CacheKey,
        fetched_at: BlockHeight,
        ticket: u64,
        result: Result<Snapshot, ReadError>,
    ) -> RefreshOutcome {
        let (outcome, applied) = {
            let mut state = lock(&self.inner.state);
            if state
                .in_flight
                .get(&key)
                .is_some_and(|in_flight| in_flight.ticket == ticket)
            {
                state.in_flight.remove(&key);
            }
            match result {
                Ok(value) => match state.entries.get(&key) {
                    Some(entry) if entry.block > fetched_at => {
                        debug!(
                            ?key,
                            fetched_at,
                            applied_block = entry.block,
                            "discarding out-of-order refresh"
                        );
                        let outcome = RefreshOutcome::Superseded {
                            fetched_at,
                            applied_block: entry.block,
                        };
                        (outcome, None)
                    }
                    _ => {
                        let entry = Entry {
                            value: Arc::new(value),
                            block: fetched_at,
                            is_stale: false,
                        };
                        let view = entry.view();
                        state.entries.insert(key.clone(), entry);
                        (RefreshOutcome::Applied { block: fetched_at }, Some(view))
                    }
                },
                Err(err) => {
                    if let Some(entry) = state
                        .entries
                        .get_mut(&key)
                        .filter(|entry| entry.block <= fetched_at)
                    {
                        entry.is_stale = true;
                    }
                    if err.is_version_skew() {
                        error!(?key, %err, "contract response does not match client interface");
                    } else {
                        warn!(?key, %err, "refresh failed; keeping last known value");
                    }
                    (RefreshOutcome::Failed(err), None)
                }
            }
        };

        if let Some(view) = applied {
            self.notify(&key, &view);
        }
        outcome
    }

    fn notify(&self, key: &CacheKey, view: &CachedSnapshot) {
        let targets: Vec<Listener> = lock(&self.inner.listeners)
            .by_key
            .get(key)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in targets {
            listener(key, view);
        }
    }
}

/// Handle returned by [`SnapshotCache::subscribe`]. Unsubscribes on drop.
pub struct Subscription {
    key: CacheKey,
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
    active: AtomicBool,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };
        let mut listeners = lock(&listeners);
        if let Some(entries) = listeners.by_key.get_mut(&self.key) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                listeners.by_key.remove(&self.key);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::FakeChain;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> (FakeChain, SnapshotCache<FakeChain>) {
        let chain = FakeChain::default();
        (chain.clone(), SnapshotCache::new(chain))
    }

    #[tokio::test]
    async fn refresh__failure_keeps_last_value_and_marks_it_stale() {
        // given
        let (chain, cache) = cache();
        chain.set(CacheKey::TotalPrizePool, Snapshot::Amount(500));
        cache.advance_head(10);
        cache.refresh(CacheKey::TotalPrizePool).await;
        chain.fail_next(
            CacheKey::TotalPrizePool,
            ReadError::Network("timeout".into()),
        );

        // when
        let outcome = cache.refresh(CacheKey::TotalPrizePool).await;

        // then
        assert!(matches!(outcome, RefreshOutcome::Failed(ReadError::Network(_))));
        let cached = cache.get(&CacheKey::TotalPrizePool).unwrap();
        assert_eq!(*cached.value, Snapshot::Amount(500));
        assert_eq!(cached.block, 10);
        assert!(cached.is_stale);
    }

    #[tokio::test]
    async fn refresh__late_result_from_older_block_is_discarded() {
        // given
        let (chain, cache) = cache();
        let key = CacheKey::Game(1);
        chain.set(key.clone(), Snapshot::Count(10));
        let slow = chain.gate_next(key.clone());
        cache.advance_head(10);
        let older = cache.refresh(key.clone());

        chain.set(key.clone(), Snapshot::Count(11));
        let fast = chain.gate_next(key.clone());
        cache.advance_head(11);
        let newer = cache.refresh(key.clone());

        // when
        fast.release();
        let newer = newer.await;
        slow.release();
        let older = older.await;

        // then
        assert_eq!(newer, RefreshOutcome::Applied { block: 11 });
        assert_eq!(
            older,
            RefreshOutcome::Superseded {
                fetched_at: 10,
                applied_block: 11,
            }
        );
        let cached = cache.get(&key).unwrap();
        assert_eq!(*cached.value, Snapshot::Count(11));
        assert_eq!(cached.block, 11);
    }

    #[tokio::test]
    async fn refresh__concurrent_callers_share_one_read() {
        // given
        let (chain, cache) = cache();
        let key = CacheKey::Paused;
        chain.set(key.clone(), Snapshot::Flag(false));
        let gate = chain.gate_next(key.clone());

        // when
        let first = cache.refresh(key.clone());
        let second = cache.refresh(key.clone());
        gate.release();
        let (first, second) = tokio::join!(first, second);

        // then
        assert_eq!(chain.call_count(&key), 1);
        assert_eq!(first, RefreshOutcome::Applied { block: 0 });
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn refresh__new_head_does_not_join_read_from_older_block() {
        // given
        let (chain, cache) = cache();
        let key = CacheKey::Paused;
        chain.set(key.clone(), Snapshot::Flag(true));
        let gate = chain.gate_next(key.clone());
        let first = cache.refresh(key.clone());

        // when
        cache.advance_head(5);
        let second = cache.refresh(key.clone()).await;
        gate.release();
        let first = first.await;

        // then
        assert_eq!(chain.call_count(&key), 2);
        assert_eq!(second, RefreshOutcome::Applied { block: 5 });
        assert!(matches!(first, RefreshOutcome::Superseded { .. }));
    }

    #[tokio::test]
    async fn invalidate__marks_stale_then_issues_reads_in_order() {
        // given
        let (chain, cache) = cache();
        chain.set(CacheKey::Paused, Snapshot::Flag(false));
        chain.set(CacheKey::Owner, Snapshot::Address(Default::default()));
        cache
            .invalidate([CacheKey::Paused, CacheKey::Owner])
            .await;
        let gate = chain.gate_next(CacheKey::Paused);

        // when
        let pending = cache.invalidate([CacheKey::Paused, CacheKey::Owner]);
        let stale_while_pending = cache.get(&CacheKey::Paused).unwrap().is_stale;
        gate.release();
        let outcomes = pending.await;

        // then
        assert!(stale_while_pending);
        assert_eq!(
            chain.read_keys(),
            vec![
                CacheKey::Paused,
                CacheKey::Owner,
                CacheKey::Paused,
                CacheKey::Owner
            ]
        );
        assert!(outcomes.iter().all(|(_, o)| matches!(o, RefreshOutcome::Applied { .. })));
        assert!(!cache.get(&CacheKey::Paused).unwrap().is_stale);
    }

    #[tokio::test]
    async fn subscribe__listener_runs_on_success_until_unsubscribed() {
        // given
        let (chain, cache) = cache();
        let key = CacheKey::TotalPrizePool;
        chain.set(key.clone(), Snapshot::Amount(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let subscription = cache.subscribe(key.clone(), move |_, snapshot| {
            assert_eq!(*snapshot.value, Snapshot::Amount(1));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // when
        cache.refresh(key.clone()).await;
        chain.fail_next(key.clone(), ReadError::Network("down".into()));
        cache.refresh(key.clone()).await;
        subscription.unsubscribe();
        subscription.unsubscribe();
        cache.refresh(key.clone()).await;

        // then
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.tracked_keys().contains(&key));
    }

    #[tokio::test]
    async fn tracked_keys__includes_subscribed_keys_without_values() {
        let (_chain, cache) = cache();
        let _subscription = cache.subscribe(CacheKey::Owner, |_, _| {});

        assert_eq!(cache.tracked_keys(), vec![CacheKey::Owner]);
    }
}
