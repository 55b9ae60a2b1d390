//! Chain-state synchronisation for the elimination game client.
//!
//! [`ChainReader`] issues typed reads, [`SnapshotCache`] keeps the last-known value of
//! every key and refreshes it in block order, [`phase`] turns raw game fields into the
//! phase every screen agrees on, and [`TransactionOrchestrator`] drives signed writes
//! and feeds their confirmations back into the cache.

pub mod cache;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod reader;
pub mod snapshot;
pub mod trigger;
pub mod units;
pub mod view;
pub mod wallet;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use cache::{
    CachedSnapshot,
    RefreshOutcome,
    SnapshotCache,
    SnapshotSource,
    Subscription,
};
pub use error::{
    Error,
    ReadError,
    RpcError,
};
pub use orchestrator::{
    OrchestratorConfig,
    TransactionHandle,
    TransactionOrchestrator,
    TxStatus,
};
pub use phase::{
    Phase,
    PhaseFacets,
    VotingStage,
    classify,
};
pub use reader::{
    ChainReader,
    HttpTransport,
    RpcTransport,
};
pub use snapshot::{
    BlockHeight,
    CacheKey,
    GameSnapshot,
    ParticipantSnapshot,
    Snapshot,
    TokenBalanceSnapshot,
    VoteTally,
};
pub use trigger::{
    ChannelTrigger,
    EventSource,
    PollingTrigger,
    RefreshTrigger,
    SyncDriver,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
