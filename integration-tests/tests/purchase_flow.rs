#![allow(non_snake_case)]

use chain_sync::{
    CacheKey,
    ParticipantSnapshot,
    Phase,
    Snapshot,
    TxStatus,
    classify,
    orchestrator::PurchaseRequest,
    test_helpers::{
        PLAYER,
        SignResponse,
        TestContext,
        game_snapshot,
    },
    view::sale_progress_percent,
};
use game_abi::Address;

fn participant(shares: u128) -> Snapshot {
    Snapshot::Participant(ParticipantSnapshot {
        game_id: 1,
        account: PLAYER,
        shares,
        prize_withdrawal_address: Address::ZERO,
        effective_vote: true,
        has_voted_in_current_stage: false,
    })
}

fn participant_key() -> CacheKey {
    CacheKey::Participant {
        game_id: 1,
        account: PLAYER,
    }
}

/// Game 1 selling shares, the player holding tokens but no shares yet, all of it cached.
async fn buying_game(balance: u128, allowance: u128) -> TestContext {
    let ctx = TestContext::new();
    ctx.set_current_game(1, 0);
    ctx.set_token_position(balance, allowance);
    ctx.chain.set(participant_key(), participant(0));
    ctx.chain.set(CacheKey::ParticipantCount(1), Snapshot::Count(0));
    ctx.chain
        .set(CacheKey::ActiveParticipants(1), Snapshot::Addresses(vec![]));
    ctx.chain.set(CacheKey::TotalPrizePool, Snapshot::Amount(0));
    ctx.prime([
        CacheKey::CurrentGameId,
        CacheKey::Game(1),
        ctx.position_key(),
        participant_key(),
        CacheKey::ParticipantCount(1),
        CacheKey::TotalPrizePool,
    ])
    .await;
    ctx
}

#[tokio::test]
async fn buy_shares__player_view_reflects_purchase_once_confirmed() {
    // given
    let ctx = buying_game(100, 0).await;
    let mut after = game_snapshot(1, 0);
    after.total_revenue = 10;
    ctx.chain.set(CacheKey::Game(1), Snapshot::Game(after));
    ctx.chain.set(participant_key(), participant(10));
    ctx.chain.set(CacheKey::ParticipantCount(1), Snapshot::Count(1));
    ctx.chain.set(CacheKey::TotalPrizePool, Snapshot::Amount(10));
    ctx.set_token_position(90, 0);

    // when
    let handles = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await
        .unwrap();
    let status = handles.purchase.settled().await;

    // then
    assert!(matches!(status, TxStatus::Confirmed { block: 102, .. }));
    let shares = ctx.cached_at(&participant_key(), 102).await;
    assert_eq!(shares.value.as_participant().map(|p| p.shares), Some(10));
    let position = ctx.cached_at(&ctx.position_key(), 102).await;
    assert_eq!(position.value.as_token_position().map(|p| p.balance), Some(90));
    let count = ctx.cached_at(&CacheKey::ParticipantCount(1), 102).await;
    assert_eq!(count.value.as_count(), Some(1));
    let game = ctx.cached_at(&CacheKey::Game(1), 102).await;
    let game = game.value.as_game().unwrap();
    assert_eq!(classify(game), Phase::Buying);
    assert_eq!(sale_progress_percent(game), 1);
}

#[tokio::test]
async fn buy_shares__declined_purchase_leaves_cache_untouched() {
    // given
    let ctx = buying_game(100, 50).await;
    ctx.chain.set(participant_key(), participant(10));
    ctx.wallet.respond_next(SignResponse::Reject);

    // when
    let handles = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await
        .unwrap();
    let status = handles.purchase.settled().await;
    tokio::task::yield_now().await;

    // then
    assert_eq!(status, TxStatus::Rejected);
    assert!(ctx.timeline.reads_after(|_| true).is_empty());
    let cached = ctx.cache.get(&participant_key()).unwrap();
    assert_eq!(cached.value.as_participant().map(|p| p.shares), Some(0));
    assert!(!cached.is_stale);
}

#[tokio::test]
async fn buy_shares__second_purchase_while_first_pending_is_refused() {
    // given
    let ctx = buying_game(100, 100).await;
    let gate = ctx.receipts.hold_next();
    let first = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await
        .unwrap();

    // when
    let second = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 5,
            prize_address: None,
        })
        .await;

    // then
    assert!(matches!(
        second.err(),
        Some(chain_sync::Error::ConcurrentOperation(_))
    ));
    gate.release();
    assert!(matches!(
        first.purchase.settled().await,
        TxStatus::Confirmed { .. }
    ));
    assert_eq!(ctx.wallet.requests().len(), 1);
}
