#![allow(non_snake_case)]

use super::*;
use crate::{
    snapshot::Snapshot,
    test_helpers::{
        GAME_CONTRACT,
        PLAYER,
        SignResponse,
        TestContext,
        TimelineEvent,
        FakeWallet,
    },
};

fn vote(game_id: GameId) -> Operation {
    Operation::SubmitVote {
        game_id,
        continue_game: true,
    }
}

async fn wait_until_submitted(handle: &TransactionHandle) {
    handle
        .subscribe()
        .wait_for(|status| matches!(status, TxStatus::Submitted { .. }))
        .await
        .unwrap();
}

#[tokio::test]
async fn execute__wrong_network_is_refused_before_signing() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 100);
    ctx.wallet.switch_chain(1);

    // when
    let result = ctx
        .orchestrator
        .execute(Operation::BuyShares {
            amount: 10,
            prize_address: None,
        })
        .await;

    // then
    assert_eq!(
        result.err(),
        Some(Error::WrongNetwork {
            expected: 421_614,
            actual: 1,
        })
    );
    assert!(ctx.wallet.requests().is_empty());
    assert!(ctx.chain.reads().is_empty());
}

#[tokio::test]
async fn execute__without_wallet_is_not_connected() {
    let ctx = TestContext::new();
    ctx.wallet.disconnect();

    let result = ctx.orchestrator.execute(vote(1)).await;

    assert_eq!(result.err(), Some(Error::NotConnected));
}

#[tokio::test]
async fn execute__confirmed_vote_invalidates_declared_keys() {
    // given
    let ctx = TestContext::new();
    let participant = CacheKey::Participant {
        game_id: 1,
        account: PLAYER,
    };
    ctx.chain.set(participant.clone(), Snapshot::Count(0));
    ctx.chain.set(CacheKey::VoteTally(1), Snapshot::Count(0));

    // when
    let handle = ctx.orchestrator.execute(vote(1)).await.unwrap();
    let status = handle.settled().await;

    // then
    assert_eq!(
        status,
        TxStatus::Confirmed {
            hash: FakeWallet::hash_of(1),
            block: 101,
        }
    );
    assert_eq!(
        ctx.chain.reads(),
        vec![(participant.clone(), 101), (CacheKey::VoteTally(1), 101)]
    );
    assert_eq!(handle.record().related_keys, vec![participant, CacheKey::VoteTally(1)]);
    assert_eq!(
        ctx.wallet.requests()[0].call,
        WriteCall::SubmitVote {
            game_id: 1,
            decision: true,
        }
    );
    assert_eq!(ctx.wallet.requests()[0].to, GAME_CONTRACT);
}

#[tokio::test]
async fn execute__same_intent_in_flight_is_rejected() {
    // given
    let ctx = TestContext::new();
    let gate = ctx.receipts.hold_next();
    let first = ctx.orchestrator.execute(vote(1)).await.unwrap();
    wait_until_submitted(&first).await;

    // when
    let duplicate = ctx.orchestrator.execute(vote(1)).await;
    let other_game = ctx.orchestrator.execute(vote(2)).await;

    // then
    assert!(matches!(duplicate, Err(Error::ConcurrentOperation(_))));
    assert!(other_game.is_ok());
    gate.release();
    assert!(matches!(first.settled().await, TxStatus::Confirmed { .. }));
    assert!(ctx.orchestrator.execute(vote(1)).await.is_ok());
}

#[tokio::test]
async fn execute__rejected_signature_invalidates_nothing() {
    // given
    let ctx = TestContext::new();
    ctx.wallet.respond_next(SignResponse::Reject);

    // when
    let handle = ctx.orchestrator.execute(vote(1)).await.unwrap();
    let status = handle.settled().await;
    tokio::task::yield_now().await;

    // then
    assert_eq!(status, TxStatus::Rejected);
    assert_eq!(status.into_result(), Err(Error::UserRejected));
    assert!(ctx.chain.reads().is_empty());
    assert!(ctx.receipts.waits().is_empty());
}

#[tokio::test]
async fn execute__reverted_transaction_fails_without_invalidation() {
    // given
    let ctx = TestContext::new();
    ctx.receipts.revert_next();

    // when
    let handle = ctx.orchestrator.execute(Operation::PauseGame).await.unwrap();
    let status = handle.settled().await;
    tokio::task::yield_now().await;

    // then
    let hash = FakeWallet::hash_of(1);
    assert_eq!(
        status,
        TxStatus::Failed {
            hash: Some(hash),
            reason: FailureReason::Reverted,
        }
    );
    assert_eq!(status.into_result(), Err(Error::Reverted { hash }));
    assert!(ctx.chain.reads().is_empty());
}

#[tokio::test]
async fn execute__direct_purchase_requires_allowance() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 5);

    // when
    let result = ctx
        .orchestrator
        .execute(Operation::BuyShares {
            amount: 10,
            prize_address: None,
        })
        .await;

    // then
    assert_eq!(
        result.err(),
        Some(Error::InsufficientAllowance {
            required: 10,
            approved: 5,
        })
    );
    assert!(ctx.wallet.requests().is_empty());
}

#[tokio::test]
async fn cancel_wait__fails_locally_and_releases_intent() {
    // given
    let ctx = TestContext::new();
    ctx.receipts.never_settle_next();
    let handle = ctx.orchestrator.execute(vote(1)).await.unwrap();
    wait_until_submitted(&handle).await;

    // when
    handle.cancel_wait();
    let status = handle.settled().await;

    // then
    assert_eq!(
        status,
        TxStatus::Failed {
            hash: Some(FakeWallet::hash_of(1)),
            reason: FailureReason::WaitCancelled,
        }
    );
    assert!(ctx.chain.reads().is_empty());
    assert!(ctx.orchestrator.execute(vote(1)).await.is_ok());
}

#[tokio::test]
async fn execute__missing_receipt_times_out() {
    // given
    let ctx = TestContext::with_config(OrchestratorConfig {
        confirmation_timeout: Duration::from_millis(20),
        ..TestContext::default_config()
    });
    ctx.receipts.never_settle_next();

    // when
    let handle = ctx.orchestrator.execute(Operation::UnpauseGame).await.unwrap();
    let status = handle.settled().await;

    // then
    assert!(matches!(
        status,
        TxStatus::Failed {
            reason: FailureReason::TimedOut,
            ..
        }
    ));
}

#[tokio::test]
async fn buy_shares__approves_then_buys_then_invalidates_in_order() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 0);
    ctx.set_current_game(1, 0);
    ctx.chain.set(
        CacheKey::Participant {
            game_id: 1,
            account: PLAYER,
        },
        Snapshot::Count(0),
    );
    ctx.chain.set(CacheKey::ParticipantCount(1), Snapshot::Count(0));
    ctx.chain.set(CacheKey::ActiveParticipants(1), Snapshot::Addresses(vec![]));
    ctx.chain.set(CacheKey::TotalPrizePool, Snapshot::Amount(0));
    ctx.prime([ctx.position_key(), CacheKey::CurrentGameId]).await;

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
    assert!(matches!(status, TxStatus::Confirmed { .. }));
    let approve_hash = FakeWallet::hash_of(1);
    let buy_hash = FakeWallet::hash_of(2);
    let events = ctx.timeline.events();
    let position = |wanted: &TimelineEvent| events.iter().position(|e| e == wanted).unwrap();
    let approve_requested = position(&TimelineEvent::SignatureRequested {
        call: WriteCall::Approve {
            spender: GAME_CONTRACT,
            amount: 10,
        },
    });
    let approve_mined = position(&TimelineEvent::Mined {
        hash: approve_hash,
        succeeded: true,
    });
    let buy_requested = position(&TimelineEvent::SignatureRequested {
        call: WriteCall::BuyShares {
            amount: 10,
            prize_address: Address::ZERO,
        },
    });
    assert!(approve_requested < approve_mined);
    assert!(approve_mined < buy_requested);

    let after_buy = ctx.timeline.reads_after(|e| {
        *e == TimelineEvent::Mined {
            hash: buy_hash,
            succeeded: true,
        }
    });
    assert_eq!(
        after_buy,
        vec![
            ctx.position_key(),
            CacheKey::Participant {
                game_id: 1,
                account: PLAYER,
            },
            CacheKey::Game(1),
            CacheKey::ParticipantCount(1),
            CacheKey::ActiveParticipants(1),
            CacheKey::TotalPrizePool,
        ]
    );
    assert_eq!(
        handles.approval.map(|h| h.status()),
        Some(TxStatus::Confirmed {
            hash: approve_hash,
            block: 101,
        })
    );
}

#[tokio::test]
async fn buy_shares__skips_approval_when_allowance_covers_cost() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 50);
    ctx.prime([ctx.position_key()]).await;

    // when
    let handles = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await
        .unwrap();
    handles.purchase.settled().await;

    // then
    assert!(handles.approval.is_none());
    let calls: Vec<WriteCall> = ctx.wallet.requests().into_iter().map(|r| r.call).collect();
    assert_eq!(
        calls,
        vec![WriteCall::BuyShares {
            amount: 10,
            prize_address: Address::ZERO,
        }]
    );
}

#[tokio::test]
async fn buy_shares__purchase_waits_for_approval_confirmation() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 0);
    let gate = ctx.receipts.hold_next();
    let orchestrator = ctx.orchestrator.clone();
    let flow = tokio::spawn(async move {
        orchestrator
            .buy_shares(PurchaseRequest {
                shares: 10,
                prize_address: None,
            })
            .await
    });

    // when
    while ctx.receipts.waits().is_empty() {
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let requests_while_pending = ctx.wallet.requests().len();
    gate.release();
    let handles = flow.await.unwrap().unwrap();
    handles.purchase.settled().await;

    // then
    assert_eq!(requests_while_pending, 1);
    assert_eq!(ctx.wallet.requests().len(), 2);
}

#[tokio::test]
async fn buy_shares__rejected_approval_stops_the_flow() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 0);
    ctx.wallet.respond_next(SignResponse::Reject);

    // when
    let result = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await;

    // then
    assert_eq!(result.err().map(|e| e.to_string()), Some(Error::UserRejected.to_string()));
    assert_eq!(ctx.wallet.requests().len(), 1);
}

#[tokio::test]
async fn start_purchase__chain_switch_during_approval_blocks_purchase() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 0);
    let gate = ctx.receipts.hold_next();
    let flow = ctx
        .orchestrator
        .start_purchase(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await
        .unwrap();
    wait_until_submitted(flow.approval().unwrap()).await;

    // when
    ctx.wallet.switch_chain(1);
    gate.release();
    let result = flow.complete().await;

    // then
    assert_eq!(
        result.err().map(|e| e.to_string()),
        Some(
            Error::WrongNetwork {
                expected: 421_614,
                actual: 1,
            }
            .to_string()
        )
    );
    assert_eq!(ctx.wallet.requests().len(), 1);
    assert!(ctx.wallet.refreshes() >= 3);
}

#[tokio::test]
async fn start_purchase__approval_wait_can_be_cancelled_before_purchase() {
    // given
    let ctx = TestContext::new();
    ctx.set_token_position(100, 0);
    ctx.receipts.never_settle_next();
    let flow = ctx
        .orchestrator
        .start_purchase(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await
        .unwrap();
    let approval = flow.approval().cloned().unwrap();
    wait_until_submitted(&approval).await;

    // when
    approval.cancel_wait();
    let result = flow.complete().await;

    // then
    assert_eq!(
        result.err().map(|e| e.to_string()),
        Some(
            Error::WaitCancelled {
                hash: FakeWallet::hash_of(1),
            }
            .to_string()
        )
    );
    assert_eq!(ctx.wallet.requests().len(), 1);
    let retry = ctx
        .orchestrator
        .start_purchase(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn buy_shares__insufficient_balance_never_prompts() {
    let ctx = TestContext::new();
    ctx.set_token_position(5, 0);

    let result = ctx
        .orchestrator
        .buy_shares(PurchaseRequest {
            shares: 10,
            prize_address: None,
        })
        .await;

    assert_eq!(
        result.err().map(|e| e.to_string()),
        Some(
            Error::InsufficientBalance {
                required: 10,
                available: 5,
            }
            .to_string()
        )
    );
    assert!(ctx.wallet.requests().is_empty());
}

#[test]
fn plan_purchase__approves_exact_cost_only_when_needed() {
    // given
    let position = TokenBalanceSnapshot {
        holder: PLAYER,
        spender: GAME_CONTRACT,
        balance: 100,
        allowance: 0,
    };
    let request = PurchaseRequest {
        shares: 3,
        prize_address: Some(Address([9; 20])),
    };

    // when
    let plan = plan_purchase(&position, &request, 2).unwrap();

    // then
    assert_eq!(plan.cost, 6);
    assert_eq!(plan.approval, Some(Operation::Approve { amount: 6 }));
    assert_eq!(
        plan.purchase,
        Operation::BuyShares {
            amount: 6,
            prize_address: Some(Address([9; 20])),
        }
    );
}
