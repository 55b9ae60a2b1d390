#![allow(non_snake_case)]

use chain_sync::{
    CacheKey,
    ChannelTrigger,
    ParticipantSnapshot,
    Phase,
    Snapshot,
    SyncDriver,
    TxStatus,
    VoteTally,
    VotingStage,
    classify,
    orchestrator::Operation,
    test_helpers::{
        PLAYER,
        TestContext,
        game_snapshot,
    },
    view::{
        ParticipantStanding,
        VoteEligibility,
    },
};
use game_abi::ContractEvent;

fn participant_key() -> CacheKey {
    CacheKey::Participant {
        game_id: 1,
        account: PLAYER,
    }
}

fn participant(voted: bool, vote: bool) -> Snapshot {
    Snapshot::Participant(ParticipantSnapshot {
        game_id: 1,
        account: PLAYER,
        shares: 10,
        prize_withdrawal_address: PLAYER,
        effective_vote: vote,
        has_voted_in_current_stage: voted,
    })
}

/// Phase and eligibility exactly as a screen would derive them from the cache.
fn eligibility(ctx: &TestContext) -> (Phase, VoteEligibility) {
    let game = ctx.cache.get(&CacheKey::Game(1)).unwrap();
    let game = game.value.as_game().unwrap();
    let active = ctx.cache.get(&CacheKey::ActiveParticipants(1)).unwrap();
    let participant = ctx.cache.get(&participant_key()).unwrap();
    let participant = participant.value.as_participant();
    let phase = classify(game);
    let standing =
        ParticipantStanding::evaluate(phase, participant, active.value.as_addresses().unwrap());
    (
        phase,
        VoteEligibility::evaluate(phase, standing, participant, game, 0),
    )
}

async fn voting_game() -> TestContext {
    let ctx = TestContext::new();
    ctx.set_current_game(1, 4);
    ctx.chain.set(
        CacheKey::ActiveParticipants(1),
        Snapshot::Addresses(vec![PLAYER]),
    );
    ctx.chain.set(participant_key(), participant(false, true));
    ctx.chain
        .set(CacheKey::VoteTally(1), Snapshot::VoteTally(VoteTally::default()));
    ctx.prime([
        CacheKey::CurrentGameId,
        CacheKey::Game(1),
        CacheKey::ActiveParticipants(1),
        participant_key(),
        CacheKey::VoteTally(1),
    ])
    .await;
    ctx
}

#[tokio::test]
async fn submit_vote__confirmed_vote_closes_eligibility() {
    // given
    let ctx = voting_game().await;
    assert_eq!(
        eligibility(&ctx),
        (Phase::Voting(VotingStage::Eight), VoteEligibility::Eligible)
    );
    ctx.chain.set(participant_key(), participant(true, false));

    // when
    let handle = ctx
        .orchestrator
        .execute(Operation::SubmitVote {
            game_id: 1,
            continue_game: false,
        })
        .await
        .unwrap();
    let status = handle.settled().await;
    ctx.cached_at(&participant_key(), 101).await;

    // then
    assert!(matches!(status, TxStatus::Confirmed { block: 101, .. }));
    assert_eq!(eligibility(&ctx).1, VoteEligibility::AlreadyVoted);
    let cached = ctx.cache.get(&participant_key()).unwrap();
    assert_eq!(
        cached.value.as_participant().and_then(|p| p.explicit_vote()),
        Some(false)
    );
}

#[tokio::test]
async fn game_status_event__next_stage_reopens_voting() {
    // given
    let ctx = voting_game().await;
    ctx.chain.set(participant_key(), participant(true, true));
    ctx.orchestrator
        .execute(Operation::SubmitVote {
            game_id: 1,
            continue_game: true,
        })
        .await
        .unwrap()
        .settled()
        .await;
    ctx.cached_at(&participant_key(), 101).await;
    assert_eq!(eligibility(&ctx).1, VoteEligibility::AlreadyVoted);
    ctx.chain
        .set(CacheKey::Game(1), Snapshot::Game(game_snapshot(1, 5)));
    ctx.chain.set(participant_key(), participant(false, true));
    let (trigger, _blocks) = ChannelTrigger::new_with_sender(1);
    let driver = SyncDriver::new(ctx.cache.clone(), trigger);

    // when
    driver
        .apply_events(&[ContractEvent::GameStatusChanged {
            game_id: 1,
            old_status: 4,
            new_status: 5,
        }])
        .await;

    // then
    assert_eq!(
        eligibility(&ctx),
        (Phase::Voting(VotingStage::Four), VoteEligibility::Eligible)
    );
}

#[tokio::test]
async fn eliminated_player__cannot_vote() {
    // given
    let ctx = voting_game().await;
    ctx.chain
        .set(CacheKey::ActiveParticipants(1), Snapshot::Addresses(vec![]));

    // when
    ctx.cache
        .invalidate([CacheKey::ActiveParticipants(1)])
        .await;

    // then
    assert_eq!(
        eligibility(&ctx).1,
        VoteEligibility::NotActiveParticipant
    );
}
