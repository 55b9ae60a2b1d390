//! Plain-text rendering of a game and the caller's place in it.

use chain_sync::{
    GameSnapshot,
    ParticipantSnapshot,
    Phase,
    TokenBalanceSnapshot,
    VoteTally,
    classify,
    units::format_units,
    view::{
        ParticipantStanding,
        VoteEligibility,
        VoteSplit,
        format_countdown,
        sale_progress_percent,
        voting_time_left,
    },
};
use game_abi::{
    Address,
    TokenAmount,
};

const SHOWN_DIGITS: u8 = 2;

#[derive(Debug, Clone)]
pub struct AccountView {
    pub account: Address,
    pub participant: Option<ParticipantSnapshot>,
    pub position: TokenBalanceSnapshot,
}

/// Everything `status` prints, assembled from cached snapshots.
#[derive(Debug, Clone)]
pub struct GameView {
    pub game: GameSnapshot,
    pub participant_count: u128,
    pub active: Vec<Address>,
    pub tally: VoteTally,
    pub total_prize_pool: TokenAmount,
    pub paused: bool,
    pub decimals: u8,
    pub symbol: String,
    pub account: Option<AccountView>,
}

impl GameView {
    pub fn phase(&self) -> Phase {
        classify(&self.game)
    }

    pub fn standing(&self) -> ParticipantStanding {
        let participant = self.account.as_ref().and_then(|a| a.participant.as_ref());
        ParticipantStanding::evaluate(self.phase(), participant, &self.active)
    }

    pub fn eligibility(&self, now: u64) -> VoteEligibility {
        let participant = self.account.as_ref().and_then(|a| a.participant.as_ref());
        VoteEligibility::evaluate(self.phase(), self.standing(), participant, &self.game, now)
    }

    fn amount(&self, value: TokenAmount) -> String {
        format!(
            "{} {}",
            format_units(value, self.decimals, SHOWN_DIGITS),
            self.symbol
        )
    }
}

fn eligibility_label(eligibility: VoteEligibility) -> &'static str {
    match eligibility {
        VoteEligibility::Eligible => "you can vote",
        VoteEligibility::NotVotingPhase => "no vote is open",
        VoteEligibility::NotActiveParticipant => "only active participants vote",
        VoteEligibility::AlreadyVoted => "already voted this stage",
        VoteEligibility::DeadlinePassed => "voting deadline passed",
    }
}

pub fn render_status(view: &GameView, now: u64) -> Vec<String> {
    let phase = view.phase();
    let mut lines = vec![format!("Game #{} | {phase}", view.game.game_id)];
    if view.paused {
        lines.push("Contract is paused".to_string());
    }
    lines.push(format!(
        "Sale: {}% of cap ({} / {})",
        sale_progress_percent(&view.game),
        view.amount(view.game.total_revenue),
        view.amount(view.game.token_cap)
    ));
    lines.push(format!("Prize pool: {}", view.amount(view.total_prize_pool)));
    if phase.is_pre_selection() {
        lines.push(format!("Participants: {}", view.participant_count));
    } else {
        lines.push(format!(
            "Participants: {} ({} still in)",
            view.participant_count,
            view.active.len()
        ));
    }
    if phase.facets().is_voting {
        let split = VoteSplit::from_tally(&view.tally);
        lines.push(format!(
            "Votes: continue {}.{:02}% / stop {}.{:02}%",
            split.continue_bps / 100,
            split.continue_bps % 100,
            split.stop_bps / 100,
            split.stop_bps % 100
        ));
        lines.push(format!(
            "Voting closes in {}",
            format_countdown(voting_time_left(&view.game, now))
        ));
    }

    if let Some(account) = &view.account {
        lines.push(format!(
            "Account {}: balance {}, approved {}",
            account.account.short(),
            view.amount(account.position.balance),
            view.amount(account.position.allowance)
        ));
        let standing = match view.standing() {
            ParticipantStanding::NotParticipant => "not participating",
            ParticipantStanding::Participant => "participating",
            ParticipantStanding::Active => "still in",
            ParticipantStanding::Eliminated => "eliminated",
        };
        lines.push(format!("Standing: {standing}"));
        if phase.facets().is_voting {
            let vote = account
                .participant
                .as_ref()
                .and_then(ParticipantSnapshot::explicit_vote)
                .map(|continue_game| if continue_game { "continue" } else { "stop" });
            match vote {
                Some(choice) => lines.push(format!("Your vote: {choice}")),
                None => lines.push(format!("Vote: {}", eligibility_label(view.eligibility(now)))),
            }
        }
    }
    lines
}
