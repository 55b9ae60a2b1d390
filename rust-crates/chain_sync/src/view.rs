//! Values derived from snapshots for display and action gating.

use crate::{
    phase::Phase,
    snapshot::{
        GameSnapshot,
        ParticipantSnapshot,
        VoteTally,
    },
};
use game_abi::Address;

/// Seconds since the unix epoch, as used by contract deadlines.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Share sale progress in whole percent of the token cap.
pub fn sale_progress_percent(game: &GameSnapshot) -> u128 {
    if game.token_cap == 0 {
        return 0;
    }
    game.total_revenue.saturating_mul(100) / game.token_cap
}

pub fn voting_time_left(game: &GameSnapshot, now: u64) -> u64 {
    game.voting_deadline.saturating_sub(now)
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Vote shares in basis points; an empty tally is shown as an even split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteSplit {
    pub continue_bps: u16,
    pub stop_bps: u16,
}

impl VoteSplit {
    pub fn from_tally(tally: &VoteTally) -> Self {
        let total = tally.total();
        if total == 0 {
            return Self {
                continue_bps: 5_000,
                stop_bps: 5_000,
            };
        }
        let continue_bps = (tally.continue_votes.saturating_mul(10_000) / total) as u16;
        Self {
            continue_bps,
            stop_bps: 10_000 - continue_bps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStanding {
    NotParticipant,
    /// Holds shares; selection has not happened yet.
    Participant,
    Active,
    Eliminated,
}

impl ParticipantStanding {
    pub fn evaluate(
        phase: Phase,
        participant: Option<&ParticipantSnapshot>,
        active: &[Address],
    ) -> Self {
        let Some(participant) = participant.filter(|p| p.is_participant()) else {
            return ParticipantStanding::NotParticipant;
        };
        if phase.is_pre_selection() || !phase.is_known() {
            ParticipantStanding::Participant
        } else if active.contains(&participant.account) {
            ParticipantStanding::Active
        } else {
            ParticipantStanding::Eliminated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteEligibility {
    Eligible,
    NotVotingPhase,
    NotActiveParticipant,
    AlreadyVoted,
    DeadlinePassed,
}

impl VoteEligibility {
    pub fn evaluate(
        phase: Phase,
        standing: ParticipantStanding,
        participant: Option<&ParticipantSnapshot>,
        game: &GameSnapshot,
        now: u64,
    ) -> Self {
        if !phase.facets().is_voting {
            return VoteEligibility::NotVotingPhase;
        }
        if standing != ParticipantStanding::Active {
            return VoteEligibility::NotActiveParticipant;
        }
        if participant.is_some_and(|p| p.has_voted_in_current_stage) {
            return VoteEligibility::AlreadyVoted;
        }
        if game.voting_deadline != 0 && now > game.voting_deadline {
            return VoteEligibility::DeadlinePassed;
        }
        VoteEligibility::Eligible
    }

    pub fn is_eligible(self) -> bool {
        self == VoteEligibility::Eligible
    }
}

/// Role of an account with respect to the game contract. Ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    Operator,
    Owner,
}

impl AccessLevel {
    pub fn evaluate(account: Address, owner: Address, is_operator: bool) -> Self {
        if account == owner {
            AccessLevel::Owner
        } else if is_operator {
            AccessLevel::Operator
        } else {
            AccessLevel::None
        }
    }

    /// The owner may also perform operator actions.
    pub fn permits(self, required: AccessLevel) -> bool {
        self >= required
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::phase::VotingStage;
    use game_abi::Word;

    const ME: Address = Address([0xaa; 20]);

    fn game(revenue: u128, cap: u128, deadline: u64) -> GameSnapshot {
        GameSnapshot {
            game_id: 1,
            token_cap: cap,
            total_revenue: revenue,
            prize_pool: 0,
            platform_fee: 0,
            elimination_random_seed: Word::default(),
            start_time: 0,
            end_time: 0,
            voting_deadline: deadline,
            phase_code: 0,
        }
    }

    fn me(shares: u128, voted: bool) -> ParticipantSnapshot {
        ParticipantSnapshot {
            game_id: 1,
            account: ME,
            shares,
            prize_withdrawal_address: Address::ZERO,
            effective_vote: true,
            has_voted_in_current_stage: voted,
        }
    }

    #[test]
    fn sale_progress_percent__uses_integer_division_and_handles_zero_cap() {
        assert_eq!(sale_progress_percent(&game(250, 1_000, 0)), 25);
        assert_eq!(sale_progress_percent(&game(999, 1_000, 0)), 99);
        assert_eq!(sale_progress_percent(&game(5, 0, 0)), 0);
    }

    #[test]
    fn format_countdown__pads_components() {
        assert_eq!(format_countdown(0), "00:00:00");
        assert_eq!(format_countdown(3_725), "01:02:05");
        assert_eq!(format_countdown(90_000), "25:00:00");
        assert_eq!(voting_time_left(&game(0, 0, 100), 150), 0);
    }

    #[test]
    fn vote_split__defaults_to_even_split_without_votes() {
        let empty = VoteSplit::from_tally(&VoteTally::default());
        let lopsided = VoteSplit::from_tally(&VoteTally {
            continue_votes: 1,
            stop_votes: 2,
        });

        assert_eq!(empty.continue_bps, 5_000);
        assert_eq!(lopsided.continue_bps, 3_333);
        assert_eq!(lopsided.stop_bps, 6_667);
    }

    #[test]
    fn participant_standing__depends_on_phase_and_active_set() {
        let holder = me(3, false);
        let voting = Phase::Voting(VotingStage::Eight);

        assert_eq!(
            ParticipantStanding::evaluate(Phase::Buying, Some(&holder), &[]),
            ParticipantStanding::Participant
        );
        assert_eq!(
            ParticipantStanding::evaluate(voting, Some(&holder), &[ME]),
            ParticipantStanding::Active
        );
        assert_eq!(
            ParticipantStanding::evaluate(voting, Some(&holder), &[Address::ZERO]),
            ParticipantStanding::Eliminated
        );
        assert_eq!(
            ParticipantStanding::evaluate(voting, Some(&me(0, false)), &[ME]),
            ParticipantStanding::NotParticipant
        );
    }

    #[test]
    fn vote_eligibility__checks_phase_standing_vote_and_deadline_in_order() {
        // given
        let voting = Phase::Voting(VotingStage::Two);
        let open = game(0, 0, 1_000);

        // then
        assert_eq!(
            VoteEligibility::evaluate(Phase::Buying, ParticipantStanding::Active, None, &open, 0),
            VoteEligibility::NotVotingPhase
        );
        assert_eq!(
            VoteEligibility::evaluate(voting, ParticipantStanding::Eliminated, None, &open, 0),
            VoteEligibility::NotActiveParticipant
        );
        assert_eq!(
            VoteEligibility::evaluate(
                voting,
                ParticipantStanding::Active,
                Some(&me(1, true)),
                &open,
                0
            ),
            VoteEligibility::AlreadyVoted
        );
        assert_eq!(
            VoteEligibility::evaluate(
                voting,
                ParticipantStanding::Active,
                Some(&me(1, false)),
                &open,
                1_001
            ),
            VoteEligibility::DeadlinePassed
        );
        assert!(
            VoteEligibility::evaluate(
                voting,
                ParticipantStanding::Active,
                Some(&me(1, false)),
                &open,
                999
            )
            .is_eligible()
        );
    }

    #[test]
    fn access_level__owner_permits_operator_actions() {
        let owner = AccessLevel::evaluate(ME, ME, false);
        let operator = AccessLevel::evaluate(ME, Address::ZERO, true);

        assert_eq!(owner, AccessLevel::Owner);
        assert!(owner.permits(AccessLevel::Operator));
        assert!(operator.permits(AccessLevel::Operator));
        assert!(!operator.permits(AccessLevel::Owner));
        assert!(AccessLevel::None.permits(AccessLevel::None));
    }
}
