//! Client-side view of where a game is in its lifecycle.

use crate::snapshot::GameSnapshot;
use std::fmt;

/// How many participants remain in a voting round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VotingStage {
    Eight,
    Four,
    Two,
}

impl VotingStage {
    pub fn size(self) -> u8 {
        match self {
            VotingStage::Eight => 8,
            VotingStage::Four => 4,
            VotingStage::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Buying,
    CapReached,
    AwaitingRandomness,
    Eliminating,
    Voting(VotingStage),
    Finished,
    /// A status code this client does not know; usually a newer contract.
    Unknown(u8),
}

impl Phase {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Phase::Buying,
            1 => Phase::CapReached,
            2 => Phase::AwaitingRandomness,
            3 => Phase::Eliminating,
            4 => Phase::Voting(VotingStage::Eight),
            5 => Phase::Voting(VotingStage::Four),
            6 => Phase::Voting(VotingStage::Two),
            7 => Phase::Finished,
            other => Phase::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Phase::Buying => 0,
            Phase::CapReached => 1,
            Phase::AwaitingRandomness => 2,
            Phase::Eliminating => 3,
            Phase::Voting(VotingStage::Eight) => 4,
            Phase::Voting(VotingStage::Four) => 5,
            Phase::Voting(VotingStage::Two) => 6,
            Phase::Finished => 7,
            Phase::Unknown(code) => code,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Buying => "Buying",
            Phase::CapReached => "Cap Reached",
            Phase::AwaitingRandomness => "Awaiting Randomness",
            Phase::Eliminating => "Eliminating",
            Phase::Voting(VotingStage::Eight) => "Voting (8 left)",
            Phase::Voting(VotingStage::Four) => "Voting (4 left)",
            Phase::Voting(VotingStage::Two) => "Voting (2 left)",
            Phase::Finished => "Finished",
            Phase::Unknown(_) => "Unknown",
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Phase::Unknown(_))
    }

    /// Phases before participants are selected for elimination.
    pub fn is_pre_selection(self) -> bool {
        matches!(
            self,
            Phase::Buying | Phase::CapReached | Phase::AwaitingRandomness
        )
    }

    pub fn facets(self) -> PhaseFacets {
        PhaseFacets {
            is_buying: self == Phase::Buying,
            is_cap_reached: self == Phase::CapReached,
            is_voting: matches!(self, Phase::Voting(_)),
            is_eliminating: matches!(self, Phase::AwaitingRandomness | Phase::Eliminating),
            is_finished: self == Phase::Finished,
            voting_stage_size: match self {
                Phase::Voting(stage) => stage.size(),
                _ => 0,
            },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Unknown(code) => write!(f, "Unknown ({code})"),
            known => f.write_str(known.label()),
        }
    }
}

/// Boolean view of a phase used to enable or disable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseFacets {
    pub is_buying: bool,
    pub is_cap_reached: bool,
    pub is_voting: bool,
    pub is_eliminating: bool,
    pub is_finished: bool,
    /// 0 when not voting.
    pub voting_stage_size: u8,
}

pub fn classify(snapshot: &GameSnapshot) -> Phase {
    Phase::from_code(snapshot.phase_code)
}
