use game_abi::{
    Address,
    GameDetails,
    GameId,
    ParticipantInfo,
    TokenAmount,
    Word,
};

pub type BlockHeight = u64;

/// One game's state as of a block; replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    pub game_id: GameId,
    pub token_cap: TokenAmount,
    pub total_revenue: TokenAmount,
    pub prize_pool: TokenAmount,
    pub platform_fee: TokenAmount,
    pub elimination_random_seed: Word,
    pub start_time: u64,
    pub end_time: u64,
    pub voting_deadline: u64,
    pub phase_code: u8,
}

impl GameSnapshot {
    pub fn from_details(game_id: GameId, details: GameDetails) -> Self {
        Self {
            game_id,
            token_cap: details.token_cap,
            total_revenue: details.total_revenue,
            prize_pool: details.prize_pool,
            platform_fee: details.platform_fee,
            elimination_random_seed: details.elimination_random_seed,
            start_time: details.start_time,
            end_time: details.end_time,
            voting_deadline: details.voting_deadline,
            phase_code: details.status,
        }
    }
}

/// A single account's position in a game.
///
/// The contract exposes one `defaultVote` field that is both the vote a silent
/// participant falls back to and the vote an active one cast. It is kept here as
/// `effective_vote`; [`ParticipantSnapshot::explicit_vote`] only reports it when the
/// participant has actually voted in the current stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSnapshot {
    pub game_id: GameId,
    pub account: Address,
    pub shares: TokenAmount,
    pub prize_withdrawal_address: Address,
    pub effective_vote: bool,
    pub has_voted_in_current_stage: bool,
}

impl ParticipantSnapshot {
    pub fn from_info(game_id: GameId, account: Address, info: ParticipantInfo) -> Self {
        Self {
            game_id,
            account,
            shares: info.shares,
            prize_withdrawal_address: info.prize_withdrawal_address,
            effective_vote: info.default_vote,
            has_voted_in_current_stage: info.has_voted_in_current_stage,
        }
    }

    pub fn is_participant(&self) -> bool {
        self.shares > 0
    }

    pub fn explicit_vote(&self) -> Option<bool> {
        self.has_voted_in_current_stage.then_some(self.effective_vote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
    pub continue_votes: u128,
    pub stop_votes: u128,
}

impl VoteTally {
    pub fn total(&self) -> u128 {
        self.continue_votes.saturating_add(self.stop_votes)
    }
}

/// Balance and allowance are always fetched together: a purchase needs both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBalanceSnapshot {
    pub holder: Address,
    pub spender: Address,
    pub balance: TokenAmount,
    pub allowance: TokenAmount,
}

/// Identity of one cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    CurrentGameId,
    Game(GameId),
    Participant { game_id: GameId, account: Address },
    ParticipantCount(GameId),
    ActiveParticipants(GameId),
    VoteTally(GameId),
    GameWinner(GameId),
    ConsolationPrizePool(GameId),
    FinalPrizePool(GameId),
    TotalPrizePool,
    Owner,
    Operator(Address),
    Paused,
    PlatformFeeWallet,
    TokenPosition { holder: Address, spender: Address },
    TokenDecimals,
}

impl CacheKey {
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            CacheKey::Game(id)
            | CacheKey::Participant { game_id: id, .. }
            | CacheKey::ParticipantCount(id)
            | CacheKey::ActiveParticipants(id)
            | CacheKey::VoteTally(id)
            | CacheKey::GameWinner(id)
            | CacheKey::ConsolationPrizePool(id)
            | CacheKey::FinalPrizePool(id) => Some(*id),
            _ => None,
        }
    }

    /// Account whose private state the key describes, if any.
    pub fn account(&self) -> Option<Address> {
        match self {
            CacheKey::Participant { account, .. } => Some(*account),
            CacheKey::TokenPosition { holder, .. } => Some(*holder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    GameId(GameId),
    Game(GameSnapshot),
    Participant(ParticipantSnapshot),
    Count(u128),
    Addresses(Vec<Address>),
    VoteTally(VoteTally),
    Address(Address),
    Amount(TokenAmount),
    Flag(bool),
    TokenPosition(TokenBalanceSnapshot),
    Decimals(u8),
}

impl Snapshot {
    pub fn as_game_id(&self) -> Option<GameId> {
        match self {
            Snapshot::GameId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_game(&self) -> Option<&GameSnapshot> {
        match self {
            Snapshot::Game(game) => Some(game),
            _ => None,
        }
    }

    pub fn as_participant(&self) -> Option<&ParticipantSnapshot> {
        match self {
            Snapshot::Participant(participant) => Some(participant),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u128> {
        match self {
            Snapshot::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn as_addresses(&self) -> Option<&[Address]> {
        match self {
            Snapshot::Addresses(addresses) => Some(addresses),
            _ => None,
        }
    }

    pub fn as_vote_tally(&self) -> Option<VoteTally> {
        match self {
            Snapshot::VoteTally(tally) => Some(*tally),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Snapshot::Address(address) => Some(*address),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<TokenAmount> {
        match self {
            Snapshot::Amount(amount) => Some(*amount),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Snapshot::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_token_position(&self) -> Option<&TokenBalanceSnapshot> {
        match self {
            Snapshot::TokenPosition(position) => Some(position),
            _ => None,
        }
    }

    pub fn as_decimals(&self) -> Option<u8> {
        match self {
            Snapshot::Decimals(decimals) => Some(*decimals),
            _ => None,
        }
    }
}
