use crate::{
    snapshot::CacheKey,
    view::AccessLevel,
};
use game_abi::{
    Address,
    GameId,
    TokenAmount,
    WriteCall,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Approve,
    BuyShares,
    SubmitVote,
    AdminAction,
}

/// A write the client knows how to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Lets the game contract spend `amount` of the payment token.
    Approve {
        amount: TokenAmount,
    },
    BuyShares {
        amount: TokenAmount,
        prize_address: Option<Address>,
    },
    SubmitVote {
        game_id: GameId,
        continue_game: bool,
    },
    RequestRandomness {
        game_id: GameId,
    },
    ProcessVotingResults {
        game_id: GameId,
    },
    DistributeConsolationPrizes {
        game_id: GameId,
        winners: Vec<Address>,
        amounts: Vec<TokenAmount>,
        batch_size: u64,
    },
    DistributeFinalPrize {
        game_id: GameId,
    },
    SetOperator {
        operator: Address,
        authorized: bool,
    },
    PauseGame,
    UnpauseGame,
    SetPlatformFeeWallet {
        wallet: Address,
    },
}

impl Operation {
    pub fn kind(&self) -> TxKind {
        match self {
            Operation::Approve { .. } => TxKind::Approve,
            Operation::BuyShares { .. } => TxKind::BuyShares,
            Operation::SubmitVote { .. } => TxKind::SubmitVote,
            _ => TxKind::AdminAction,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Approve { .. } => "approve",
            Operation::BuyShares { .. } => "buyShares",
            Operation::SubmitVote { .. } => "submitVote",
            Operation::RequestRandomness { .. } => "requestRandomWords",
            Operation::ProcessVotingResults { .. } => "processVotingResults",
            Operation::DistributeConsolationPrizes { .. } => "distributeConsolationPrizes",
            Operation::DistributeFinalPrize { .. } => "distributeFinalPrize",
            Operation::SetOperator { .. } => "setOperator",
            Operation::PauseGame => "pauseGame",
            Operation::UnpauseGame => "unpauseGame",
            Operation::SetPlatformFeeWallet { .. } => "setPlatformFeeWallet",
        }
    }

    fn game_id(&self) -> Option<GameId> {
        match self {
            Operation::SubmitVote { game_id, .. }
            | Operation::RequestRandomness { game_id }
            | Operation::ProcessVotingResults { game_id }
            | Operation::DistributeConsolationPrizes { game_id, .. }
            | Operation::DistributeFinalPrize { game_id } => Some(*game_id),
            _ => None,
        }
    }

    /// The logical action this write stands for, for `account`.
    pub fn intent(&self, account: Address) -> Intent {
        Intent {
            account,
            action: self.name(),
            game_id: self.game_id(),
        }
    }

    pub fn required_access(&self) -> AccessLevel {
        match self {
            Operation::Approve { .. }
            | Operation::BuyShares { .. }
            | Operation::SubmitVote { .. } => AccessLevel::None,
            Operation::RequestRandomness { .. }
            | Operation::ProcessVotingResults { .. }
            | Operation::DistributeConsolationPrizes { .. }
            | Operation::DistributeFinalPrize { .. } => AccessLevel::Operator,
            Operation::SetOperator { .. }
            | Operation::PauseGame
            | Operation::UnpauseGame
            | Operation::SetPlatformFeeWallet { .. } => AccessLevel::Owner,
        }
    }

    /// Contract call; approvals name the game contract as spender.
    pub fn call(&self, game_contract: Address) -> WriteCall {
        match self {
            Operation::Approve { amount } => WriteCall::Approve {
                spender: game_contract,
                amount: *amount,
            },
            Operation::BuyShares {
                amount,
                prize_address,
            } => WriteCall::BuyShares {
                amount: *amount,
                prize_address: prize_address.unwrap_or(Address::ZERO),
            },
            Operation::SubmitVote {
                game_id,
                continue_game,
            } => WriteCall::SubmitVote {
                game_id: *game_id,
                decision: *continue_game,
            },
            Operation::RequestRandomness { game_id } => {
                WriteCall::RequestRandomWords { game_id: *game_id }
            }
            Operation::ProcessVotingResults { game_id } => {
                WriteCall::ProcessVotingResults { game_id: *game_id }
            }
            Operation::DistributeConsolationPrizes {
                winners,
                amounts,
                batch_size,
                ..
            } => WriteCall::DistributeConsolationPrizes {
                winners: winners.clone(),
                amounts: amounts.clone(),
                batch_size: *batch_size,
            },
            Operation::DistributeFinalPrize { game_id } => {
                WriteCall::DistributeFinalPrize { game_id: *game_id }
            }
            Operation::SetOperator {
                operator,
                authorized,
            } => WriteCall::SetOperator {
                operator: *operator,
                authorized: *authorized,
            },
            Operation::PauseGame => WriteCall::PauseGame,
            Operation::UnpauseGame => WriteCall::UnpauseGame,
            Operation::SetPlatformFeeWallet { wallet } => {
                WriteCall::SetPlatformFeeWallet { wallet: *wallet }
            }
        }
    }

    /// Cache keys to refresh, in order, once this write is confirmed.
    ///
    /// Purchases go into the current game, which the caller passes in when known.
    pub fn invalidation_keys(
        &self,
        account: Address,
        game_contract: Address,
        current_game: Option<GameId>,
    ) -> Vec<CacheKey> {
        let position = CacheKey::TokenPosition {
            holder: account,
            spender: game_contract,
        };
        match self {
            Operation::Approve { .. } => vec![position],
            Operation::BuyShares { .. } => {
                let mut keys = vec![position];
                match current_game {
                    Some(game_id) => keys.extend([
                        CacheKey::Participant { game_id, account },
                        CacheKey::Game(game_id),
                        CacheKey::ParticipantCount(game_id),
                        CacheKey::ActiveParticipants(game_id),
                    ]),
                    None => keys.push(CacheKey::CurrentGameId),
                }
                keys.push(CacheKey::TotalPrizePool);
                keys
            }
            Operation::SubmitVote { game_id, .. } => vec![
                CacheKey::Participant {
                    game_id: *game_id,
                    account,
                },
                CacheKey::VoteTally(*game_id),
            ],
            Operation::RequestRandomness { game_id } => vec![CacheKey::Game(*game_id)],
            Operation::ProcessVotingResults { game_id } => vec![
                CacheKey::Game(*game_id),
                CacheKey::ActiveParticipants(*game_id),
                CacheKey::VoteTally(*game_id),
            ],
            Operation::DistributeConsolationPrizes { game_id, .. } => vec![
                CacheKey::ConsolationPrizePool(*game_id),
                CacheKey::TotalPrizePool,
            ],
            Operation::DistributeFinalPrize { game_id } => vec![
                CacheKey::Game(*game_id),
                CacheKey::GameWinner(*game_id),
                CacheKey::FinalPrizePool(*game_id),
                CacheKey::TotalPrizePool,
                CacheKey::CurrentGameId,
            ],
            Operation::SetOperator { operator, .. } => vec![CacheKey::Operator(*operator)],
            Operation::PauseGame | Operation::UnpauseGame => vec![CacheKey::Paused],
            Operation::SetPlatformFeeWallet { .. } => vec![CacheKey::PlatformFeeWallet],
        }
    }
}

/// A logical action by one account; at most one attempt per intent is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Intent {
    pub account: Address,
    pub action: &'static str,
    pub game_id: Option<GameId>,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.action, self.account.short())?;
        if let Some(game_id) = self.game_id {
            write!(f, " in game {game_id}")?;
        }
        Ok(())
    }
}
