use crate::{
    codec::{
        DecodeError,
        Decoder,
        Token,
        encode_call,
    },
    selector,
    types::{
        Address,
        GameId,
        TokenAmount,
        Word,
    },
};

/// View functions of the game contract and the payment token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadCall {
    CurrentGameId,
    GameDetails { game_id: GameId },
    Participant { game_id: GameId, user: Address },
    ParticipantCount { game_id: GameId },
    ActiveParticipants { game_id: GameId },
    VoteTallies { game_id: GameId },
    ConsolationPrizePool { game_id: GameId },
    FinalPrizePool { game_id: GameId },
    GameWinner { game_id: GameId },
    TotalPrizePoolAllGames,
    PaymentToken,
    PlatformFeeWallet,
    Owner,
    IsOperator { account: Address },
    Paused,
    BalanceOf { holder: Address },
    Allowance { owner: Address, spender: Address },
    Decimals,
    Symbol,
}

impl ReadCall {
    pub fn signature(&self) -> &'static str {
        match self {
            ReadCall::CurrentGameId => "currentGameId()",
            ReadCall::GameDetails { .. } => "getGameDetails(uint256)",
            ReadCall::Participant { .. } => "getParticipant(uint256,address)",
            ReadCall::ParticipantCount { .. } => "getParticipantCount(uint256)",
            ReadCall::ActiveParticipants { .. } => "getActiveParticipants(uint256)",
            ReadCall::VoteTallies { .. } => "getVoteTallies(uint256)",
            ReadCall::ConsolationPrizePool { .. } => "getConsolationPrizePool(uint256)",
            ReadCall::FinalPrizePool { .. } => "getFinalPrizePool(uint256)",
            ReadCall::GameWinner { .. } => "gameWinners(uint256)",
            ReadCall::TotalPrizePoolAllGames => "totalPrizePoolAllGames()",
            ReadCall::PaymentToken => "lusdToken()",
            ReadCall::PlatformFeeWallet => "platformFeeWallet()",
            ReadCall::Owner => "owner()",
            ReadCall::IsOperator { .. } => "isOperator(address)",
            ReadCall::Paused => "paused()",
            ReadCall::BalanceOf { .. } => "balanceOf(address)",
            ReadCall::Allowance { .. } => "allowance(address,address)",
            ReadCall::Decimals => "decimals()",
            ReadCall::Symbol => "symbol()",
        }
    }

    /// Token reads target the payment token; everything else targets the game contract.
    pub fn targets_token(&self) -> bool {
        matches!(
            self,
            ReadCall::BalanceOf { .. }
                | ReadCall::Allowance { .. }
                | ReadCall::Decimals
                | ReadCall::Symbol
        )
    }

    fn args(&self) -> Vec<Token> {
        match self {
            ReadCall::GameDetails { game_id }
            | ReadCall::ParticipantCount { game_id }
            | ReadCall::ActiveParticipants { game_id }
            | ReadCall::VoteTallies { game_id }
            | ReadCall::ConsolationPrizePool { game_id }
            | ReadCall::FinalPrizePool { game_id }
            | ReadCall::GameWinner { game_id } => vec![Token::Uint(u128::from(*game_id))],
            ReadCall::Participant { game_id, user } => {
                vec![Token::Uint(u128::from(*game_id)), Token::Address(*user)]
            }
            ReadCall::IsOperator { account } => vec![Token::Address(*account)],
            ReadCall::BalanceOf { holder } => vec![Token::Address(*holder)],
            ReadCall::Allowance { owner, spender } => {
                vec![Token::Address(*owner), Token::Address(*spender)]
            }
            ReadCall::CurrentGameId
            | ReadCall::TotalPrizePoolAllGames
            | ReadCall::PaymentToken
            | ReadCall::PlatformFeeWallet
            | ReadCall::Owner
            | ReadCall::Paused
            | ReadCall::Decimals
            | ReadCall::Symbol => Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_call(selector(self.signature()), &self.args())
    }
}

/// Tuple returned by `getGameDetails`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameDetails {
    pub token_cap: TokenAmount,
    pub total_revenue: TokenAmount,
    pub prize_pool: TokenAmount,
    pub platform_fee: TokenAmount,
    pub elimination_random_seed: Word,
    pub start_time: u64,
    pub end_time: u64,
    pub voting_deadline: u64,
    pub status: u8,
}

impl GameDetails {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut d = Decoder::new(data);
        Ok(Self {
            token_cap: d.uint128("tokenCap")?,
            total_revenue: d.uint128("totalRevenue")?,
            prize_pool: d.uint128("prizePool")?,
            platform_fee: d.uint128("platformFee")?,
            elimination_random_seed: d.word("eliminationRandomSeed")?,
            start_time: d.uint64("startTime")?,
            end_time: d.uint64("endTime")?,
            voting_deadline: d.uint64("votingDeadline")?,
            status: d.uint8("status")?,
        })
    }
}

/// Tuple returned by `getParticipant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub shares: TokenAmount,
    pub prize_withdrawal_address: Address,
    pub default_vote: bool,
    pub has_voted_in_current_stage: bool,
}

impl ParticipantInfo {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut d = Decoder::new(data);
        Ok(Self {
            shares: d.uint128("shares")?,
            prize_withdrawal_address: d.address("prizeWithdrawalAddress")?,
            default_vote: d.bool("defaultVote")?,
            has_voted_in_current_stage: d.bool("hasVotedInCurrentStage")?,
        })
    }
}

pub fn decode_uint(data: &[u8], field: &'static str) -> Result<u128, DecodeError> {
    Decoder::new(data).uint128(field)
}

pub fn decode_game_id(data: &[u8]) -> Result<GameId, DecodeError> {
    Decoder::new(data).uint64("currentGameId")
}

pub fn decode_bool(data: &[u8], field: &'static str) -> Result<bool, DecodeError> {
    Decoder::new(data).bool(field)
}

pub fn decode_address(data: &[u8], field: &'static str) -> Result<Address, DecodeError> {
    Decoder::new(data).address(field)
}

pub fn decode_addresses(data: &[u8], field: &'static str) -> Result<Vec<Address>, DecodeError> {
    Decoder::new(data).address_array(field)
}

/// `(continueVotes, endVotes)` from `getVoteTallies`.
pub fn decode_vote_tallies(data: &[u8]) -> Result<(u128, u128), DecodeError> {
    let mut d = Decoder::new(data);
    Ok((d.uint128("continueVotes")?, d.uint128("endVotes")?))
}

pub fn decode_decimals(data: &[u8]) -> Result<u8, DecodeError> {
    Decoder::new(data).uint8("decimals")
}

pub fn decode_string(data: &[u8], field: &'static str) -> Result<String, DecodeError> {
    Decoder::new(data).string(field)
}

/// State-changing functions of the game contract and the payment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Approve {
        spender: Address,
        amount: TokenAmount,
    },
    BuyShares {
        amount: TokenAmount,
        prize_address: Address,
    },
    SubmitVote {
        game_id: GameId,
        decision: bool,
    },
    RequestRandomWords {
        game_id: GameId,
    },
    ProcessVotingResults {
        game_id: GameId,
    },
    DistributeConsolationPrizes {
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

impl WriteCall {
    pub fn signature(&self) -> &'static str {
        match self {
            WriteCall::Approve { .. } => "approve(address,uint256)",
            WriteCall::BuyShares { .. } => "buyShares(uint256,address)",
            WriteCall::SubmitVote { .. } => "submitVote(uint256,bool)",
            WriteCall::RequestRandomWords { .. } => "requestRandomWords(uint256)",
            WriteCall::ProcessVotingResults { .. } => "processVotingResults(uint256)",
            WriteCall::DistributeConsolationPrizes { .. } => {
                "distributeConsolationPrizes(address[],uint256[],uint256)"
            }
            WriteCall::DistributeFinalPrize { .. } => "distributeFinalPrize(uint256)",
            WriteCall::SetOperator { .. } => "setOperator(address,bool)",
            WriteCall::PauseGame => "pauseGame()",
            WriteCall::UnpauseGame => "unpauseGame()",
            WriteCall::SetPlatformFeeWallet { .. } => "setPlatformFeeWallet(address)",
        }
    }

    pub fn targets_token(&self) -> bool {
        matches!(self, WriteCall::Approve { .. })
    }

    fn args(&self) -> Vec<Token> {
        match self {
            WriteCall::Approve { spender, amount } => {
                vec![Token::Address(*spender), Token::Uint(*amount)]
            }
            WriteCall::BuyShares {
                amount,
                prize_address,
            } => vec![Token::Uint(*amount), Token::Address(*prize_address)],
            WriteCall::SubmitVote { game_id, decision } => {
                vec![Token::Uint(u128::from(*game_id)), Token::Bool(*decision)]
            }
            WriteCall::RequestRandomWords { game_id }
            | WriteCall::ProcessVotingResults { game_id }
            | WriteCall::DistributeFinalPrize { game_id } => {
                vec![Token::Uint(u128::from(*game_id))]
            }
            WriteCall::DistributeConsolationPrizes {
                winners,
                amounts,
                batch_size,
            } => vec![
                Token::Addresses(winners.clone()),
                Token::Uints(amounts.clone()),
                Token::Uint(u128::from(*batch_size)),
            ],
            WriteCall::SetOperator {
                operator,
                authorized,
            } => vec![Token::Address(*operator), Token::Bool(*authorized)],
            WriteCall::PauseGame | WriteCall::UnpauseGame => Vec::new(),
            WriteCall::SetPlatformFeeWallet { wallet } => vec![Token::Address(*wallet)],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_call(selector(self.signature()), &self.args())
    }
}
