use crate::{
    codec::{
        DecodeError,
        Decoder,
        word_to_address,
        word_to_u128,
    },
    event_topic,
    types::{
        Address,
        GameId,
        TokenAmount,
        Word,
    },
};
use std::sync::LazyLock;

const SHARES_PURCHASED: &str = "SharesPurchased(address,uint256,uint256,uint256)";
const GAME_STATUS_CHANGED: &str = "GameStatusChanged(uint256,uint8,uint8)";
const VOTE_CAST: &str = "VoteCast(address,uint256,bool,uint8)";
const PRIZE_DISTRIBUTED: &str = "PrizeDistributed(address,uint256,uint256,string)";
const GAME_CREATED: &str = "GameCreated(uint256,uint256)";

static TOPICS: LazyLock<[Word; 5]> = LazyLock::new(|| {
    [
        event_topic(SHARES_PURCHASED),
        event_topic(GAME_STATUS_CHANGED),
        event_topic(VOTE_CAST),
        event_topic(PRIZE_DISTRIBUTED),
        event_topic(GAME_CREATED),
    ]
});

/// A raw log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Word>,
    pub data: Vec<u8>,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    SharesPurchased {
        user: Address,
        game_id: GameId,
        amount: TokenAmount,
        rollover_amount: TokenAmount,
    },
    GameStatusChanged {
        game_id: GameId,
        old_status: u8,
        new_status: u8,
    },
    VoteCast {
        voter: Address,
        game_id: GameId,
        decision: bool,
        stage: u8,
    },
    PrizeDistributed {
        winner: Address,
        game_id: GameId,
        amount: TokenAmount,
        prize_type: String,
    },
    GameCreated {
        game_id: GameId,
        token_cap: TokenAmount,
    },
}

impl ContractEvent {
    /// Topic-0 values of every event this client understands, for `eth_getLogs` filters.
    pub fn known_topics() -> Vec<Word> {
        TOPICS.to_vec()
    }

    pub fn game_id(&self) -> GameId {
        match self {
            ContractEvent::SharesPurchased { game_id, .. }
            | ContractEvent::GameStatusChanged { game_id, .. }
            | ContractEvent::VoteCast { game_id, .. }
            | ContractEvent::PrizeDistributed { game_id, .. }
            | ContractEvent::GameCreated { game_id, .. } => *game_id,
        }
    }

    pub fn decode(log: &Log) -> Result<Self, DecodeError> {
        let topic0 = log.topics.first().copied();
        let [shares, status, vote, prize, created] = &*TOPICS;
        let mut data = Decoder::new(&log.data);
        match topic0 {
            Some(t) if t == *shares => Ok(ContractEvent::SharesPurchased {
                user: indexed_address(log, 1, "user")?,
                game_id: indexed_game_id(log, 2)?,
                amount: data.uint128("amount")?,
                rollover_amount: data.uint128("rolloverAmount")?,
            }),
            Some(t) if t == *status => Ok(ContractEvent::GameStatusChanged {
                game_id: indexed_game_id(log, 1)?,
                old_status: data.uint8("oldStatus")?,
                new_status: data.uint8("newStatus")?,
            }),
            Some(t) if t == *vote => Ok(ContractEvent::VoteCast {
                voter: indexed_address(log, 1, "voter")?,
                game_id: indexed_game_id(log, 2)?,
                decision: data.bool("decision")?,
                stage: data.uint8("stage")?,
            }),
            Some(t) if t == *prize => Ok(ContractEvent::PrizeDistributed {
                winner: indexed_address(log, 1, "winner")?,
                game_id: indexed_game_id(log, 2)?,
                amount: data.uint128("amount")?,
                prize_type: data.string("prizeType")?,
            }),
            Some(t) if t == *created => Ok(ContractEvent::GameCreated {
                game_id: indexed_game_id(log, 1)?,
                token_cap: data.uint128("tokenCap")?,
            }),
            other => Err(DecodeError::UnknownEvent(other)),
        }
    }
}

fn topic<'a>(log: &'a Log, index: usize, field: &'static str) -> Result<&'a Word, DecodeError> {
    log.topics.get(index).ok_or(DecodeError::TooShort {
        field,
        needed: index + 1,
        actual: log.topics.len(),
    })
}

fn indexed_address(log: &Log, index: usize, field: &'static str) -> Result<Address, DecodeError> {
    word_to_address(&topic(log, index, field)?.0, field)
}

fn indexed_game_id(log: &Log, index: usize) -> Result<GameId, DecodeError> {
    let value = word_to_u128(&topic(log, index, "gameId")?.0, "gameId")?;
    GameId::try_from(value).map_err(|_| DecodeError::Overflow {
        field: "gameId",
        bits: 64,
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::codec::{
        address_word,
        uint_word,
    };

    fn log(topics: Vec<Word>, data: Vec<u8>) -> Log {
        Log {
            address: Address([0xee; 20]),
            topics,
            data,
            block_number: Some(12),
        }
    }

    #[test]
    fn decode__reads_indexed_and_data_fields_of_shares_purchased() {
        // given
        let user = Address([0x42; 20]);
        let mut data = Vec::new();
        data.extend_from_slice(&uint_word(10));
        data.extend_from_slice(&uint_word(0));
        let raw = log(
            vec![
                event_topic(SHARES_PURCHASED),
                Word(address_word(&user)),
                Word(uint_word(3)),
            ],
            data,
        );

        // when
        let event = ContractEvent::decode(&raw).unwrap();

        // then
        assert_eq!(
            event,
            ContractEvent::SharesPurchased {
                user,
                game_id: 3,
                amount: 10,
                rollover_amount: 0,
            }
        );
    }

    #[test]
    fn decode__game_status_changed_topic_matches_contract() {
        assert_eq!(
            hex::encode(event_topic(GAME_STATUS_CHANGED).0),
            "bac7a9d46980cc7478337a052b76cb828e44b23e57b96795ea6a65f0847f218e"
        );
    }

    #[test]
    fn decode__unknown_topic_is_reported() {
        let raw = log(vec![Word([1; 32])], Vec::new());
        assert_eq!(
            ContractEvent::decode(&raw),
            Err(DecodeError::UnknownEvent(Some(Word([1; 32]))))
        );
    }

    #[test]
    fn decode__missing_indexed_topic_is_a_decode_error() {
        let raw = log(vec![event_topic(GAME_CREATED)], uint_word(5).to_vec());
        assert!(matches!(
            ContractEvent::decode(&raw),
            Err(DecodeError::TooShort { field: "gameId", .. })
        ));
    }
}
