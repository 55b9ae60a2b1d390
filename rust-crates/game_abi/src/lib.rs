//! Wire-level bindings for the participation game contract and its payment token.
//!
//! Everything here is transport-agnostic: calls encode to calldata, return data and
//! logs decode into typed values. Nothing in this crate performs I/O.

use sha3::{
    Digest,
    Keccak256,
};

pub mod calls;
pub mod codec;
pub mod events;
pub mod types;

pub use calls::{
    GameDetails,
    ParticipantInfo,
    ReadCall,
    WriteCall,
};
pub use codec::{
    DecodeError,
    Decoder,
    Token,
};
pub use events::{
    ContractEvent,
    Log,
};
pub use types::{
    Address,
    GameId,
    TokenAmount,
    TxHash,
    Word,
};

/// First four bytes of the keccak-256 hash of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic-0 of an event with the given canonical signature.
pub fn event_topic(signature: &str) -> Word {
    Word(keccak256(signature.as_bytes()))
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn selector__matches_well_known_erc20_selectors() {
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(selector("allowance(address,address)"), [0xdd, 0x62, 0xed, 0x3e]);
        assert_eq!(selector("decimals()"), [0x31, 0x3c, 0xe5, 0x67]);
    }

    #[test]
    fn event_topic__matches_erc20_transfer_topic() {
        let expected = "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
        assert_eq!(
            hex::encode(event_topic("Transfer(address,address,uint256)").0),
            expected
        );
    }
}
