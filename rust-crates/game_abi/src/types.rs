use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
    de,
};
use std::{
    fmt,
    str::FromStr,
};

/// Game identifiers are `uint256` on chain; anything beyond `u64` is rejected at decode.
pub type GameId = u64;

/// Token amounts in the smallest denomination (18 fractional digits for the game token).
pub type TokenAmount = u128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseHexError {
    #[error("expected {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    Hex(String),
}

fn parse_fixed<const N: usize>(raw: &str) -> Result<[u8; N], ParseHexError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != N * 2 {
        return Err(ParseHexError::Length {
            expected: N * 2,
            actual: digits.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| ParseHexError::Hex(e.to_string()))?;
    Ok(out)
}

macro_rules! hex_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_fixed::<$len>(s).map(Self)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_newtype!(
    /// 20-byte EVM account or contract address.
    Address,
    20
);
hex_newtype!(
    /// Transaction hash.
    TxHash,
    32
);
hex_newtype!(
    /// A raw 32-byte ABI word (random seeds, log topics).
    Word,
    32
);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// `0x1234...abcd` form used in status lines.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn address__parses_with_and_without_prefix() {
        // given
        let raw = "0xF4Abd3F1eF0298fd3f02908114Fd139b6750d6c6";

        // when
        let with_prefix: Address = raw.parse().unwrap();
        let without_prefix: Address = raw.trim_start_matches("0x").parse().unwrap();

        // then
        assert_eq!(with_prefix, without_prefix);
        assert_eq!(
            with_prefix.to_string(),
            "0xf4abd3f1ef0298fd3f02908114fd139b6750d6c6"
        );
    }

    #[test]
    fn address__rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            ParseHexError::Length {
                expected: 40,
                actual: 4
            }
        );
    }

    #[test]
    fn address__short_form_keeps_prefix_and_suffix() {
        let address: Address = "0xf4abd3f1ef0298fd3f02908114fd139b6750d6c6".parse().unwrap();
        assert_eq!(address.short(), "0xf4ab...d6c6");
    }

    #[test]
    fn address__serde_uses_hex_string() {
        let address = Address([0x11; 20]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{address}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
