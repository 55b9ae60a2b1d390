//! Minimal Solidity ABI codec covering the shapes the game contract uses:
//! static words, `address[]`, `uint256[]` and `string`.

use crate::types::{
    Address,
    Word,
};

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("response too short while reading `{field}`: need {needed} bytes, have {actual}")]
    TooShort {
        field: &'static str,
        needed: usize,
        actual: usize,
    },
    #[error("value of `{field}` does not fit in {bits} bits")]
    Overflow { field: &'static str, bits: u32 },
    #[error("`{field}` is not a valid bool word")]
    InvalidBool { field: &'static str },
    #[error("`{field}` is not a valid address word")]
    InvalidAddress { field: &'static str },
    #[error("`{field}` has an out-of-range offset or length")]
    InvalidOffset { field: &'static str },
    #[error("`{field}` is not valid utf-8")]
    InvalidUtf8 { field: &'static str },
    #[error("malformed hex payload: {0}")]
    Hex(String),
    #[error("log does not match any known event (topic {0:?})")]
    UnknownEvent(Option<Word>),
}

/// A single ABI argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u128),
    Address(Address),
    Bool(bool),
    Addresses(Vec<Address>),
    Uints(Vec<u128>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::Addresses(_) | Token::Uints(_))
    }

    fn static_word(&self) -> [u8; WORD] {
        match self {
            Token::Uint(value) => uint_word(*value),
            Token::Address(address) => address_word(address),
            Token::Bool(flag) => uint_word(u128::from(*flag)),
            Token::Addresses(_) | Token::Uints(_) => [0u8; WORD],
        }
    }

    fn tail(&self) -> Vec<u8> {
        let words: Vec<[u8; WORD]> = match self {
            Token::Addresses(items) => items.iter().map(address_word).collect(),
            Token::Uints(items) => items.iter().copied().map(uint_word).collect(),
            _ => return Vec::new(),
        };
        let mut out = Vec::with_capacity((words.len() + 1) * WORD);
        out.extend_from_slice(&uint_word(words.len() as u128));
        for word in words {
            out.extend_from_slice(&word);
        }
        out
    }
}

pub fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&address.0);
    word
}

/// Selector followed by the head/tail encoding of `args`.
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let mut head = Vec::with_capacity(args.len() * WORD);
    let mut tail = Vec::new();
    let head_len = args.len() * WORD;
    for arg in args {
        if arg.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            tail.extend(arg.tail());
        } else {
            head.extend_from_slice(&arg.static_word());
        }
    }
    let mut out = Vec::with_capacity(4 + head.len() + tail.len());
    out.extend_from_slice(&selector);
    out.extend(head);
    out.extend(tail);
    out
}

/// Sequential reader over ABI return data or log data.
pub struct Decoder<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    fn word_at(&self, offset: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = offset.checked_add(WORD).ok_or(DecodeError::InvalidOffset { field })?;
        self.data.get(offset..end).ok_or(DecodeError::TooShort {
            field,
            needed: end,
            actual: self.data.len(),
        })
    }

    fn next_word(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let word = self.word_at(self.cursor, field)?;
        self.cursor += WORD;
        Ok(word)
    }

    pub fn word(&mut self, field: &'static str) -> Result<Word, DecodeError> {
        let word = self.next_word(field)?;
        let mut out = [0u8; WORD];
        out.copy_from_slice(word);
        Ok(Word(out))
    }

    pub fn uint128(&mut self, field: &'static str) -> Result<u128, DecodeError> {
        let word = self.next_word(field)?;
        word_to_u128(word, field)
    }

    pub fn uint64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        let value = self.uint128(field)?;
        u64::try_from(value).map_err(|_| DecodeError::Overflow { field, bits: 64 })
    }

    pub fn uint8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let value = self.uint128(field)?;
        u8::try_from(value).map_err(|_| DecodeError::Overflow { field, bits: 8 })
    }

    pub fn bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        match self.uint128(field) {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            Ok(_) => Err(DecodeError::InvalidBool { field }),
            Err(err) => Err(err),
        }
    }

    pub fn address(&mut self, field: &'static str) -> Result<Address, DecodeError> {
        let word = self.next_word(field)?;
        word_to_address(word, field)
    }

    pub fn address_array(&mut self, field: &'static str) -> Result<Vec<Address>, DecodeError> {
        let (start, len) = self.dynamic_header(field)?;
        (0..len)
            .map(|i| word_to_address(self.word_at(start + i * WORD, field)?, field))
            .collect()
    }

    pub fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let (start, len) = self.dynamic_header(field)?;
        let bytes = self
            .data
            .get(start..start + len)
            .ok_or(DecodeError::InvalidOffset { field })?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    /// Follows the offset word at the cursor; returns the first element position and length.
    fn dynamic_header(&mut self, field: &'static str) -> Result<(usize, usize), DecodeError> {
        let offset = self.uint128(field)?;
        let offset = usize::try_from(offset).map_err(|_| DecodeError::InvalidOffset { field })?;
        let len = word_to_u128(self.word_at(offset, field)?, field)?;
        let len = usize::try_from(len).map_err(|_| DecodeError::InvalidOffset { field })?;
        if len > self.data.len() {
            return Err(DecodeError::InvalidOffset { field });
        }
        Ok((offset + WORD, len))
    }
}

pub fn word_to_u128(word: &[u8], field: &'static str) -> Result<u128, DecodeError> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(DecodeError::Overflow { field, bits: 128 });
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..32]);
    Ok(u128::from_be_bytes(low))
}

pub fn word_to_address(word: &[u8], field: &'static str) -> Result<Address, DecodeError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::InvalidAddress { field });
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&word[12..32]);
    Ok(Address(out))
}

/// Decodes a `0x`-prefixed hex string as returned by JSON-RPC.
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| DecodeError::Hex(e.to_string()))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
