//! Fixed-point presentation of token amounts. Integer arithmetic only.

use game_abi::TokenAmount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("amount is empty")]
    Empty,
    #[error("unexpected character {0:?} in amount")]
    InvalidCharacter(char),
    #[error("at most {max} fractional digits are allowed")]
    TooManyDecimals { max: u8 },
    #[error("amount does not fit in 128 bits")]
    Overflow,
}

/// Renders `amount` (in the smallest denomination) with `decimals` fractional digits,
/// grouping the whole part in thousands and truncating the fraction to `shown_digits`.
pub fn format_units(amount: TokenAmount, decimals: u8, shown_digits: u8) -> String {
    let (whole, remainder) = match 10u128.checked_pow(u32::from(decimals)) {
        Some(base) => (amount / base, amount % base),
        None => (0, amount),
    };
    let grouped = group_thousands(whole);
    let shown = usize::from(shown_digits.min(decimals));
    if shown == 0 {
        return grouped;
    }
    let fraction = format!("{remainder:0>width$}", width = usize::from(decimals));
    format!("{grouped}.{}", &fraction[..shown])
}

/// Parses a human amount like `"12.5"` into the smallest denomination.
pub fn parse_units(text: &str, decimals: u8) -> Result<TokenAmount, UnitsError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(UnitsError::Empty);
    }
    if let Some(bad) = whole.chars().chain(fraction.chars()).find(|c| !c.is_ascii_digit()) {
        return Err(UnitsError::InvalidCharacter(bad));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(UnitsError::TooManyDecimals { max: decimals });
    }

    let base = 10u128
        .checked_pow(u32::from(decimals))
        .ok_or(UnitsError::Overflow)?;
    let whole = digits_value(whole)?;
    let padding = 10u128
        .checked_pow((usize::from(decimals) - fraction.len()) as u32)
        .ok_or(UnitsError::Overflow)?;
    let fraction = digits_value(fraction)?
        .checked_mul(padding)
        .ok_or(UnitsError::Overflow)?;
    whole
        .checked_mul(base)
        .and_then(|scaled| scaled.checked_add(fraction))
        .ok_or(UnitsError::Overflow)
}

fn digits_value(digits: &str) -> Result<u128, UnitsError> {
    digits.chars().try_fold(0u128, |acc, c| {
        let digit = u128::from(c.to_digit(10).ok_or(UnitsError::InvalidCharacter(c))?);
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(digit))
            .ok_or(UnitsError::Overflow)
    })
}

fn group_thousands(value: u128) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    const ONE: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn format_units__groups_whole_part_and_truncates_fraction() {
        // given
        let amount = 1_234_567 * ONE + 989_000_000_000_000_000;

        // when
        let text = format_units(amount, 18, 2);

        // then
        assert_eq!(text, "1,234,567.98");
    }

    #[test]
    fn format_units__keeps_precision_beyond_f64_range() {
        let amount = (1u128 << 60) + 1;
        assert_eq!(format_units(amount, 0, 0), "1,152,921,504,606,846,977");
    }

    #[test]
    fn format_units__small_amounts_keep_leading_fraction_zeros() {
        assert_eq!(format_units(5_000_000_000_000_000, 18, 3), "0.005");
        assert_eq!(format_units(0, 18, 2), "0.00");
    }

    #[test]
    fn parse_units__pads_short_fractions() {
        assert_eq!(parse_units("12.5", 18), Ok(12 * ONE + ONE / 2));
        assert_eq!(parse_units(".25", 2), Ok(25));
        assert_eq!(parse_units("7", 0), Ok(7));
    }

    #[test]
    fn parse_units__rejects_malformed_input() {
        assert_eq!(parse_units("", 18), Err(UnitsError::Empty));
        assert_eq!(parse_units("1,000", 18), Err(UnitsError::InvalidCharacter(',')));
        assert_eq!(parse_units("1.234", 2), Err(UnitsError::TooManyDecimals { max: 2 }));
        assert_eq!(
            parse_units("340282366920938463463374607431768211456", 0),
            Err(UnitsError::Overflow)
        );
    }

    proptest! {
        #[test]
        fn format_units__full_precision_output_parses_back(amount in any::<u128>()) {
            let text = format_units(amount, 18, 18).replace(',', "");
            prop_assert_eq!(parse_units(&text, 18), Ok(amount));
        }

        #[test]
        fn format_units__whole_part_is_integer_quotient(amount in any::<u128>()) {
            let text = format_units(amount, 18, 0).replace(',', "");
            prop_assert_eq!(text, (amount / ONE).to_string());
        }
    }
}
