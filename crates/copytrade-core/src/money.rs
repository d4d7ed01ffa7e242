//! Fixed-point money: decimal arithmetic for prices, amounts and PnL.
//!
//! `rust_decimal::Decimal` gives 96 bits of mantissa (~28-29 significant
//! digits) with base-10 scaling, which is what every price/amount/PnL field
//! in this crate is stored as. Nothing here ever touches `f32`/`f64` — JSON
//! numeric fields are parsed through a string intermediate so that wire
//! artifacts like `0.1 + 0.2` never reach a stored money field.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

/// Parse a decimal from a JSON number or string, going through its string
/// representation so we never round-trip through `f64`.
pub fn decimal_from_json(value: &serde_json::Value) -> crate::Result<Decimal> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(crate::Error::Validation(format!(
                "expected a numeric or string value, got {other}"
            )))
        }
    };
    Decimal::from_str_exact(text.trim())
        .or_else(|_| text.trim().parse::<Decimal>())
        .map_err(|e| crate::Error::Validation(format!("invalid decimal '{text}': {e}")))
}

/// A `serde` deserializer for fields that may arrive as either a JSON string
/// or a JSON number, always routed through the string path.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    decimal_from_json(&value).map_err(DeError::custom)
}

/// Half-up rounding to `dp` decimal places (the spec requires half-up, not
/// `Decimal`'s default banker's rounding).
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Divide `numerator / denominator`, returning `None` instead of panicking
/// on a zero or near-zero denominator.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        None
    } else {
        numerator.checked_div(denominator)
    }
}

/// Multiply two decimals, returning `None` on overflow instead of panicking.
pub fn safe_mul(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_mul(b)
}

/// Clamp `value` into `[min, max]`.
pub fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_and_number_json_identically() {
        let a = decimal_from_json(&serde_json::json!("0.1")).unwrap();
        let b = decimal_from_json(&serde_json::json!(0.1)).unwrap();
        // Both paths land on the exact decimal 0.1, never a binary-float artifact.
        assert_eq!(a, Decimal::new(1, 1));
        assert_eq!(b.round_dp(10), Decimal::new(1, 1));
    }

    #[test]
    fn no_float_poisoning_on_sums() {
        let a = decimal_from_json(&serde_json::json!("0.1")).unwrap();
        let b = decimal_from_json(&serde_json::json!("0.2")).unwrap();
        assert_eq!(a + b, Decimal::new(3, 1));
    }

    #[test]
    fn half_up_rounding() {
        let v = Decimal::new(125, 2); // 1.25
        assert_eq!(round_half_up(v, 1), Decimal::new(13, 1)); // 1.3, not 1.2
    }

    #[test]
    fn safe_div_rejects_zero() {
        assert_eq!(safe_div(Decimal::ONE, Decimal::ZERO), None);
        assert_eq!(safe_div(Decimal::ONE, Decimal::TWO), Some(Decimal::new(5, 1)));
    }
}
