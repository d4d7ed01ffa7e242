//! Input validation and sanitization for every external-data boundary:
//! addresses, hex blobs, prices, amounts and condition ids.

use rust_decimal::Decimal;

use crate::{Error, Result};

/// Checksummed-or-not hex address, 20 bytes (`0x` + 40 hex chars).
pub fn validate_address(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!("'{raw}' is not a 20-byte hex address")));
    }
    Ok(format!("0x{}", hex_part.to_lowercase()))
}

/// 32-byte hex identifier (condition id, token id, tx hash).
pub fn validate_hex32(raw: &str, field: &str) -> Result<String> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!("'{raw}' is not a 32-byte hex {field}")));
    }
    Ok(format!("0x{}", hex_part.to_lowercase()))
}

/// Any length hex blob (call data).
pub fn validate_hex(raw: &str, field: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(hex_part).map_err(|e| Error::Validation(format!("invalid hex {field}: {e}")))
}

/// A binary-market price must lie strictly inside `(0, 1)`.
pub fn validate_price(price: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(Error::Validation(format!("price {price} outside (0, 1)")));
    }
    Ok(price)
}

/// Amounts (quantities) must be non-negative.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount < Decimal::ZERO {
        return Err(Error::Validation(format!("amount {amount} is negative")));
    }
    Ok(amount)
}

/// Mask a wallet address to `first8…last6` for logs and alerts so raw
/// addresses never leave the process unredacted.
pub fn mask_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 14 {
        return address.to_string();
    }
    let first: String = chars[..8].iter().collect();
    let last: String = chars[chars.len() - 6..].iter().collect();
    format!("{first}…{last}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_address_case_and_prefix() {
        let addr = validate_address("AbCd000000000000000000000000000000001234").unwrap();
        assert_eq!(addr, "0xabcd000000000000000000000000000000001234");
    }

    #[test]
    fn rejects_wrong_length_address() {
        assert!(validate_address("0xabcd").is_err());
    }

    #[test]
    fn price_band_is_open_interval() {
        assert!(validate_price(Decimal::ZERO).is_err());
        assert!(validate_price(Decimal::ONE).is_err());
        assert!(validate_price(Decimal::new(5, 1)).is_ok());
    }

    #[test]
    fn masks_address_first8_last6() {
        let masked = mask_address("0x1234567890abcdef1234567890abcdef12345678");
        assert_eq!(masked, "0x123456…345678");
    }
}
