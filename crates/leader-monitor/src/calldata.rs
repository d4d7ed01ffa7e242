//! Call-data decoding for the CTF Exchange contract's `fillOrder` and
//! `matchOrders` selectors.
//!
//! Grounded in the teacher's CLOB websocket decoder
//! (`copytrade_core::api::clob`'s `#[serde(tag = "type")] enum WsMessage`,
//! opportunistic tag dispatch with a catch-all discard arm): here the "tag"
//! is the 4-byte function selector instead of a JSON field, but the shape is
//! the same — a closed set of known calls, one discard path for anything
//! else. Each 32-byte ABI word after the selector is read positionally;
//! unknown/malformed words fail the decode rather than panicking.

use copytrade_core::domain::{ExchangeCall, Side};
use copytrade_core::validate;

const FILL_ORDER_SELECTOR: [u8; 4] = [0x5f, 0x7b, 0x1f, 0xe3];
const MATCH_ORDERS_SELECTOR: [u8; 4] = [0x9a, 0x2a, 0xc6, 0xd5];

/// Result of decoding one exchange call: the normalized call shape plus the
/// market (condition) it belongs to.
pub struct DecodedCall {
    pub condition_id: String,
    pub call: ExchangeCall,
}

fn word_at(words: &[u8], index: usize) -> Option<&[u8]> {
    let start = index * 32;
    words.get(start..start + 32)
}

fn u64_from_word(word: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..32]);
    u64::from_be_bytes(buf)
}

fn hex32_from_word(word: &[u8]) -> String {
    format!("0x{}", hex::encode(word))
}

/// Decode `input` (hex, `0x`-prefixed or not) into a validated `DecodedCall`.
///
/// Layout assumption (documented, not a full contract ABI): word 0 is the
/// condition id, word 1 the token id, word 2 the side (0 = buy, 1 = sell),
/// word 3 the price numerator, word 4 the price denominator, word 5 the
/// fill amount. Anything short of 6 words, or with an unrecognized
/// selector, is discarded.
pub fn decode_exchange_call(input: &str) -> Option<DecodedCall> {
    let bytes = validate::validate_hex(input, "call_data").ok()?;
    if bytes.len() < 4 {
        return None;
    }
    let (selector, words) = bytes.split_at(4);
    let mut selector_arr = [0u8; 4];
    selector_arr.copy_from_slice(selector);

    if words.len() < 6 * 32 {
        return None;
    }

    let condition_id = hex32_from_word(word_at(words, 0)?);
    let token_id = hex32_from_word(word_at(words, 1)?);
    let side = match u64_from_word(word_at(words, 2)?) {
        0 => Side::Buy,
        1 => Side::Sell,
        _ => return None,
    };
    let price_numerator = u64_from_word(word_at(words, 3)?);
    let price_denominator = u64_from_word(word_at(words, 4)?);
    let amount = u64_from_word(word_at(words, 5)?);

    if price_denominator == 0 {
        return None;
    }

    let call = match selector_arr {
        FILL_ORDER_SELECTOR => ExchangeCall::FillOrder {
            token_id,
            side,
            price_numerator,
            price_denominator,
            amount,
        },
        MATCH_ORDERS_SELECTOR => ExchangeCall::MatchOrders {
            token_id,
            side,
            price_numerator,
            price_denominator,
            amount,
        },
        _ => return None,
    };

    Some(DecodedCall { condition_id, call })
}
