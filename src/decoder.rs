//! Boundary to the external ABCI value decoder.
//!
//! Node responses carry Borsh-encoded values as base64 strings. Decoding the
//! composite shapes (reward token list, POS parameters) requires the chain's
//! type schema, which is supplied by an external decoder module rather than
//! reimplemented here. This module defines the capability interface plus the
//! two implementations the service ships with.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("invalid base64 string")]
    InvalidBase64,
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("amount exceeds 128 bits")]
    AmountOverflow,
    #[error("shape requires the externally supplied decoder")]
    Unsupported,
}

impl From<base64::DecodeError> for DecodeError {
    fn from(_: base64::DecodeError) -> Self {
        DecodeError::InvalidBase64
    }
}

/// One entry of the chain's MASP reward token list, in decoded form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardToken {
    pub name: String,
    pub address: String,
    pub max_reward_rate: String,
    pub kp_gain: String,
    pub kd_gain: String,
    pub locked_amount_target: u64,
}

/// POS parameters are passed through to clients verbatim; the decoded record
/// is kept opaque.
pub type PosParams = serde_json::Value;

pub trait AbciDecoder: Send + Sync {
    fn decode_amount(&self, b64: &str) -> Result<u128, DecodeError>;
    fn decode_epoch(&self, b64: &str) -> Result<u64, DecodeError>;
    fn decode_reward_tokens(&self, b64: &str) -> Result<Vec<RewardToken>, DecodeError>;
    fn decode_pos_params(&self, b64: &str) -> Result<PosParams, DecodeError>;
}

/// Decoder for the two numeric shapes with a stable, documented layout:
/// token amounts are four little-endian u64 limbs, epochs a single u64.
/// Composite shapes defer to the externally supplied decoder and report
/// `Unsupported` when it is absent.
pub struct BorshDecoder;

impl AbciDecoder for BorshDecoder {
    fn decode_amount(&self, b64: &str) -> Result<u128, DecodeError> {
        let bytes = BASE64.decode(b64)?;
        let limbs: [u64; 4] =
            borsh::from_slice(&bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if limbs[2] != 0 || limbs[3] != 0 {
            return Err(DecodeError::AmountOverflow);
        }
        Ok(((limbs[1] as u128) << 64) | limbs[0] as u128)
    }

    fn decode_epoch(&self, b64: &str) -> Result<u64, DecodeError> {
        let bytes = BASE64.decode(b64)?;
        borsh::from_slice(&bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    fn decode_reward_tokens(&self, _b64: &str) -> Result<Vec<RewardToken>, DecodeError> {
        Err(DecodeError::Unsupported)
    }

    fn decode_pos_params(&self, _b64: &str) -> Result<PosParams, DecodeError> {
        Err(DecodeError::Unsupported)
    }
}

/// Deterministic decoder for mock mode and tests: payloads are base64-wrapped
/// UTF-8 text (decimal integers or JSON), so known blobs round-trip to known
/// values.
pub struct MockDecoder;

impl MockDecoder {
    fn text(b64: &str) -> Result<String, DecodeError> {
        let bytes = BASE64.decode(b64)?;
        String::from_utf8(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

impl AbciDecoder for MockDecoder {
    fn decode_amount(&self, b64: &str) -> Result<u128, DecodeError> {
        Self::text(b64)?
            .trim()
            .parse()
            .map_err(|_| DecodeError::Malformed("expected decimal amount".into()))
    }

    fn decode_epoch(&self, b64: &str) -> Result<u64, DecodeError> {
        Self::text(b64)?
            .trim()
            .parse()
            .map_err(|_| DecodeError::Malformed("expected decimal epoch".into()))
    }

    fn decode_reward_tokens(&self, b64: &str) -> Result<Vec<RewardToken>, DecodeError> {
        serde_json::from_str(&Self::text(b64)?).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    fn decode_pos_params(&self, b64: &str) -> Result<PosParams, DecodeError> {
        serde_json::from_str(&Self::text(b64)?).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount_blob(value: u128) -> String {
        let limbs = [value as u64, (value >> 64) as u64, 0u64, 0u64];
        BASE64.encode(borsh::to_vec(&limbs).unwrap())
    }

    #[test]
    fn borsh_amount_roundtrip() {
        let decoder = BorshDecoder;
        assert_eq!(decoder.decode_amount(&amount_blob(0)).unwrap(), 0);
        assert_eq!(
            decoder.decode_amount(&amount_blob(123_456_789)).unwrap(),
            123_456_789
        );
        let big = (7u128 << 64) | 42;
        assert_eq!(decoder.decode_amount(&amount_blob(big)).unwrap(), big);
    }

    #[test]
    fn borsh_amount_rejects_high_limbs() {
        let limbs = [0u64, 0, 1, 0];
        let blob = BASE64.encode(borsh::to_vec(&limbs).unwrap());
        assert_eq!(
            BorshDecoder.decode_amount(&blob),
            Err(DecodeError::AmountOverflow)
        );
    }

    #[test]
    fn borsh_epoch_roundtrip() {
        let blob = BASE64.encode(borsh::to_vec(&99u64).unwrap());
        assert_eq!(BorshDecoder.decode_epoch(&blob).unwrap(), 99);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert_eq!(
            BorshDecoder.decode_amount("not base64!!"),
            Err(DecodeError::InvalidBase64)
        );
    }

    #[test]
    fn composite_shapes_report_unsupported() {
        assert_eq!(
            BorshDecoder.decode_reward_tokens("AA=="),
            Err(DecodeError::Unsupported)
        );
    }

    #[test]
    fn mock_decoder_roundtrips() {
        let blob = BASE64.encode("8675309");
        assert_eq!(MockDecoder.decode_amount(&blob).unwrap(), 8_675_309);

        let tokens = vec![RewardToken {
            name: "NAM".into(),
            address: "tnam1q9gr66cvu4hrzm0sd5kmlnjje82gs3xlfg3v6nu7".into(),
            max_reward_rate: "0.01".into(),
            kp_gain: "120000".into(),
            kd_gain: "120000".into(),
            locked_amount_target: 1_000_000,
        }];
        let blob = BASE64.encode(serde_json::to_string(&tokens).unwrap());
        assert_eq!(MockDecoder.decode_reward_tokens(&blob).unwrap(), tokens);
    }
}
