//! Step Output Encoding
//!
//! Step results are persisted as JSON text and decoded back into the type
//! the caller declares at replay time.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encodes a step result for the ledger.
pub fn encode_output<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a persisted step result.
pub fn decode_output<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    Ok(serde_json::from_str(encoded)?)
}
