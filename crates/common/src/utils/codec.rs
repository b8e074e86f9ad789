use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Serialize a row with bincode, the on-disk encoding of every tree.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a bincode-encoded row.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
