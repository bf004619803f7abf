//! Fixed-size string encoding used by the registry contract.

use super::RegistryError;

/// Longest string that fits, leaving room for a terminating zero byte.
pub const MAX_LEN: usize = 31;

/// Encode a UTF-8 string as a zero-padded `0x`-prefixed bytes32 hex string.
pub fn encode(value: &str) -> Result<String, RegistryError> {
  let bytes = value.as_bytes();
  if bytes.len() > MAX_LEN {
    return Err(RegistryError::Bytes32TooLong(value.to_string()));
  }

  let mut padded = [0u8; 32];
  padded[..bytes.len()].copy_from_slice(bytes);
  Ok(format!("0x{}", hex::encode(padded)))
}
