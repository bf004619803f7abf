//! Value types exchanged with the chain collaborator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A 20-byte account or contract address, `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
  /// Parse and normalize an address string.
  pub fn parse(input: &str) -> Result<Self, ChainError> {
    let hex_part = input
      .strip_prefix("0x")
      .or_else(|| input.strip_prefix("0X"))
      .ok_or_else(|| ChainError::InvalidAddress(input.to_string()))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(ChainError::InvalidAddress(input.to_string()));
    }

    Ok(Address(format!("0x{}", hex_part.to_ascii_lowercase())))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash identifying a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// What a transaction does. ABI encoding is the collaborator's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TxPayload {
  /// Create a contract from bytecode with constructor arguments.
  Deploy { bytecode: String, abi: Value, args: Vec<Value> },

  /// Call a function on an existing contract.
  Call {
    to: Address,
    abi: Value,
    function: String,
    args: Vec<Value>,
  },
}

/// A transaction to be signed and submitted by a `Signer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
  pub payload: TxPayload,

  /// Native value to attach, as a decimal string of wei.
  pub value: Option<String>,
}

/// A read-only contract call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
  pub to: Address,
  pub abi: Value,
  pub function: String,
  pub args: Vec<Value>,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
  pub transaction_hash: TxHash,
  pub block_number: u64,
  pub contract_address: Option<Address>,
  pub success: bool,
}

/// Errors surfaced by the chain collaborator or its preconditions.
#[derive(Debug, Error)]
pub enum ChainError {
  #[error("no signer available: configure a default signer or set `from`")]
  NoSigner,

  #[error("signer {0} is not available; supply its key or use a different `from` address")]
  SignerNotFound(Address),

  #[error("signer {address} has no funds; fund the account before sending transactions")]
  InsufficientFunds { address: Address },

  #[error("invalid address: {0}")]
  InvalidAddress(String),

  #[error("transaction {hash} reverted")]
  Reverted { hash: TxHash },

  #[error("timed out after {secs}s waiting for receipt of {hash} (the transaction may still be mined; retry)")]
  ReceiptTimeout { hash: TxHash, secs: u64 },

  #[error("deploy transaction {hash} produced no contract address")]
  MissingContractAddress { hash: TxHash },

  #[error("chain is not reachable in offline mode")]
  Offline,

  #[error("rpc error: {0}")]
  Rpc(String),
}

impl ChainError {
  /// Whether retrying the same operation may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ChainError::ReceiptTimeout { .. } | ChainError::Rpc(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn address_parse_normalizes_case() {
    let addr = Address::parse("0xABCDEFabcdef0000000000000000000000000001").unwrap();
    assert_eq!(addr.as_str(), "0xabcdefabcdef0000000000000000000000000001");
  }

  #[test]
  fn address_parse_rejects_bad_input() {
    assert!(Address::parse("abcdef").is_err());
    assert!(Address::parse("0x1234").is_err());
    assert!(Address::parse("0xzz00000000000000000000000000000000000000").is_err());
  }

  #[test]
  fn address_serializes_as_plain_string() {
    let addr = Address::parse("0x0000000000000000000000000000000000000001").unwrap();
    assert_eq!(
      serde_json::to_value(&addr).unwrap(),
      json!("0x0000000000000000000000000000000000000001")
    );
  }

  #[test]
  fn receipt_timeout_is_retryable() {
    let err = ChainError::ReceiptTimeout {
      hash: TxHash("0xabc".to_string()),
      secs: 30,
    };
    assert!(err.is_retryable());
    assert!(!ChainError::NoSigner.is_retryable());
  }
}
