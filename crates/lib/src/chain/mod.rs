//! Chain collaborator interface.
//!
//! The builder never signs or encodes transactions itself. It talks to a
//! `ChainProvider` for signers, receipts and reads, and to a `Signer` for
//! submission. Hosts plug in their own implementation (an RPC client, a
//! forked test node, ...).

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

pub use types::{Address, CallRequest, ChainError, Receipt, TransactionRequest, TxHash, TxPayload};

/// An account able to submit transactions.
#[async_trait]
pub trait Signer: Send + Sync {
  fn address(&self) -> &Address;

  /// Native balance in wei.
  async fn balance(&self) -> Result<u128, ChainError>;

  /// Sign and submit, returning once the node accepted the transaction.
  async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, ChainError>;
}

/// Access to one chain.
#[async_trait]
pub trait ChainProvider: Send + Sync {
  /// Signer for a specific address, or `SignerNotFound`.
  async fn get_signer(&self, address: &Address) -> Result<Arc<dyn Signer>, ChainError>;

  /// Signer used when a step does not name one.
  fn default_signer(&self) -> Option<Arc<dyn Signer>>;

  /// Wait until the transaction is mined.
  async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, ChainError>;

  /// Read-only contract call.
  async fn call(&self, request: CallRequest) -> Result<Value, ChainError>;
}

/// Provider for planning and inspection. Every network operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProvider;

#[async_trait]
impl ChainProvider for OfflineProvider {
  async fn get_signer(&self, _address: &Address) -> Result<Arc<dyn Signer>, ChainError> {
    Err(ChainError::Offline)
  }

  fn default_signer(&self) -> Option<Arc<dyn Signer>> {
    None
  }

  async fn wait_for_receipt(&self, _hash: &TxHash) -> Result<Receipt, ChainError> {
    Err(ChainError::Offline)
  }

  async fn call(&self, _request: CallRequest) -> Result<Value, ChainError> {
    Err(ChainError::Offline)
  }
}

/// Pick the signer for a step: the `from` address if given, else the default.
pub async fn resolve_signer(
  provider: &dyn ChainProvider,
  from: Option<&Address>,
) -> Result<Arc<dyn Signer>, ChainError> {
  match from {
    Some(address) => provider.get_signer(address).await,
    None => provider.default_signer().ok_or(ChainError::NoSigner),
  }
}

/// Fail with `InsufficientFunds` when the signer holds no native balance.
pub async fn ensure_funded(signer: &dyn Signer) -> Result<(), ChainError> {
  if signer.balance().await? == 0 {
    return Err(ChainError::InsufficientFunds {
      address: signer.address().clone(),
    });
  }
  Ok(())
}

/// Submit a transaction and wait for its receipt.
///
/// Once submitted the transaction is always awaited. `timeout` bounds only
/// the wait; expiry is reported as the retryable `ReceiptTimeout`. A receipt
/// with a failed status is `Reverted`.
pub async fn send_and_wait(
  provider: &dyn ChainProvider,
  signer: &dyn Signer,
  tx: TransactionRequest,
  timeout: Option<Duration>,
) -> Result<Receipt, ChainError> {
  let hash = signer.send_transaction(tx).await?;
  info!(hash = %hash, from = %signer.address(), "transaction submitted");

  let receipt = match timeout {
    Some(limit) => tokio::time::timeout(limit, provider.wait_for_receipt(&hash))
      .await
      .map_err(|_| ChainError::ReceiptTimeout {
        hash: hash.clone(),
        secs: limit.as_secs(),
      })??,
    None => provider.wait_for_receipt(&hash).await?,
  };

  if !receipt.success {
    return Err(ChainError::Reverted { hash });
  }

  debug!(hash = %hash, block = receipt.block_number, "transaction mined");
  Ok(receipt)
}
