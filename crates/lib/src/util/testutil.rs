//! Test doubles for the chain and artifact collaborators.
//!
//! `MockChain` mines every transaction instantly (unless a receipt delay is
//! set), derives deterministic addresses and hashes, and implements just
//! enough of the package registry contract for registry tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::artifacts::{ArtifactError, ArtifactProvider, ContractArtifact};
use crate::chain::{Address, CallRequest, ChainError, ChainProvider, Receipt, Signer, TransactionRequest, TxHash, TxPayload};
use crate::registry::{ContentError, ContentStore};
use crate::util::hash::hash_bytes;

/// Balance given to signers created without an explicit one.
pub const DEFAULT_BALANCE: u128 = 1_000_000_000_000_000_000;

#[derive(Default)]
struct ChainState {
  balances: BTreeMap<Address, u128>,
  default_signer: Option<Address>,
  nonce: u64,
  block: u64,
  receipts: HashMap<TxHash, Receipt>,
  sent: Vec<(Address, TransactionRequest)>,
  reads: usize,
  receipt_delay: Option<Duration>,
  failing: HashSet<String>,
  urls: HashMap<(String, String, String), String>,
}

#[derive(Clone)]
pub struct MockChain {
  state: Arc<Mutex<ChainState>>,
}

impl MockChain {
  /// A chain with one funded default signer.
  pub fn new() -> Self {
    let chain = Self::without_default_signer();
    let deployer = chain.add_signer(DEFAULT_BALANCE);
    chain.state.lock().unwrap().default_signer = Some(deployer);
    chain
  }

  pub fn without_default_signer() -> Self {
    Self {
      state: Arc::new(Mutex::new(ChainState::default())),
    }
  }

  /// Add a signer with the given balance and return its address.
  pub fn add_signer(&self, balance: u128) -> Address {
    let mut state = self.state.lock().unwrap();
    let seed = format!("signer-{}", state.balances.len());
    let address = derive_address(&seed);
    state.balances.insert(address.clone(), balance);
    address
  }

  pub fn deployer(&self) -> Address {
    self.state.lock().unwrap().default_signer.clone().unwrap()
  }

  /// Make the default signer's balance zero.
  pub fn drain_deployer(&self) {
    let deployer = self.deployer();
    self.state.lock().unwrap().balances.insert(deployer, 0);
  }

  pub fn set_receipt_delay(&self, delay: Duration) {
    self.state.lock().unwrap().receipt_delay = Some(delay);
  }

  /// Calls to `function` revert from now on.
  pub fn fail_function(&self, function: &str) {
    self.state.lock().unwrap().failing.insert(function.to_string());
  }

  /// Every submitted transaction with its sender, in order.
  pub fn sent(&self) -> Vec<(Address, TransactionRequest)> {
    self.state.lock().unwrap().sent.clone()
  }

  pub fn sent_count(&self) -> usize {
    self.state.lock().unwrap().sent.len()
  }

  /// Number of read-only calls served.
  pub fn read_count(&self) -> usize {
    self.state.lock().unwrap().reads
  }
}

impl Default for MockChain {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ChainProvider for MockChain {
  async fn get_signer(&self, address: &Address) -> Result<Arc<dyn Signer>, ChainError> {
    let state = self.state.lock().unwrap();
    if !state.balances.contains_key(address) {
      return Err(ChainError::SignerNotFound(address.clone()));
    }
    Ok(Arc::new(MockSigner {
      address: address.clone(),
      state: self.state.clone(),
    }))
  }

  fn default_signer(&self) -> Option<Arc<dyn Signer>> {
    let address = self.state.lock().unwrap().default_signer.clone()?;
    Some(Arc::new(MockSigner {
      address,
      state: self.state.clone(),
    }))
  }

  async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, ChainError> {
    let delay = self.state.lock().unwrap().receipt_delay;
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    self
      .state
      .lock()
      .unwrap()
      .receipts
      .get(hash)
      .cloned()
      .ok_or_else(|| ChainError::Rpc(format!("unknown transaction {hash}")))
  }

  async fn call(&self, request: CallRequest) -> Result<Value, ChainError> {
    let mut state = self.state.lock().unwrap();
    state.reads += 1;

    if request.function == "getPackageUrl" {
      let key = registry_key(&request.args);
      return Ok(json!(state.urls.get(&key).cloned().unwrap_or_default()));
    }
    Ok(Value::Null)
  }
}

struct MockSigner {
  address: Address,
  state: Arc<Mutex<ChainState>>,
}

#[async_trait]
impl Signer for MockSigner {
  fn address(&self) -> &Address {
    &self.address
  }

  async fn balance(&self) -> Result<u128, ChainError> {
    Ok(self.state.lock().unwrap().balances.get(&self.address).copied().unwrap_or(0))
  }

  async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, ChainError> {
    let mut state = self.state.lock().unwrap();
    state.nonce += 1;
    state.block += 1;

    let seed = format!("{}-{}", self.address, state.nonce);
    let hash = TxHash(format!("0x{}", hash_bytes(seed.as_bytes()).0));

    let (contract_address, success) = match &tx.payload {
      TxPayload::Deploy { .. } => (Some(derive_address(&format!("contract-{seed}"))), true),
      TxPayload::Call { function, args, .. } => {
        let success = !state.failing.contains(function);
        if success && function == "publish" {
          record_publication(&mut state, args);
        }
        (None, success)
      }
    };

    let receipt = Receipt {
      transaction_hash: hash.clone(),
      block_number: state.block,
      contract_address,
      success,
    };
    state.receipts.insert(hash.clone(), receipt);
    state.sent.push((self.address.clone(), tx));
    Ok(hash)
  }
}

/// `publish(name, versions[], variant, url)`
fn record_publication(state: &mut ChainState, args: &[Value]) {
  let (Some(name), Some(Value::Array(versions)), Some(variant), Some(Value::String(url))) =
    (args.first(), args.get(1), args.get(2), args.get(3))
  else {
    return;
  };
  for version in versions {
    state
      .urls
      .insert((name.to_string(), version.to_string(), variant.to_string()), url.clone());
  }
}

/// `getPackageUrl(name, version, variant)`
fn registry_key(args: &[Value]) -> (String, String, String) {
  let arg = |i: usize| args.get(i).map(Value::to_string).unwrap_or_default();
  (arg(0), arg(1), arg(2))
}

fn derive_address(seed: &str) -> Address {
  Address(format!("0x{}", &hash_bytes(seed.as_bytes()).0[..40]))
}

/// In-memory artifacts keyed by contract name.
#[derive(Default, Clone)]
pub struct MockArtifacts {
  artifacts: Arc<Mutex<BTreeMap<String, ContractArtifact>>>,
}

impl MockArtifacts {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add an artifact with bytecode derived from its name.
  pub fn with(self, name: &str) -> Self {
    let bytecode = format!("0x60{}", hex_of(name));
    self.set_bytecode(name, &bytecode);
    self
  }

  /// Add or replace an artifact's bytecode, as a recompilation would.
  pub fn set_bytecode(&self, name: &str, bytecode: &str) {
    self.artifacts.lock().unwrap().insert(
      name.to_string(),
      ContractArtifact {
        contract_name: name.to_string(),
        source_name: format!("contracts/{name}.sol"),
        abi: json!([{"type": "function", "name": "noop", "inputs": [], "outputs": []}]),
        bytecode: bytecode.to_string(),
      },
    );
  }
}

fn hex_of(name: &str) -> String {
  name.bytes().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl ArtifactProvider for MockArtifacts {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    self
      .artifacts
      .lock()
      .unwrap()
      .get(name)
      .cloned()
      .ok_or_else(|| ArtifactError::NotFound(name.to_string()))
  }
}

/// Content store keeping blobs in memory under `ipfs://<sha256>` URLs.
#[derive(Default, Clone)]
pub struct MemoryContent {
  blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl ContentStore for MemoryContent {
  async fn push(&self, data: Vec<u8>) -> Result<String, ContentError> {
    let url = format!("ipfs://{}", hash_bytes(&data).0);
    self.blobs.lock().unwrap().insert(url.clone(), data);
    Ok(url)
  }

  async fn fetch(&self, url: &str) -> Result<Vec<u8>, ContentError> {
    self
      .blobs
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .ok_or_else(|| ContentError::Response(format!("no content at {url}")))
  }
}
