//! Content-addressed blob storage.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const IPFS_SCHEME: &str = "ipfs://";

#[derive(Debug, Error)]
pub enum ContentError {
  #[error("unsupported content url '{0}'")]
  InvalidUrl(String),

  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("content api returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("unexpected content api response: {0}")]
  Response(String),
}

/// Stores blobs and hands back a URL to retrieve them.
#[async_trait]
pub trait ContentStore: Send + Sync {
  async fn push(&self, data: Vec<u8>) -> Result<String, ContentError>;

  async fn fetch(&self, url: &str) -> Result<Vec<u8>, ContentError>;
}

/// Client for the IPFS HTTP API (`/api/v0/add`, `/api/v0/cat`).
#[derive(Debug, Clone)]
pub struct IpfsClient {
  api_url: String,
  client: reqwest::Client,
}

#[derive(Deserialize)]
struct AddResponse {
  #[serde(rename = "Hash")]
  hash: String,
}

impl IpfsClient {
  /// `api_url` is the node's API root, e.g. `http://127.0.0.1:5001`.
  pub fn new(api_url: &str) -> Self {
    Self {
      api_url: api_url.trim_end_matches('/').to_string(),
      client: reqwest::Client::new(),
    }
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/api/v0/{path}", self.api_url)
  }
}

/// The CID of an `ipfs://` URL.
pub fn cid_of(url: &str) -> Result<&str, ContentError> {
  url
    .strip_prefix(IPFS_SCHEME)
    .filter(|cid| !cid.is_empty())
    .ok_or_else(|| ContentError::InvalidUrl(url.to_string()))
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ContentError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  Err(ContentError::Status {
    status: status.as_u16(),
    body,
  })
}

#[async_trait]
impl ContentStore for IpfsClient {
  async fn push(&self, data: Vec<u8>) -> Result<String, ContentError> {
    let form = Form::new().part("file", Part::bytes(data).file_name("deploy.json"));
    let response = self.client.post(self.endpoint("add")).multipart(form).send().await?;
    let added: AddResponse = check(response).await?.json().await?;

    if added.hash.is_empty() {
      return Err(ContentError::Response("missing Hash".to_string()));
    }
    debug!(cid = %added.hash, "content added");
    Ok(format!("{IPFS_SCHEME}{}", added.hash))
  }

  async fn fetch(&self, url: &str) -> Result<Vec<u8>, ContentError> {
    let cid = cid_of(url)?;
    let response = self
      .client
      .post(self.endpoint("cat"))
      .query(&[("arg", cid)])
      .send()
      .await?;
    let bytes = check(response).await?.bytes().await?;
    debug!(cid = %cid, size = bytes.len(), "content fetched");
    Ok(bytes.to_vec())
  }
}
