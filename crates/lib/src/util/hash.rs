//! Hashing utilities for step fingerprints and content verification.
//!
//! This module provides:
//! - `Fingerprint`: the cache key of a step, a SHA-256 over canonical JSON
//! - `canonical_json()`: key-sorted, whitespace-free JSON rendering
//! - `hash_directory()`: Deterministic directory hashing
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Deterministic summary of everything that affects a step's side effects.
///
/// Two equal fingerprints mean the step may reuse its stored artifacts.
///
/// # Format
///
/// A lowercase hexadecimal SHA-256 (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  /// Fingerprint a JSON value through its canonical serialization.
  pub fn of(value: &Value) -> Self {
    Fingerprint(hash_bytes(canonical_json(value).as_bytes()).0)
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Render a JSON value with object keys sorted and no insignificant whitespace.
///
/// Equivalent values with different key order render identically, which is
/// what makes fingerprints order-independent.
pub fn canonical_json(value: &Value) -> String {
  match value {
    Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.to_string(),
    Value::Array(items) => {
      let items: Vec<String> = items.iter().map(canonical_json).collect();
      format!("[{}]", items.join(","))
    }
    Value::Object(map) => {
      let sorted: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
      let items: Vec<String> = sorted
        .into_iter()
        .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
        .collect();
      format!("{{{}}}", items.join(","))
    }
  }
}

/// A full 64-character SHA256 hash for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash includes file contents, directory structure and symlink targets,
/// but not metadata like timestamps or permissions. Entries are sorted by
/// path for determinism.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .to_string();

    // Skip the root directory itself
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      format!("F:{}:{}", rel_path, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file or a directory, whichever `path` points at.
pub fn hash_path(path: &Path) -> Result<ContentHash, DirHashError> {
  if path.is_dir() {
    hash_directory(path, &[])
  } else {
    hash_file(path)
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::tempdir;

  #[test]
  fn canonical_json_sorts_keys() {
    let a = json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
    let b = json!({"a": {"c": "x", "d": [1, 2]}, "b": 1});
    assert_eq!(canonical_json(&a), canonical_json(&b));
    assert_eq!(canonical_json(&a), r#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
  }

  #[test]
  fn canonical_json_keeps_array_order() {
    assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
  }

  #[test]
  fn canonical_json_escapes_strings() {
    assert_eq!(canonical_json(&json!({"k\"": "a\nb"})), r#"{"k\"":"a\nb"}"#);
  }

  #[test]
  fn fingerprint_ignores_key_order() {
    let a = Fingerprint::of(&json!({"artifact": "Token", "args": ["1"]}));
    let b = Fingerprint::of(&json!({"args": ["1"], "artifact": "Token"}));
    assert_eq!(a, b);
    assert_eq!(a.0.len(), 64);
  }

  #[test]
  fn fingerprint_changes_with_value() {
    let a = Fingerprint::of(&json!({"args": ["1"]}));
    let b = Fingerprint::of(&json!({"args": ["2"]}));
    assert_ne!(a, b);
  }

  #[test]
  fn hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let hash1 = hash_directory(temp.path(), &[]).unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn hash_respects_exclusions() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "content").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::create_dir(temp.path().join("cache")).unwrap();
    fs::write(temp.path().join("cache/entry"), "temp").unwrap();

    let hash2 = hash_directory(temp.path(), &["cache"]).unwrap();
    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_path_handles_files_and_directories() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("deploy.sh");
    fs::write(&file, "echo hi").unwrap();

    assert_eq!(hash_path(&file).unwrap(), hash_file(&file).unwrap());
    assert_eq!(
      hash_path(temp.path()).unwrap(),
      hash_directory(temp.path(), &[]).unwrap()
    );
  }

  #[test]
  fn hash_file_missing_is_error() {
    let temp = tempdir().unwrap();
    let result = hash_file(&temp.path().join("missing"));
    assert!(matches!(result, Err(DirHashError::ReadFile { .. })));
  }
}
