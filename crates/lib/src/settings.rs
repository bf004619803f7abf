//! `key=value` setting arguments.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
  #[error("invalid setting '{0}', expected key=value")]
  Malformed(String),

  #[error("setting '{0}' given more than once")]
  Duplicate(String),
}

/// Parse `key=value` pairs. The value may itself contain `=` and may be empty.
pub fn parse_settings<S: AsRef<str>>(args: &[S]) -> Result<BTreeMap<String, String>, SettingsError> {
  let mut settings = BTreeMap::new();
  for arg in args {
    let arg = arg.as_ref();
    let (key, value) = arg
      .split_once('=')
      .filter(|(key, _)| !key.trim().is_empty())
      .ok_or_else(|| SettingsError::Malformed(arg.to_string()))?;

    let key = key.trim().to_string();
    if settings.insert(key.clone(), value.to_string()).is_some() {
      return Err(SettingsError::Duplicate(key));
    }
  }
  Ok(settings)
}
