//! Template parsing and substitution for step configuration.
//!
//! Step configuration may reference values that only exist once earlier steps
//! have run: contract addresses, transaction hashes, imported outputs and
//! settings. This module parses those references and substitutes them from a
//! resolver, usually the JSON scope of the build context.
//!
//! # Template Format
//!
//! - `<%= contracts.Token.address %>` - dotted path lookup into the scope
//! - `<%= settings.owner %>` - caller supplied or default setting
//! - `<%= imports.sub.contracts.Pool.address %>` - output of an imported build
//! - `<%= contracts.Token.constructorArgs.0 %>` - numeric segments index arrays
//!
//! Only lookups are supported. Evaluation blocks (`<% ... %>`) are rejected.
//!
//! # Escaping
//!
//! `<%%` produces a literal `<%`.
//!
//! # Example
//!
//! ```
//! use cannon_lib::template::{parse, Reference, Segment};
//!
//! let segments = parse("owner: <%= settings.owner %>").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("owner: ".to_string()),
//!     Segment::Placeholder(Reference::from_dotted("settings.owner")),
//! ]);
//! ```

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

/// A dotted path into the template scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(pub Vec<String>);

impl Reference {
  /// Build a reference from `a.b.c` without validation.
  pub fn from_dotted(path: &str) -> Self {
    Reference(path.split('.').map(str::to_string).collect())
  }

  /// First path segment (`contracts`, `settings`, ...).
  pub fn root(&self) -> &str {
    self.0.first().map(String::as_str).unwrap_or_default()
  }

  /// Second path segment, the entry name inside a namespace.
  pub fn entry(&self) -> Option<&str> {
    self.0.get(1).map(String::as_str)
  }
}

impl std::fmt::Display for Reference {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0.join("."))
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A reference to be resolved
  Placeholder(Reference),
}

/// Errors that can occur during template parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("empty placeholder at position {0}")]
  Empty(usize),

  #[error("evaluation blocks are not supported (position {0}); use <%= path %>")]
  Unsupported(usize),

  #[error("malformed placeholder: '{0}'")]
  Malformed(String),

  #[error("unresolved template reference: {path}")]
  Unresolved { path: String },
}

/// Resolves references during substitution.
pub trait Resolver {
  fn resolve(&self, reference: &Reference) -> Result<Cow<'_, str>, TemplateError>;
}

/// A JSON document resolves references by walking objects and arrays.
///
/// Strings substitute verbatim, numbers and booleans as their text form,
/// arrays and objects as compact JSON. `null` and missing keys are unresolved.
impl Resolver for Value {
  fn resolve(&self, reference: &Reference) -> Result<Cow<'_, str>, TemplateError> {
    let unresolved = || TemplateError::Unresolved {
      path: reference.to_string(),
    };

    let mut current = self;
    for segment in &reference.0 {
      current = match current {
        Value::Object(map) => map.get(segment).ok_or_else(unresolved)?,
        Value::Array(items) => segment
          .parse::<usize>()
          .ok()
          .and_then(|i| items.get(i))
          .ok_or_else(unresolved)?,
        _ => return Err(unresolved()),
      };
    }

    match current {
      Value::Null => Err(unresolved()),
      Value::String(s) => Ok(Cow::Borrowed(s.as_str())),
      other => Ok(Cow::Owned(other.to_string())),
    }
  }
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed, empty, malformed, or an
/// evaluation block.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(idx) = rest.find("<%") {
    literal.push_str(&rest[..idx]);
    let pos = offset + idx;
    let after = &rest[idx + 2..];

    let consumed = if after.starts_with('%') {
      // Escaped: <%% -> <%
      literal.push_str("<%");
      idx + 3
    } else if let Some(body) = after.strip_prefix('=') {
      let end = body.find("%>").ok_or(TemplateError::Unclosed(pos))?;
      let reference = parse_reference(body[..end].trim(), pos)?;

      if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(&mut literal)));
      }
      segments.push(Segment::Placeholder(reference));

      idx + 3 + end + 2
    } else {
      return Err(TemplateError::Unsupported(pos));
    };

    offset += consumed;
    rest = &rest[consumed..];
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the expression inside a placeholder into a dotted reference.
fn parse_reference(expr: &str, pos: usize) -> Result<Reference, TemplateError> {
  if expr.is_empty() {
    return Err(TemplateError::Empty(pos));
  }

  let valid_segment = |s: &&str| {
    !s.is_empty()
      && s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '$')
  };

  let parts: Vec<&str> = expr.split('.').collect();
  if !parts.iter().all(valid_segment) {
    return Err(TemplateError::Malformed(expr.to_string()));
  }

  Ok(Reference(parts.into_iter().map(str::to_string).collect()))
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, TemplateError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, TemplateError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(reference) => result.push_str(&resolver.resolve(reference)?),
    }
  }

  Ok(result)
}

/// Collect every reference appearing in a string.
pub fn references(input: &str) -> Result<Vec<Reference>, TemplateError> {
  Ok(
    parse(input)?
      .into_iter()
      .filter_map(|segment| match segment {
        Segment::Placeholder(reference) => Some(reference),
        Segment::Literal(_) => None,
      })
      .collect(),
  )
}

/// Collect every reference appearing in any string inside a JSON value.
///
/// Object keys are not templated and are not scanned.
pub fn value_references(value: &Value) -> Result<Vec<Reference>, TemplateError> {
  let mut found = Vec::new();
  collect_references(value, &mut found)?;
  Ok(found)
}

fn collect_references(value: &Value, found: &mut Vec<Reference>) -> Result<(), TemplateError> {
  match value {
    Value::String(s) => found.extend(references(s)?),
    Value::Array(items) => {
      for item in items {
        collect_references(item, found)?;
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_references(item, found)?;
      }
    }
    Value::Null | Value::Bool(_) | Value::Number(_) => {}
  }
  Ok(())
}

/// Substitute every string inside a JSON value, recursively.
pub fn inject_value(value: &Value, resolver: &impl Resolver) -> Result<Value, TemplateError> {
  Ok(match value {
    Value::String(s) => Value::String(substitute(s, resolver)?),
    Value::Array(items) => Value::Array(
      items
        .iter()
        .map(|item| inject_value(item, resolver))
        .collect::<Result<_, _>>()?,
    ),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| Ok((k.clone(), inject_value(v, resolver)?)))
        .collect::<Result<_, TemplateError>>()?,
    ),
    other => other.clone(),
  })
}
