use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::steps::StepRegistry;
use crate::template;
use crate::util::hash::canonical_json;

use super::dag::DependencyGraph;

/// Top-level keys that describe the package rather than a step kind.
const METADATA_KEYS: &[&str] = &["name", "version", "description", "keywords"];

/// Table holding `[setting.<name>]` declarations.
const SETTINGS_KEY: &str = "setting";

/// Step ids in source order, recorded alongside the parsed tables so a
/// stored snapshot orders its steps the same way as the file it came from.
const STEP_ORDER_KEY: &str = "stepOrder";

#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("failed to read definition {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse definition: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("invalid definition: {0}")]
  Invalid(String),

  #[error("invalid version '{version}': {message}")]
  InvalidVersion { version: String, message: String },

  #[error("unknown step kind '{kind}' (known kinds: {known})")]
  UnknownKind { kind: String, known: String },

  #[error("invalid configuration for step {step}: {message}")]
  Schema { step: String, message: String },

  #[error("step {step} depends on unknown step '{dependency}'")]
  MissingDependency { step: String, dependency: String },

  #[error("dependency cycle detected involving step {step}")]
  Cycle { step: String },

  #[error("setting '{0}' has no value and no default")]
  MissingSetting(String),

  #[error("invalid package reference '{0}', expected name:version")]
  InvalidPackageRef(String),

  #[error("package reference '{0}' has an empty or path-like name or version")]
  UnsafePackageRef(String),
}

/// A `name:version` package reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageRef {
  pub name: String,
  pub version: String,
}

impl PackageRef {
  pub fn new(name: &str, version: &str) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
    }
  }

  /// Parse `name:version`. Both parts must be non-empty and safe to use as
  /// directory names.
  pub fn parse(input: &str) -> Result<Self, DefinitionError> {
    match input.split_once(':') {
      Some((name, version)) if !name.is_empty() && !version.is_empty() && !version.contains(':') => {
        let package = Self::new(name, version);
        package.validate()?;
        Ok(package)
      }
      _ => Err(DefinitionError::InvalidPackageRef(input.to_string())),
    }
  }

  /// Packages are stored under `<name>/<version>/`, so neither part may be
  /// empty, `.`, `..` or contain a path separator.
  pub fn validate(&self) -> Result<(), DefinitionError> {
    let unsafe_part = |part: &str| part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']);
    if unsafe_part(&self.name) || unsafe_part(&self.version) {
      return Err(DefinitionError::UnsafePackageRef(self.to_string()));
    }
    Ok(())
  }
}

impl std::fmt::Display for PackageRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.name, self.version)
  }
}

/// A `[setting.<name>]` declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingDef {
  #[serde(default)]
  pub default_value: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}

/// One named unit of work.
#[derive(Debug, Clone)]
pub struct Step {
  /// `<kind>.<name>`, unique within the definition.
  pub id: String,
  pub kind: String,
  pub name: String,
  /// Raw configuration, placeholders unresolved.
  pub config: Value,
  /// Step ids listed in `depends`.
  pub depends: Vec<String>,
  /// Step ids inferred from template references and plain step names.
  pub implicit: Vec<String>,
}

impl Step {
  /// Union of explicit and implicit dependencies.
  pub fn dependencies(&self) -> BTreeSet<&str> {
    self
      .depends
      .iter()
      .chain(self.implicit.iter())
      .map(String::as_str)
      .collect()
  }
}

/// A parsed deployment definition.
///
/// Steps are kept in declaration order, which breaks ties in the execution
/// order. Equality ignores declaration order.
#[derive(Debug, Clone)]
pub struct Definition {
  pub name: String,
  pub version: String,
  pub description: Option<String>,
  pub settings: BTreeMap<String, SettingDef>,
  steps: Vec<Step>,
  raw: Value,
}

impl Definition {
  /// Read and parse a TOML definition file with the default step kinds.
  pub fn load(path: &Path) -> Result<Self, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// Parse a TOML definition with the default step kinds.
  pub fn from_toml_str(input: &str) -> Result<Self, DefinitionError> {
    Self::from_toml_str_with(input, &StepRegistry::default())
  }

  pub fn from_toml_str_with(input: &str, registry: &StepRegistry) -> Result<Self, DefinitionError> {
    let table: toml::Table = toml::from_str(input)?;
    // Tables of one kind are grouped together once parsed; source offsets
    // keep `[contract.A]`, `[invoke.x]`, `[contract.B]` in that order.
    let positions: StepPositions = toml::from_str(input)?;

    let mut raw = serde_json::to_value(&table).map_err(|e| DefinitionError::Invalid(e.to_string()))?;
    if let Value::Object(map) = &mut raw {
      map.insert(STEP_ORDER_KEY.to_string(), Value::from(positions.into_ids()));
    }
    Self::parse(&raw, registry)
  }

  /// Parse a definition from its JSON form, e.g. a stored snapshot.
  pub fn parse(raw: &Value, registry: &StepRegistry) -> Result<Self, DefinitionError> {
    let table = raw
      .as_object()
      .ok_or_else(|| DefinitionError::Invalid("definition must be a table".to_string()))?;

    let name = required_str(table, "name")?;
    let version = required_str(table, "version")?;
    semver::Version::parse(&version).map_err(|e| DefinitionError::InvalidVersion {
      version: version.clone(),
      message: e.to_string(),
    })?;
    PackageRef::new(&name, &version).validate()?;

    let description = match table.get("description") {
      None => None,
      Some(Value::String(s)) => Some(s.clone()),
      Some(_) => return Err(DefinitionError::Invalid("`description` must be a string".to_string())),
    };

    let settings = match table.get(SETTINGS_KEY) {
      None => BTreeMap::new(),
      Some(value) => serde_json::from_value(value.clone()).map_err(|e| DefinitionError::Schema {
        step: SETTINGS_KEY.to_string(),
        message: e.to_string(),
      })?,
    };

    let mut steps = Vec::new();
    for (key, value) in table {
      if METADATA_KEYS.contains(&key.as_str()) || key == SETTINGS_KEY || key == STEP_ORDER_KEY {
        continue;
      }

      let Some(entries) = value.as_object() else {
        return Err(DefinitionError::Invalid(format!("unexpected top-level key `{key}`")));
      };

      let executor = registry.get(key).ok_or_else(|| DefinitionError::UnknownKind {
        kind: key.clone(),
        known: registry.kinds().join(", "),
      })?;

      for (step_name, config) in entries {
        let id = format!("{key}.{step_name}");
        executor
          .validate(config)
          .map_err(|message| DefinitionError::Schema {
            step: id.clone(),
            message,
          })?;

        steps.push(Step {
          depends: depends_of(config),
          id,
          kind: key.clone(),
          name: step_name.clone(),
          config: config.clone(),
          implicit: Vec::new(),
        });
      }
    }

    if let Some(order) = table.get(STEP_ORDER_KEY).and_then(Value::as_array) {
      let rank: BTreeMap<&str, usize> = order
        .iter()
        .filter_map(Value::as_str)
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect();
      steps.sort_by_key(|s| rank.get(s.id.as_str()).copied().unwrap_or(usize::MAX));
    }

    infer_implicit_dependencies(&mut steps, registry)?;
    check_explicit_dependencies(&steps)?;

    Ok(Self {
      name,
      version,
      description,
      settings,
      steps,
      raw: raw.clone(),
    })
  }

  pub fn package(&self) -> PackageRef {
    PackageRef::new(&self.name, &self.version)
  }

  /// Steps in declaration order.
  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  pub fn step(&self, id: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.id == id)
  }

  /// The JSON form persisted with deployment records.
  pub fn to_value(&self) -> Value {
    self.raw.clone()
  }

  /// Steps in execution order.
  ///
  /// Every step comes after all of its explicit and implicit dependencies;
  /// unrelated steps keep their declaration order.
  pub fn topological_order(&self) -> Result<Vec<&Step>, DefinitionError> {
    let graph = DependencyGraph::from_steps(&self.steps);
    let order = graph.order().map_err(|index| DefinitionError::Cycle {
      step: self.steps[index].id.clone(),
    })?;
    Ok(order.into_iter().map(|index| &self.steps[index]).collect())
  }

  /// Resolve setting values: caller option, then declared default.
  ///
  /// Options that are not declared settings pass through unchanged.
  pub fn resolve_settings(&self, options: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>, DefinitionError> {
    let mut resolved = options.clone();
    for (name, def) in &self.settings {
      if resolved.contains_key(name) {
        continue;
      }
      match &def.default_value {
        Some(default) => {
          resolved.insert(name.clone(), default.clone());
        }
        None => return Err(DefinitionError::MissingSetting(name.clone())),
      }
    }
    Ok(resolved)
  }

  fn comparable_steps(&self) -> BTreeMap<&str, (&str, String, BTreeSet<&str>)> {
    self
      .steps
      .iter()
      .map(|s| (s.id.as_str(), (s.kind.as_str(), canonical_json(&s.config), s.dependencies())))
      .collect()
  }
}

impl PartialEq for Definition {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name
      && self.version == other.version
      && self.description == other.description
      && self.settings == other.settings
      && self.comparable_steps() == other.comparable_steps()
  }
}

fn required_str(table: &serde_json::Map<String, Value>, key: &str) -> Result<String, DefinitionError> {
  match table.get(key) {
    Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
    Some(_) => Err(DefinitionError::Invalid(format!("`{key}` must be a non-empty string"))),
    None => Err(DefinitionError::Invalid(format!("missing `{key}`"))),
  }
}

fn depends_of(config: &Value) -> Vec<String> {
  config
    .get("depends")
    .and_then(Value::as_array)
    .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
    .unwrap_or_default()
}

/// Add an edge for every template reference into a namespace published by a
/// step of this definition (`contracts.X` -> `contract.X`, ...), and for
/// every step a kind names without a template (an invoke `target`).
fn infer_implicit_dependencies(steps: &mut [Step], registry: &StepRegistry) -> Result<(), DefinitionError> {
  let publishers: BTreeMap<(&'static str, String), String> = steps
    .iter()
    .filter_map(|s| {
      let namespace = registry.get(&s.kind)?.namespace()?;
      Some(((namespace.as_str(), s.name.clone()), s.id.clone()))
    })
    .collect();

  for step in steps.iter_mut() {
    let references = template::value_references(&step.config).map_err(|e| DefinitionError::Schema {
      step: step.id.clone(),
      message: e.to_string(),
    })?;

    let mut implicit = BTreeSet::new();
    for reference in references {
      let Some(entry) = reference.entry() else {
        continue;
      };
      if let Some(publisher) = publishers.get(&(namespace_key(reference.root()), entry.to_string())) {
        implicit.insert(publisher.clone());
      }
    }
    if let Some(executor) = registry.get(&step.kind) {
      for (namespace, entry) in executor.static_references(&step.config) {
        if let Some(publisher) = publishers.get(&(namespace.as_str(), entry)) {
          implicit.insert(publisher.clone());
        }
      }
    }
    step.implicit = implicit.into_iter().collect();
  }

  Ok(())
}

/// Map a template root to the static key used in the publisher table.
fn namespace_key(root: &str) -> &'static str {
  crate::steps::Namespace::from_root(root)
    .map(|ns| ns.as_str())
    .unwrap_or("")
}

/// Source offset of every `[<kind>.<name>]` table.
struct StepPositions(Vec<(usize, String)>);

impl StepPositions {
  fn into_ids(mut self) -> Vec<String> {
    self.0.sort_by_key(|(start, _)| *start);
    self.0.into_iter().map(|(_, id)| id).collect()
  }
}

impl<'de> Deserialize<'de> for StepPositions {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct Kinds;

    impl<'de> Visitor<'de> for Kinds {
      type Value = StepPositions;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a definition table")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut positions = Vec::new();
        while let Some(kind) = map.next_key::<String>()? {
          let entries: KindPositions = map.next_value()?;
          if kind == SETTINGS_KEY {
            continue;
          }
          positions.extend(entries.0.into_iter().map(|(start, name)| (start, format!("{kind}.{name}"))));
        }
        Ok(StepPositions(positions))
      }
    }

    deserializer.deserialize_map(Kinds)
  }
}

/// Offsets of the entries of one top-level value. Metadata scalars and
/// arrays have none.
struct KindPositions(Vec<(usize, String)>);

impl<'de> Deserialize<'de> for KindPositions {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct Entries;

    impl<'de> Visitor<'de> for Entries {
      type Value = KindPositions;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any value")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some(name) = map.next_key::<String>()? {
          let value: toml::Spanned<IgnoredAny> = map.next_value()?;
          entries.push((value.span().start, name));
        }
        Ok(KindPositions(entries))
      }

      fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(KindPositions(Vec::new()))
      }

      fn visit_str<E: serde::de::Error>(self, _: &str) -> Result<Self::Value, E> {
        Ok(KindPositions(Vec::new()))
      }

      fn visit_bool<E: serde::de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(KindPositions(Vec::new()))
      }

      fn visit_i64<E: serde::de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(KindPositions(Vec::new()))
      }

      fn visit_u64<E: serde::de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(KindPositions(Vec::new()))
      }

      fn visit_f64<E: serde::de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(KindPositions(Vec::new()))
      }
    }

    deserializer.deserialize_any(Entries)
  }
}

fn check_explicit_dependencies(steps: &[Step]) -> Result<(), DefinitionError> {
  let ids: BTreeSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
  for step in steps {
    if let Some(missing) = step.depends.iter().find(|d| !ids.contains(d.as_str())) {
      return Err(DefinitionError::MissingDependency {
        step: step.id.clone(),
        dependency: missing.clone(),
      });
    }
  }
  Ok(())
}
