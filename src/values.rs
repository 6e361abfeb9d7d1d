//! Flat configuration values handed to the infrastructure template.
//!
//! Values are collected as dotted `key -> string` pairs and rendered into the
//! nested document the chart expects just before installation.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Ordered mapping of dotted template keys to string values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReleaseValues {
    entries: BTreeMap<String, String>,
}

impl ReleaseValues {
    /// Creates an empty value set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Parses `key=value` overrides in order; later entries win.
    ///
    /// # Errors
    ///
    /// Returns [`ValuesError::InvalidOverride`] when an entry lacks `=` or
    /// has an empty key.
    pub fn from_overrides<I, S>(overrides: I) -> Result<Self, ValuesError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = Self::new();
        for raw in overrides {
            let entry = raw.as_ref();
            let Some((key, value)) = entry.split_once('=') else {
                return Err(ValuesError::InvalidOverride {
                    entry: entry.to_owned(),
                });
            };
            if key.trim().is_empty() {
                return Err(ValuesError::InvalidOverride {
                    entry: entry.to_owned(),
                });
            }
            values.set(key.trim(), value);
        }
        Ok(values)
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Sets `key` to the textual form of a boolean.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.set(key, value.to_string())
    }

    /// Returns the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns a copy of `self` with every entry of `overrides` applied on
    /// top. Keys present in both take the override's value.
    #[must_use]
    pub fn merged_with(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.set(key.clone(), value.clone());
        }
        merged
    }

    /// Renders the flat set into a nested document.
    ///
    /// `true`/`false` become booleans and plain integers become numbers; all
    /// other values stay strings.
    ///
    /// # Errors
    ///
    /// Returns [`ValuesError::Conflict`] when a key is used both as a leaf and
    /// as a parent, or [`ValuesError::InvalidKey`] for keys with empty
    /// segments.
    pub fn to_document(&self) -> Result<Value, ValuesError> {
        let mut root = Map::new();
        for (key, value) in &self.entries {
            insert_path(&mut root, key, typed_value(value))?;
        }
        Ok(Value::Object(root))
    }
}

impl<'a> IntoIterator for &'a ReleaseValues {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Errors raised while building or rendering template values.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValuesError {
    /// Raised when a user override is not of the form `key=value`.
    #[error("invalid value override '{entry}': expected key=value")]
    InvalidOverride {
        /// Entry as supplied by the user.
        entry: String,
    },
    /// Raised when a dotted key has an empty segment.
    #[error("invalid value key '{key}'")]
    InvalidKey {
        /// Offending key.
        key: String,
    },
    /// Raised when a key is both a leaf and the parent of another key.
    #[error("value key '{key}' conflicts with '{existing}'")]
    Conflict {
        /// Key being inserted.
        key: String,
        /// Prefix already holding a scalar.
        existing: String,
    },
}

fn typed_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .ok()
            .filter(|_| !raw.starts_with('+') && !(raw.starts_with('0') && raw.len() > 1))
            .map_or_else(|| Value::String(raw.to_owned()), |n| Value::Number(Number::from(n))),
    }
}

fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<(), ValuesError> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ValuesError::InvalidKey {
            key: key.to_owned(),
        });
    }
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(ValuesError::InvalidKey {
            key: key.to_owned(),
        });
    };

    let mut current = root;
    let mut walked = String::new();
    for segment in parents {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);
        let slot = current
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(next) = slot else {
            return Err(ValuesError::Conflict {
                key: key.to_owned(),
                existing: walked,
            });
        };
        current = next;
    }

    if matches!(current.get(*leaf), Some(Value::Object(_))) {
        return Err(ValuesError::Conflict {
            key: key.to_owned(),
            existing: key.to_owned(),
        });
    }
    current.insert((*leaf).to_owned(), value);
    Ok(())
}
