//! Flat key-value settings supplied by the host application.
//!
//! Keys are dotted and namespaced (`ldap.url`, `ldap.example.user.baseDn`).
//! Settings can be built programmatically, from a `.properties` style file or
//! from a TOML document whose nested tables are flattened into dotted keys.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LdapError, LdapResult};

/// Immutable view over the host configuration bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Creates an empty settings bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, returning the updated bag.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Removes a property, returning the updated bag.
    #[must_use]
    pub fn remove(mut self, key: &str) -> Self {
        self.values.remove(key);
        self
    }

    /// Parses `key=value` lines. `#` and `!` start comment lines.
    pub fn from_properties(content: &str) -> LdapResult<Self> {
        let mut values = BTreeMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                return Err(LdapError::config(format!(
                    "line {}: expected 'key=value', got '{line}'",
                    index + 1
                )));
            };
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            if key.is_empty() {
                return Err(LdapError::config(format!("line {}: empty key", index + 1)));
            }
            values.insert(key.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    /// Parses a TOML document, flattening nested tables into dotted keys.
    ///
    /// Arrays are joined with commas, so `servers = ["a", "b"]` under `[ldap]`
    /// is equivalent to `ldap.servers=a,b`.
    pub fn from_toml(content: &str) -> LdapResult<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| LdapError::config(format!("failed to parse settings: {e}")))?;
        let mut values = BTreeMap::new();
        flatten_table(None, &table, &mut values);
        Ok(Self { values })
    }

    /// Loads settings from a file, choosing the format by extension
    /// (`.toml`, anything else is read as properties).
    pub fn load(path: impl AsRef<Path>) -> LdapResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LdapError::config(format!("unable to read settings {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_properties(&content),
        }
    }

    /// Returns a property value. Blank values are treated as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns a property value or the given default.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns a comma separated property as trimmed, non-empty items.
    #[must_use]
    pub fn get_array(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns a property parsed as a number of milliseconds.
    pub fn get_millis(&self, key: &str) -> LdapResult<Option<u64>> {
        self.get(key)
            .map(|value| {
                value.trim().parse::<u64>().map_err(|_| {
                    LdapError::config(format!(
                        "property '{key}' must be a number of milliseconds, got '{value}'"
                    ))
                })
            })
            .transpose()
    }

    /// Checks whether a non-blank property exists.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over every non-blank key starting with `prefix`.
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.values
            .iter()
            .filter(move |(key, value)| key.starts_with(prefix) && !value.trim().is_empty())
            .map(|(key, _)| key.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for Settings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

fn flatten_table(prefix: Option<&str>, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full_key = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            toml::Value::Table(nested) => flatten_table(Some(&full_key), nested, out),
            other => {
                out.insert(full_key, scalar_to_string(other));
            }
        }
    }
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
