//! Resolved configuration document

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use toml::{Table, Value};

/// A fully rendered and parsed configuration.
///
/// Values are plain data. Handing out a clone gives the caller a copy
/// that cannot affect the memoized original.
#[derive(Clone, PartialEq, Default)]
pub struct ResolvedConfig {
    table: Table,
}

impl ResolvedConfig {
    pub fn new(table: Table) -> Self {
        Self { table }
    }

    /// Parse rendered TOML text
    pub fn parse(rendered: &str) -> Result<Self> {
        let table: Table = toml::from_str(rendered).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self { table })
    }

    /// Look up a value by dotted key, e.g. `database.host`
    pub fn get(&self, dotted_key: &str) -> Option<&Value> {
        let mut parts = dotted_key.split('.');
        let mut current = self.table.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Table(table) => table.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Look up a string value by dotted key
    pub fn get_str(&self, dotted_key: &str) -> Option<&str> {
        self.get(dotted_key).and_then(Value::as_str)
    }

    pub fn as_table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Deserialize into an application-defined type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Value::Table(self.table.clone())
            .try_into()
            .map_err(|e: toml::de::Error| Error::Parse(e.to_string()))
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.table).map_err(|e| Error::Parse(e.to_string()))
    }
}

// Values are resolved secrets; only top-level keys are printed.
impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("keys", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}
