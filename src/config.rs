//! Configuration for the writer and the in-memory engine.
//!
//! Both structs deserialize from JSON with every field optional; durations
//! are expressed in milliseconds.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Writer defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Timeout used by `flush_default`. `None` blocks indefinitely.
    #[serde(rename = "flush_timeout_ms", with = "millis")]
    pub flush_timeout: Option<Duration>,
    /// Timeout used by `end_episode_default`. `None` blocks indefinitely.
    #[serde(rename = "end_episode_timeout_ms", with = "millis")]
    pub end_episode_timeout: Option<Duration>,
}

impl WriterConfig {
    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&read(path.as_ref())?)
    }
}

/// A destination table of the in-memory engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Name items are addressed to.
    pub name: String,
    /// Items the table holds before further items stay outstanding.
    pub capacity: usize,
}

/// In-memory engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryEngineConfig {
    /// Upper bound on any column's keep-alive window.
    pub max_num_keep_alive_refs: usize,
    /// Tables items can be delivered to.
    pub tables: Vec<TableConfig>,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            max_num_keep_alive_refs: 10,
            tables: Vec::new(),
        }
    }
}

impl MemoryEngineConfig {
    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.tables.push(TableConfig {
            name: name.into(),
            capacity,
        });
        self
    }

    /// Sets the keep-alive upper bound.
    #[must_use]
    pub const fn with_max_num_keep_alive_refs(mut self, max: usize) -> Self {
        self.max_num_keep_alive_refs = max;
        self
    }

    /// Checks bounds and table name uniqueness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_num_keep_alive_refs == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_num_keep_alive_refs must be >= 1".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.capacity == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("table '{}' must have capacity >= 1", table.name),
                });
            }
            if !seen.insert(table.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate table '{}'", table.name),
                });
            }
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&read(path.as_ref())?)
    }
}

fn read(path: &std::path::Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
