//! Chunker configuration.
//!
//! Each column is chunked by the engine according to a [`ChunkerOptions`]
//! policy. Policies may be requested for paths the writer has not seen yet;
//! those are parked in the [`ChunkerConfigManager`] and handed to the engine
//! exactly once, when the path is first observed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::path::Path;

/// Chunking policy for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkerOptions {
    /// Let the engine pick chunk lengths, trading latency for throughput.
    AutoTuned {
        num_keep_alive_refs: usize,
        throughput_weight: f64,
    },
    /// Fixed maximum chunk length.
    Constant {
        num_keep_alive_refs: usize,
        max_chunk_length: usize,
    },
}

impl ChunkerOptions {
    /// Throughput weight used when no chunk length is given.
    pub const DEFAULT_THROUGHPUT_WEIGHT: f64 = 1.0;

    /// Validates raw parameters and builds the policy.
    ///
    /// Requires `1 <= num_keep_alive_refs <= max_num_keep_alive_refs` and, when
    /// a chunk length is given, `1 <= max_chunk_length <= num_keep_alive_refs`.
    /// Without a chunk length the policy is auto-tuned.
    pub fn from_params(
        num_keep_alive_refs: i64,
        max_chunk_length: Option<i64>,
        max_num_keep_alive_refs: usize,
    ) -> Result<Self, ValidationError> {
        let keep_alive = usize::try_from(num_keep_alive_refs)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ValidationError::InvalidParameter {
                name: "num_keep_alive_refs".to_string(),
                reason: format!("must be >= 1 but got {num_keep_alive_refs}"),
            })?;

        if keep_alive > max_num_keep_alive_refs {
            return Err(ValidationError::InvalidParameter {
                name: "num_keep_alive_refs".to_string(),
                reason: format!(
                    "must be <= max_num_keep_alive_refs ({max_num_keep_alive_refs}) but got {keep_alive}"
                ),
            });
        }

        let Some(max_chunk_length) = max_chunk_length else {
            return Ok(Self::AutoTuned {
                num_keep_alive_refs: keep_alive,
                throughput_weight: Self::DEFAULT_THROUGHPUT_WEIGHT,
            });
        };

        let chunk_length = usize::try_from(max_chunk_length)
            .ok()
            .filter(|n| (1..=keep_alive).contains(n))
            .ok_or_else(|| ValidationError::InvalidParameter {
                name: "max_chunk_length".to_string(),
                reason: format!(
                    "must be in range [1, num_keep_alive_refs ({keep_alive})] but got {max_chunk_length}"
                ),
            })?;

        Ok(Self::Constant {
            num_keep_alive_refs: keep_alive,
            max_chunk_length: chunk_length,
        })
    }

    /// Number of most recent references the engine keeps alive.
    #[must_use]
    pub const fn num_keep_alive_refs(&self) -> usize {
        match self {
            Self::AutoTuned { num_keep_alive_refs, .. } | Self::Constant { num_keep_alive_refs, .. } => {
                *num_keep_alive_refs
            }
        }
    }
}

/// Holds chunker policies for columns that have not been observed yet.
#[derive(Debug, Default)]
pub struct ChunkerConfigManager {
    pending: HashMap<Path, ChunkerOptions>,
}

impl ChunkerConfigManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `options` until `path` is observed. A later request for the same
    /// path replaces the earlier one.
    pub fn defer(&mut self, path: Path, options: ChunkerOptions) {
        self.pending.insert(path, options);
    }

    /// Policy parked for `path`, if any.
    #[must_use]
    pub fn pending(&self, path: &Path) -> Option<&ChunkerOptions> {
        self.pending.get(path)
    }

    /// Drops the parked policy for `path` once the engine has accepted it.
    pub fn take(&mut self, path: &Path) -> Option<ChunkerOptions> {
        self.pending.remove(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(keep_alive: i64, chunk: Option<i64>) -> bool {
        ChunkerOptions::from_params(keep_alive, chunk, 10).is_ok()
    }

    #[test]
    fn test_param_validation() {
        assert!(valid(1, None));
        assert!(!valid(0, None));
        assert!(!valid(-1, None));
        assert!(valid(1, Some(1)));
        assert!(!valid(1, Some(0)));
        assert!(!valid(1, Some(-1)));
        assert!(valid(5, Some(5)));
        assert!(!valid(4, Some(5)));
    }

    #[test]
    fn test_keep_alive_bounded_by_engine() {
        let err = ChunkerOptions::from_params(11, None, 10).unwrap_err();
        assert!(format!("{err}").contains("max_num_keep_alive_refs (10)"));
        assert!(ChunkerOptions::from_params(10, None, 10).is_ok());
    }

    #[test]
    fn test_auto_tuned_when_no_chunk_length() {
        let options = ChunkerOptions::from_params(2, None, 10).unwrap();
        assert_eq!(
            options,
            ChunkerOptions::AutoTuned {
                num_keep_alive_refs: 2,
                throughput_weight: 1.0,
            }
        );
        assert_eq!(options.num_keep_alive_refs(), 2);
    }

    #[test]
    fn test_constant_when_chunk_length_given() {
        let options = ChunkerOptions::from_params(2, Some(1), 10).unwrap();
        assert_eq!(
            options,
            ChunkerOptions::Constant {
                num_keep_alive_refs: 2,
                max_chunk_length: 1,
            }
        );
    }

    #[test]
    fn test_manager_keeps_policy_until_taken() {
        let mut manager = ChunkerConfigManager::new();
        let options = ChunkerOptions::from_params(2, Some(1), 10).unwrap();
        manager.defer(Path::from("z"), options.clone());
        assert_eq!(manager.pending(&Path::from("z")), Some(&options));
        assert_eq!(manager.pending(&Path::from("z")), Some(&options));
        assert_eq!(manager.take(&Path::from("z")), Some(options));
        assert_eq!(manager.take(&Path::from("z")), None);
        assert!(manager.pending(&Path::from("z")).is_none());
    }

    #[test]
    fn test_serialization() {
        let options = ChunkerOptions::Constant {
            num_keep_alive_refs: 4,
            max_chunk_length: 2,
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["type"], "constant");
        let back: ChunkerOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back, options);
    }
}
