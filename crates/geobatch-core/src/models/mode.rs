use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GeobatchError;

/// Execution strategy for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Remote reduction, one chunk at a time
    Sequential,
    /// Remote reduction, several chunks in flight
    Concurrent,
    /// Download tiles and reduce them locally
    Local,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Concurrent => "concurrent",
            ExecutionMode::Local => "local",
        }
    }

    /// Whether reduction is delegated to the remote service
    pub fn is_remote(&self) -> bool {
        !matches!(self, ExecutionMode::Local)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = GeobatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "concurrent" => Ok(ExecutionMode::Concurrent),
            "local" => Ok(ExecutionMode::Local),
            _ => Err(GeobatchError::ConfigInvalid {
                key: "mode".to_string(),
                reason: format!("Invalid mode: {}. Use sequential, concurrent, or local", s),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("sequential".parse::<ExecutionMode>().unwrap(), ExecutionMode::Sequential);
        assert_eq!("CONCURRENT".parse::<ExecutionMode>().unwrap(), ExecutionMode::Concurrent);
        assert_eq!("local".parse::<ExecutionMode>().unwrap(), ExecutionMode::Local);
        assert!("parallel".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_remote_modes() {
        assert!(ExecutionMode::Sequential.is_remote());
        assert!(ExecutionMode::Concurrent.is_remote());
        assert!(!ExecutionMode::Local.is_remote());
    }
}
