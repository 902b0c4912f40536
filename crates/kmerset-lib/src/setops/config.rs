//! Set-operation configuration

use std::fmt;
use std::str::FromStr;

/// Which join strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    /// Sorted merge when every input is sorted, hash join otherwise
    #[default]
    Auto,
    /// Always hash join
    Hash,
    /// Always sorted merge; unsorted inputs are rejected
    Merge,
}

impl fmt::Display for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyChoice::Auto => "auto",
            StrategyChoice::Hash => "hash",
            StrategyChoice::Merge => "merge",
        })
    }
}

impl FromStr for StrategyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(StrategyChoice::Auto),
            "hash" => Ok(StrategyChoice::Hash),
            "merge" => Ok(StrategyChoice::Merge),
            other => Err(format!("unknown strategy '{other}', expected auto, hash or merge")),
        }
    }
}

/// Configuration parameters for set operations
#[derive(Debug, Clone)]
pub struct SetConfiguration {
    /// Sort hash-join output before writing
    pub sort_output: bool,

    /// Accept inputs that disagree on taxid presence
    pub mixed_taxid: bool,

    /// Strategy selection
    pub strategy: StrategyChoice,

    /// Write outputs with compact code widths
    pub compact: bool,
}

impl Default for SetConfiguration {
    fn default() -> Self {
        Self {
            sort_output: false,
            mixed_taxid: false,
            strategy: StrategyChoice::Auto,
            compact: true,
        }
    }
}

impl SetConfiguration {
    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Set Configuration:");
        tracing::info!("  strategy = {}", self.strategy);
        tracing::info!("  sort_output = {}", self.sort_output);
        tracing::debug!("  mixed_taxid = {}", self.mixed_taxid);
        tracing::debug!("  compact = {}", self.compact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("hash".parse::<StrategyChoice>().unwrap(), StrategyChoice::Hash);
        assert_eq!("MERGE".parse::<StrategyChoice>().unwrap(), StrategyChoice::Merge);
        assert!("btree".parse::<StrategyChoice>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SetConfiguration::default();
        assert_eq!(config.strategy, StrategyChoice::Auto);
        assert!(!config.sort_output);
        assert!(config.compact);
    }
}
