//! Engine configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;

use story_graph::EdgeRemovalPolicy;

use crate::error::ConfigError;

/// Tunables for the execution core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cursor visits allowed in one turn before the cycle guard trips.
    pub step_budget: usize,

    /// Maximum nesting of template builds triggered by one requirement.
    pub max_resolution_depth: usize,

    /// Fail rendering on placeholders with no binding instead of leaving them as-is.
    pub strict_rendering: bool,

    /// What removing a node does to its edges.
    pub edge_removal: EdgeRemovalPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_budget: 32,
            max_resolution_depth: 8,
            strict_rendering: false,
            edge_removal: EdgeRemovalPolicy::Cascade,
        }
    }
}

impl EngineConfig {
    /// Parse from TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_budget == 0 {
            return Err(ConfigError::Invalid {
                field: "step_budget",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_resolution_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.step_budget, 32);
        assert_eq!(config.max_resolution_depth, 8);
        assert!(!config.strict_rendering);
        assert_eq!(config.edge_removal, EdgeRemovalPolicy::Cascade);
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            step_budget = 4
            edge_removal = "reject"
            "#,
        )
        .unwrap();

        assert_eq!(config.step_budget, 4);
        assert_eq!(config.edge_removal, EdgeRemovalPolicy::Reject);
        assert_eq!(config.max_resolution_depth, 8);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("step_budget = 0"),
            Err(ConfigError::Invalid {
                field: "step_budget",
                ..
            })
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("step_budget = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here/engine.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
