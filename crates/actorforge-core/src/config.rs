use crate::errors::SpecializeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How connectivity is rendered in the generated program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodegenMode {
    /// Synchronous dataflow: relations become fixed circular buffers
    #[serde(rename = "deep")]
    Deep,
    /// Relations and links stay as live graph objects
    #[serde(rename = "shallow")]
    Shallow,
}

impl Default for CodegenMode {
    fn default() -> Self {
        CodegenMode::Deep
    }
}

/// Treatment of identifiers the constant-attribute analysis cannot resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantPolicy {
    /// Unresolvable free variables make an attribute non-constant
    #[serde(rename = "conservative")]
    Conservative,
    /// Unresolvable free variables are assumed constant
    #[serde(rename = "permissive")]
    Permissive,
}

impl Default for ConstantPolicy {
    fn default() -> Self {
        ConstantPolicy::Conservative
    }
}

/// Specializer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecializerConfig {
    /// Prefix for every generated class name (default: "generated")
    #[serde(default = "default_target_package")]
    pub target_package: String,

    /// Code generation mode (default: deep)
    #[serde(default)]
    pub mode: CodegenMode,

    /// Harness iteration cap; unbounded when absent
    #[serde(default)]
    pub iterations: Option<u64>,

    /// Verbose per-site logging (default: false)
    #[serde(default)]
    pub debug: bool,

    /// Abort the whole process after this many seconds
    #[serde(default)]
    pub watchdog_seconds: Option<u64>,

    /// Constant-attribute analysis policy (default: conservative)
    #[serde(default)]
    pub constant_policy: ConstantPolicy,

    /// Run the loop unroller (default: true)
    #[serde(default = "default_true")]
    pub unroll_loops: bool,

    /// Loops with a larger trip count are left alone (default: 64)
    #[serde(default = "default_max_unroll_trip_count")]
    pub max_unroll_trip_count: usize,

    /// Bound on dead-code cleanup rounds (default: 32)
    #[serde(default = "default_max_cleanup_rounds")]
    pub max_cleanup_rounds: usize,

    /// Pretty-print diagnostics (default: true)
    #[serde(default = "default_true")]
    pub pretty: bool,
}

fn default_true() -> bool {
    true
}

fn default_target_package() -> String {
    "generated".to_string()
}

fn default_max_unroll_trip_count() -> usize {
    64
}

fn default_max_cleanup_rounds() -> usize {
    32
}

impl Default for SpecializerConfig {
    fn default() -> Self {
        Self {
            target_package: default_target_package(),
            mode: CodegenMode::Deep,
            iterations: None,
            debug: false,
            watchdog_seconds: None,
            constant_policy: ConstantPolicy::Conservative,
            unroll_loops: true,
            max_unroll_trip_count: default_max_unroll_trip_count(),
            max_cleanup_rounds: default_max_cleanup_rounds(),
            pretty: true,
        }
    }
}

/// Command-line values that take precedence over the configuration file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub target_package: Option<String>,
    pub mode: Option<CodegenMode>,
    pub iterations: Option<u64>,
    pub debug: Option<bool>,
    pub watchdog_seconds: Option<u64>,
    pub constant_policy: Option<ConstantPolicy>,
    pub unroll_loops: Option<bool>,
}

impl SpecializerConfig {
    /// Load configuration from a JSON or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, SpecializeError> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: SpecializerConfig = if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| SpecializeError::Config(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| SpecializeError::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SpecializeError> {
        if self.target_package.is_empty() {
            return Err(SpecializeError::Config(
                "targetPackage must not be empty".to_string(),
            ));
        }
        if self.max_cleanup_rounds == 0 {
            return Err(SpecializeError::Config(
                "maxCleanupRounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge this configuration with CLI overrides
    pub fn merge(&mut self, overrides: &CliOverrides) {
        if let Some(package) = &overrides.target_package {
            self.target_package = package.clone();
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(iterations) = overrides.iterations {
            self.iterations = Some(iterations);
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        if let Some(seconds) = overrides.watchdog_seconds {
            self.watchdog_seconds = Some(seconds);
        }
        if let Some(policy) = overrides.constant_policy {
            self.constant_policy = policy;
        }
        if let Some(unroll) = overrides.unroll_loops {
            self.unroll_loops = unroll;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SpecializerConfig::default();
        assert_eq!(config.target_package, "generated");
        assert_eq!(config.mode, CodegenMode::Deep);
        assert_eq!(config.constant_policy, ConstantPolicy::Conservative);
        assert!(config.unroll_loops);
        assert!(config.iterations.is_none());
    }

    #[test]
    fn test_serialize_config() {
        let config = SpecializerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("targetPackage"));
        assert!(json.contains("\"mode\":\"deep\""));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SpecializerConfig =
            serde_json::from_str(r#"{"mode": "shallow", "iterations": 3}"#).unwrap();
        assert_eq!(config.mode, CodegenMode::Shallow);
        assert_eq!(config.iterations, Some(3));
        assert_eq!(config.max_unroll_trip_count, 64);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "targetPackage: demo\nconstantPolicy: permissive").unwrap();

        let config = SpecializerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.target_package, "demo");
        assert_eq!(config.constant_policy, ConstantPolicy::Permissive);
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, "{{ not json").unwrap();

        let result = SpecializerConfig::from_file(file.path());
        assert!(matches!(result, Err(SpecializeError::Config(_))));
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = SpecializerConfig::default();
        config.merge(&CliOverrides {
            iterations: Some(7),
            mode: Some(CodegenMode::Shallow),
            ..CliOverrides::default()
        });
        assert_eq!(config.iterations, Some(7));
        assert_eq!(config.mode, CodegenMode::Shallow);
        assert_eq!(config.target_package, "generated");
    }
}
