// Evaluator settings
// Hosts embed these under their own settings file; nothing here touches disk.

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// The depth fault must fire before a 2 MiB thread stack overflows, including
/// in unoptimized builds.
pub const DEFAULT_MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSettings {
    /// Maximum nesting of in-progress cell evaluations
    #[serde(rename = "eval.maxDepth")]
    pub max_depth: usize,

    /// Report reads and cache hits of blank cells to the listener
    #[serde(rename = "eval.reportBlankReads")]
    pub report_blank_reads: bool,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            report_blank_reads: false,
        }
    }
}

impl EvaluatorSettings {
    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_depth == 0 {
            return Err(SettingsError::ZeroDepth);
        }
        Ok(())
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_blank_reads(mut self, report: bool) -> Self {
        self.report_blank_reads = report;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EvaluatorSettings::default();
        assert_eq!(settings.max_depth, DEFAULT_MAX_DEPTH);
        assert!(!settings.report_blank_reads);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let settings = EvaluatorSettings::from_json_str(r#"{"eval.maxDepth": 64}"#).unwrap();
        assert_eq!(settings.max_depth, 64);
        assert!(!settings.report_blank_reads);
    }

    #[test]
    fn test_toml_dotted_keys() {
        let text = "\"eval.maxDepth\" = 8\n\"eval.reportBlankReads\" = true\n";
        let settings = EvaluatorSettings::from_toml_str(text).unwrap();
        assert_eq!(settings.max_depth, 8);
        assert!(settings.report_blank_reads);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let err = EvaluatorSettings::from_json_str(r#"{"eval.maxDepth": 0}"#).unwrap_err();
        assert!(matches!(err, SettingsError::ZeroDepth));
    }

    #[test]
    fn test_malformed_json() {
        let err = EvaluatorSettings::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn test_serializes_dotted_keys() {
        let json = serde_json::to_string(&EvaluatorSettings::default()).unwrap();
        assert!(json.contains("\"eval.maxDepth\":128"));
        assert!(json.contains("\"eval.reportBlankReads\":false"));
    }
}
