//! Harness configuration
//!
//! Build-time switches (`row-major`, `etalon` cargo features) supply the
//! defaults; a JSON file or the `with_*` builders override them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::problem::ProblemDescriptor;

/// Runtime configuration shared by every case of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Device whose global memory size gates the resource check
    pub device_index: usize,
    /// Seed for the matrix generator
    pub seed: u64,
    /// Timed runs per path; the best run of each path is compared
    pub repetitions: usize,
    /// Whether the reference path may run row-major cases
    pub allow_row_major: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            seed: 42,
            repetitions: 1,
            allow_row_major: cfg!(feature = "row-major"),
        }
    }
}

impl HarnessConfig {
    /// Set the generator seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of timed runs per path
    #[must_use]
    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Allow or forbid row-major reference runs
    #[must_use]
    pub fn with_row_major(mut self, allow: bool) -> Self {
        self.allow_row_major = allow;
        self
    }

    /// Select the device used for the memory query
    #[must_use]
    pub fn with_device_index(mut self, index: usize) -> Self {
        self.device_index = index;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvalidConfiguration` if `repetitions` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.repetitions == 0 {
            return Err(HarnessError::InvalidConfiguration(
                "repetitions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a configuration from a JSON file
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

/// A batch of cases with an optional configuration, as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseFile {
    /// Configuration for the whole batch
    #[serde(default)]
    pub config: HarnessConfig,
    /// Cases in execution order
    pub cases: Vec<ProblemDescriptor>,
}

impl CaseFile {
    /// Load a case file, validating the configuration and every descriptor
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or JSON failure, an invalid configuration, or
    /// the first invalid descriptor.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&text)?;
        file.config.validate()?;
        for case in &file.cases {
            case.validate()?;
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarnessConfig::default();
        assert_eq!(config.repetitions, 1);
        assert_eq!(config.allow_row_major, cfg!(feature = "row-major"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_repetitions_rejected() {
        let config = HarnessConfig::default().with_repetitions(0);
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"seed": 7, "allow_row_major": true}}"#).unwrap();
        let config = HarnessConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.seed, 7);
        assert!(config.allow_row_major);
        assert_eq!(config.repetitions, 1);
    }

    #[test]
    fn test_case_file_rejects_invalid_descriptor() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"cases": [{{"variant": "real32", "order": "column_major", "uplo": "upper",
                "trans": "no_trans", "n": 4, "k": 4, "lda": 2, "ldc": 4,
                "alpha": {{"re": 1.0}}, "beta": {{"re": 1.0}}}}]}}"#
        )
        .unwrap();
        assert!(matches!(
            CaseFile::from_json_file(file.path()),
            Err(HarnessError::InvalidProblem { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = HarnessConfig::from_json_file("/nonexistent/syrk-perf.json").unwrap_err();
        assert!(matches!(err, HarnessError::IoError(_)));
    }
}
