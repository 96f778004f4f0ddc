//! Build-time configuration.
//!
//! Serializable so a caller can keep build settings in JSON alongside its
//! own configuration; the flag syntax that feeds it is out of scope here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::extsort::DEFAULT_SORT_BUF_SIZE;
use crate::record;
use crate::tier::Tier;

/// Configuration for one index build.
///
/// # Example
///
/// ```rust
/// use geotier::BuildConfig;
///
/// let config = BuildConfig::from_json(
///     r#"{ "ignore_tagless": false, "sort_buf_size": 1048576 }"#,
/// ).unwrap();
/// assert!(!config.ignore_tagless);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Exclude elements without tags. On by default: untagged geometry is
    /// assumed auxiliary to a tagged parent.
    #[serde(default = "BuildConfig::default_ignore_tagless")]
    pub ignore_tagless: bool,

    /// In-memory chunk budget for the external sort, in bytes.
    #[serde(default = "BuildConfig::default_sort_buf_size")]
    pub sort_buf_size: usize,

    /// Directory for intermediate files. `None` means a fresh temp
    /// directory, removed when the build finishes; a set path is kept, which
    /// is what makes phase skipping possible.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Run the assignment phase. Off resumes from sorted runs already in
    /// `work_dir`.
    #[serde(default = "BuildConfig::default_true")]
    pub run_assignment: bool,

    /// Run the compression/assembly phase. Off stops after sorting, leaving
    /// the runs in `work_dir` for a later resume.
    #[serde(default = "BuildConfig::default_true")]
    pub run_compression: bool,
}

impl BuildConfig {
    const fn default_ignore_tagless() -> bool {
        true
    }

    const fn default_sort_buf_size() -> usize {
        DEFAULT_SORT_BUF_SIZE
    }

    const fn default_true() -> bool {
        true
    }

    /// Keep tag-less elements instead of skipping them.
    pub fn with_tagless_included(mut self) -> Self {
        self.ignore_tagless = false;
        self
    }

    pub fn with_sort_buf_size(mut self, bytes: usize) -> Self {
        self.sort_buf_size = bytes;
        self
    }

    /// Use a persistent working directory instead of an ephemeral one.
    pub fn with_work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Resume from existing sorted runs, skipping assignment.
    pub fn skip_assignment(mut self) -> Self {
        self.run_assignment = false;
        self
    }

    /// Stop after sorting; do not compress or assemble.
    pub fn skip_compression(mut self) -> Self {
        self.run_compression = false;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        let largest_record = Tier::all()
            .map(record::encoded_len)
            .max()
            .expect("at least one tier");
        if self.sort_buf_size < largest_record {
            return Err(format!(
                "sort buffer of {} bytes cannot hold a single record",
                self.sort_buf_size
            ));
        }
        if !self.run_assignment && self.work_dir.is_none() {
            return Err(
                "skipping assignment requires a persistent work_dir with sorted runs".to_string(),
            );
        }
        if !self.run_assignment && !self.run_compression {
            return Err("both build phases are disabled".to_string());
        }
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        use serde::de::Error;
        let config: BuildConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            ignore_tagless: Self::default_ignore_tagless(),
            sort_buf_size: Self::default_sort_buf_size(),
            work_dir: None,
            run_assignment: true,
            run_compression: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::default();
        assert!(config.ignore_tagless);
        assert_eq!(config.sort_buf_size, DEFAULT_SORT_BUF_SIZE);
        assert!(config.work_dir.is_none());
        assert!(config.run_assignment);
        assert!(config.run_compression);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = BuildConfig::default()
            .with_tagless_included()
            .with_sort_buf_size(1 << 20)
            .with_work_dir("/tmp/geotier-work");
        let json = config.to_json().unwrap();
        let restored = BuildConfig::from_json(&json).unwrap();
        assert!(!restored.ignore_tagless);
        assert_eq!(restored.sort_buf_size, 1 << 20);
        assert_eq!(restored.work_dir, config.work_dir);
    }

    #[test]
    fn test_validation() {
        assert!(
            BuildConfig::default()
                .with_sort_buf_size(4)
                .validate()
                .is_err()
        );
        // Resume without a persistent work dir has nothing to resume from.
        assert!(BuildConfig::default().skip_assignment().validate().is_err());
        assert!(
            BuildConfig::default()
                .skip_assignment()
                .with_work_dir("/tmp/w")
                .validate()
                .is_ok()
        );
        assert!(
            BuildConfig::default()
                .skip_assignment()
                .skip_compression()
                .with_work_dir("/tmp/w")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BuildConfig::from_json("{}").unwrap();
        assert!(config.ignore_tagless);
        assert_eq!(config.sort_buf_size, DEFAULT_SORT_BUF_SIZE);
    }
}
