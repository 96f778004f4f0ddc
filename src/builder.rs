//! The build orchestrator: assignment, external sort, compression, assembly.
//!
//! One [`IndexBuilder::build`] call runs the full pipeline against a
//! [`DatasetReader`] and leaves a single index file at the output path.
//! Intermediate files live in an ephemeral temp directory unless the
//! configuration pins a persistent one, which also enables resuming a build
//! from its sorted runs.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::assemble;
use crate::assign::AssignmentEngine;
use crate::compress::compress_tier;
use crate::config::BuildConfig;
use crate::dataset::DatasetReader;
use crate::error::{GeotierError, Result};
use crate::extsort::ExternalSorter;
use crate::progress::ProgressLog;
use crate::tier::Tier;

/// Counters reported after a completed build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Elements read from the dataset.
    pub elements: u64,
    /// Temp records emitted by assignment (one per element-cell pair).
    pub records: u64,
    /// Search squares written across all tiers.
    pub squares: u64,
}

/// Builder wiring a dataset reader, configuration, and output path into one
/// index build.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    config: BuildConfig,
    output_path: Option<PathBuf>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self {
            config: BuildConfig::default(),
            output_path: None,
        }
    }

    /// Set the build configuration.
    pub fn config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the path the finished index file is written to.
    pub fn output_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Run the build. Fatal on any I/O error; an ephemeral working
    /// directory is removed afterwards either way.
    pub fn build<R: DatasetReader>(self, reader: &mut R) -> Result<BuildStats> {
        let output = self.output_path.ok_or_else(|| {
            GeotierError::InvalidInput("no output path configured".to_string())
        })?;
        let config = self.config;
        config.validate().map_err(GeotierError::InvalidInput)?;

        let checksum = reader.checksum()?;
        let mut ephemeral = None;
        let work_dir: PathBuf = match &config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => {
                let dir = tempfile::tempdir()?;
                let path = dir.path().to_path_buf();
                ephemeral = Some(dir);
                path
            }
        };

        let mut stats = BuildStats::default();
        let mut sorters: Vec<ExternalSorter> = if config.run_assignment {
            let mut sorters = Tier::all()
                .map(|tier| ExternalSorter::create(&work_dir, tier, config.sort_buf_size))
                .collect::<Result<Vec<_>>>()?;
            let engine = AssignmentEngine::new(config.ignore_tagless);
            let mut progress = ProgressLog::new();
            let segments = reader.segment_count();
            for index in 0..segments {
                for element in reader.segment(index)? {
                    stats.elements += 1;
                    stats.records += engine.assign(&element, &mut sorters)?;
                }
                progress.emit(|| {
                    format!(
                        "element assignment: {}/{} segments ({:.2}%)",
                        index + 1,
                        segments,
                        (index + 1) as f64 / segments as f64 * 100.0
                    )
                });
            }
            progress.finish(format!(
                "element assignment: {segments}/{segments} segments, {} records",
                stats.records
            ));
            for sorter in &mut sorters {
                sorter.sort()?;
            }
            sorters
        } else {
            Tier::all()
                .map(|tier| ExternalSorter::open_sorted(&work_dir, tier, config.sort_buf_size))
                .collect::<Result<Vec<_>>>()?
        };
        stats.records = sorters.iter().map(ExternalSorter::len).sum();

        if config.run_compression {
            let blob_path = work_dir.join("squares.blob");
            let mut blob = BufWriter::new(File::create(&blob_path)?);
            let mut blob_offset = 0u64;
            let mut directory_paths = Vec::with_capacity(Tier::COUNT);
            let mut progress = ProgressLog::new();
            for sorter in &mut sorters {
                let directory_path =
                    work_dir.join(format!("tier{}.dir", sorter.tier().exponent()));
                stats.squares += compress_tier(
                    sorter,
                    &directory_path,
                    &mut blob,
                    &mut blob_offset,
                    &mut progress,
                )?;
                directory_paths.push(directory_path);
            }
            blob.flush()?;
            drop(blob);
            assemble::assemble(&output, &checksum, &directory_paths, &blob_path)?;
            log::info!(
                "index written to {} ({} squares from {} records)",
                output.display(),
                stats.squares,
                stats.records
            );
        } else {
            log::info!(
                "assignment finished ({} records); compression skipped",
                stats.records
            );
        }

        drop(ephemeral);
        Ok(stats)
    }
}
