//! Run configuration.
//!
//! [`RecalibrationConfig`] carries everything the pipeline needs to know
//! about a run. The binary fills it from command-line arguments; library
//! users build it directly with the `with_*` methods.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors; fatal, reported before any batch is processed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No reference FASTA was given.
    #[error("missing required reference path (--reference)")]
    MissingReference,
    /// No known-sites database was given.
    #[error("missing required known-sites path (--known-sites)")]
    MissingKnownSites,
    /// A numeric option is outside its accepted range.
    #[error("invalid value for {option}: {reason}")]
    InvalidValue {
        /// Option name.
        option: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Which execution backend runs the stage kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ExecutorKind {
    /// Single-threaded.
    Serial,
    /// Rayon thread pool (`threads == 0` lets rayon decide).
    Threaded {
        /// Worker threads.
        threads: usize,
    },
}

/// Base alignment quality settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct BaqOptions {
    /// Compute BAQ at all.
    pub enabled: bool,
    /// Half-width of the HMM band around the diagonal.
    pub band_radius: u32,
    /// Gap open probability.
    pub gap_open: f64,
    /// Gap extension probability.
    pub gap_extension: f64,
    /// Reads with MAPQ at or above this skip BAQ entirely.
    pub skip_mapq_at_least: Option<u8>,
    /// Floor applied to qualities fed into the HMM and to uncertain bases.
    pub min_base_quality: u8,
    /// Maximum allowed |forward - backward| log-likelihood difference.
    pub tolerance: f64,
}

impl Default for BaqOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            band_radius: 7,
            gap_open: 1e-4,
            gap_extension: 0.1,
            skip_mapq_at_least: None,
            min_base_quality: 4,
            tolerance: 1e-3,
        }
    }
}

/// Covariate computation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CovariateOptions {
    /// Context length for base substitution events.
    pub mismatch_context_size: usize,
    /// Context length for insertion and deletion events.
    pub indel_context_size: usize,
    /// Bases at read ends with quality at or below this are masked in contexts.
    pub low_quality_tail: u8,
    /// Bases with reported quality below this are not counted.
    pub min_base_quality: u8,
    /// Quality used for insertion events.
    pub insertion_quality: u8,
    /// Quality used for deletion events.
    pub deletion_quality: u8,
    /// Largest |cycle| that can be recorded.
    pub maximum_cycle: u32,
}

impl Default for CovariateOptions {
    fn default() -> Self {
        Self {
            mismatch_context_size: 2,
            indel_context_size: 3,
            low_quality_tail: 2,
            min_base_quality: 6,
            insertion_quality: 45,
            deletion_quality: 45,
            maximum_cycle: 500,
        }
    }
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct RecalibrationConfig {
    /// Reference FASTA.
    pub reference: Option<PathBuf>,
    /// Known variant sites (VCF).
    pub known_sites: Option<PathBuf>,
    /// Alignments to recalibrate.
    pub input: Option<PathBuf>,
    /// Report destination (`None` = stdout).
    pub output: Option<PathBuf>,
    /// Map the reference instead of reading it.
    pub mmap_reference: bool,
    /// Map the known-sites file instead of reading it.
    pub mmap_known_sites: bool,
    /// Reads per batch.
    pub batch_size: usize,
    /// Execution backend.
    pub executor: ExecutorKind,
    /// BAQ settings.
    pub baq: BaqOptions,
    /// Covariate settings.
    pub covariates: CovariateOptions,
}

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            reference: None,
            known_sites: None,
            input: None,
            output: None,
            mmap_reference: false,
            mmap_known_sites: false,
            batch_size: 20_000,
            executor: ExecutorKind::Threaded { threads: 0 },
            baq: BaqOptions::default(),
            covariates: CovariateOptions::default(),
        }
    }
}

impl RecalibrationConfig {
    /// Set the reference path.
    pub fn with_reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference = Some(path.into());
        self
    }

    /// Set the known-sites path.
    pub fn with_known_sites(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_sites = Some(path.into());
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Select the execution backend.
    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the BAQ settings.
    pub fn with_baq(mut self, baq: BaqOptions) -> Self {
        self.baq = baq;
        self
    }

    /// Replace the covariate settings.
    pub fn with_covariates(mut self, covariates: CovariateOptions) -> Self {
        self.covariates = covariates;
        self
    }

    /// Check required paths and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference.is_none() {
            return Err(ConfigError::MissingReference);
        }
        if self.known_sites.is_none() {
            return Err(ConfigError::MissingKnownSites);
        }
        self.validate_parameters()
    }

    /// Check numeric ranges only (paths may be absent for in-memory runs).
    pub fn validate_parameters(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch size", "must be > 0"));
        }
        if self.baq.band_radius == 0 {
            return Err(invalid("BAQ band radius", "must be > 0"));
        }
        if !(0.0..0.5).contains(&self.baq.gap_open) || self.baq.gap_open == 0.0 {
            return Err(invalid("BAQ gap open", "must be in (0, 0.5)"));
        }
        if !(0.0..1.0).contains(&self.baq.gap_extension) || self.baq.gap_extension == 0.0 {
            return Err(invalid("BAQ gap extension", "must be in (0, 1)"));
        }
        for (option, size) in [
            ("mismatch context size", self.covariates.mismatch_context_size),
            ("indel context size", self.covariates.indel_context_size),
        ] {
            if !(1..=4).contains(&size) {
                return Err(invalid(option, "must be between 1 and 4"));
            }
        }
        if self.covariates.maximum_cycle == 0 || self.covariates.maximum_cycle > 511 {
            return Err(invalid("maximum cycle", "must be between 1 and 511"));
        }
        Ok(())
    }
}

fn invalid(option: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        option,
        reason: reason.to_string(),
    }
}
