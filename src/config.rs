//! Run configuration.
//!
//! A `Config` deserializes from TOML with every key optional:
//!
//! ```toml
//! cutoff = 0.01
//! snp_no = 200
//! slope_threshold = 0.7
//! older_cohort_members = ["AB01", "AB02"]
//! random_seed = 42
//!
//! [suffix_labels]
//! N = "north"
//! S = "south"
//!
//! [solver]
//! max_iterations = 500
//! tolerance = 1e-8
//! ```
use crate::error::{NumtError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Iteration limit and convergence tolerance shared by the REML and IRLS
/// solvers. For REML the tolerance is the absolute width on `log λ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: u64,
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum pooled alternate-allele fraction for a site to be drawn.
    pub cutoff: f64,
    /// Number of sites in the weighted subsample.
    pub snp_no: usize,
    /// Sites with `|slope|` below this are flagged rogue.
    pub slope_threshold: f64,
    /// Individuals sequenced with the older technology. Everyone else is
    /// in the newer cohort.
    pub older_cohort_members: Vec<String>,
    pub random_seed: u64,
    /// Display labels keyed by the last character of an individual id.
    pub suffix_labels: BTreeMap<String, String>,
    pub solver: SolverSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cutoff: 0.01,
            snp_no: 200,
            slope_threshold: 0.7,
            older_cohort_members: vec![],
            random_seed: 42,
            suffix_labels: BTreeMap::new(),
            solver: SolverSettings::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn cutoff(&mut self, cutoff: f64) -> &mut Self {
        self.cutoff = cutoff;
        self
    }

    pub fn snp_no(&mut self, snp_no: usize) -> &mut Self {
        self.snp_no = snp_no;
        self
    }

    pub fn slope_threshold(&mut self, slope_threshold: f64) -> &mut Self {
        self.slope_threshold = slope_threshold;
        self
    }

    pub fn older_cohort_members<I, S>(&mut self, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.older_cohort_members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn random_seed(&mut self, random_seed: u64) -> &mut Self {
        self.random_seed = random_seed;
        self
    }

    pub fn suffix_label(&mut self, code: char, label: &str) -> &mut Self {
        self.suffix_labels.insert(code.to_string(), label.to_owned());
        self
    }

    pub fn solver(&mut self, solver: SolverSettings) -> &mut Self {
        self.solver = solver;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.cutoff) {
            return Err(NumtError::config(format!(
                "cutoff must lie in [0, 1), got {}",
                self.cutoff
            )));
        }
        if self.snp_no == 0 {
            return Err(NumtError::config("snp_no must be positive"));
        }
        if !self.slope_threshold.is_finite() || self.slope_threshold < 0.0 {
            return Err(NumtError::config(format!(
                "slope_threshold must be finite and non-negative, got {}",
                self.slope_threshold
            )));
        }
        if self.solver.max_iterations == 0 {
            return Err(NumtError::config("solver.max_iterations must be positive"));
        }
        if !(self.solver.tolerance > 0.0) {
            return Err(NumtError::config("solver.tolerance must be positive"));
        }
        for key in self.suffix_labels.keys() {
            if key.chars().count() != 1 {
                return Err(NumtError::config(format!(
                    "suffix label key {:?} must be a single character",
                    key
                )));
            }
        }
        Ok(())
    }
}
