//! Error type shared by every pipeline stage.
//!
//! Zero allele counts are not errors; they travel as `None` through the
//! regression inputs. Everything listed here aborts the run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NumtError {
    /// The observations do not form a complete individual × site grid.
    #[error(
        "shape mismatch: {individuals} individuals x {sites} sites \
         but {observations} observations ({detail})"
    )]
    ShapeMismatch {
        individuals: usize,
        sites: usize,
        observations: usize,
        detail: String,
    },

    /// A site is polymorphic in some individuals but not in others.
    #[error("inconsistent polymorphic flag for site {site}")]
    InconsistentFlag { site: String },

    #[error("only {eligible} sites are eligible for subsampling but {requested} were requested")]
    InsufficientEligibleSites { eligible: usize, requested: usize },

    /// Rank-deficient design matrix.
    #[error("singular fit in {model}: rank {rank} < {columns} columns")]
    SingularFit {
        model: &'static str,
        rank: usize,
        columns: usize,
    },

    #[error("{model} did not converge: {message}")]
    Convergence {
        model: &'static str,
        message: String,
    },

    #[error("no sites retained for {model}")]
    NoSitesRetained { model: &'static str },

    #[error("{model} needs at least {required} individuals, got {found}")]
    InsufficientIndividuals {
        model: &'static str,
        required: usize,
        found: usize,
    },

    #[error("site {site} has zero residual variance and cannot be scaled")]
    ZeroVarianceSite { site: String },

    #[error("individual {id} named in configuration is not in the dataset")]
    UnknownIndividual { id: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("parse error at record {record}: {message}")]
    Parse { record: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NumtError>;

impl NumtError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse(record: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            record,
            message: message.into(),
        }
    }

    pub fn convergence(model: &'static str, message: impl Into<String>) -> Self {
        Self::Convergence {
            model,
            message: message.into(),
        }
    }

    pub(crate) fn shape(
        individuals: usize,
        sites: usize,
        observations: usize,
        detail: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            individuals,
            sites,
            observations,
            detail: detail.into(),
        }
    }
}
