pub use crate::config::{Config, SolverSettings};
pub use crate::error::{NumtError, Result};
pub use crate::matrix::{AlleleMatrix, SiteFrequency};
pub use crate::observable::{Csv, CsvBuilder};
pub use crate::pipeline::{NumtReport, Pipeline};
pub use crate::regression::{Cohort, CohortAssignment, RegressionInput};
pub use crate::subsample::{SubsampledDataset, Subsampler};
pub use crate::{Dataset, Observation, ReadCount};
