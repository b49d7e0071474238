//! The full estimation run, one stage after another.
use crate::bounds::{estimate_bounds, BoundEstimate};
use crate::config::Config;
use crate::error::Result;
use crate::matrix::{AlleleMatrix, SiteFrequency};
use crate::pca::{principal_components, PcaResult};
use crate::regression::{
    fit_cohort_intercepts, Cohort, CohortAssignment, CohortFit, RegressionInput,
};
use crate::residual::{residual_matrix, ResidualMatrix};
use crate::slope::{SlopeModel, SlopeModelFit};
use crate::subsample::{SubsampledDataset, Subsampler};
use crate::Dataset;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct SubsampleSummary {
    pub sites: Vec<String>,
    pub draw_order: Vec<String>,
    pub frequencies: Vec<SiteFrequency>,
}

impl From<&SubsampledDataset> for SubsampleSummary {
    fn from(subsample: &SubsampledDataset) -> Self {
        Self {
            sites: subsample.dataset().sites().to_vec(),
            draw_order: subsample.draw_order().to_vec(),
            frequencies: subsample.frequencies().to_vec(),
        }
    }
}

/// Everything a run hands to the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct NumtReport {
    pub subsample: SubsampleSummary,
    pub cohort: CohortFit,
    pub slopes: SlopeModelFit,
    pub bounds: BoundEstimate,
    pub residuals: ResidualMatrix,
    pub pca: PcaResult,
}

/// Inputs shared by the model stages of one run.
pub struct PipelineContext<'a> {
    config: &'a Config,
    cohorts: CohortAssignment,
}

impl<'a> PipelineContext<'a> {
    pub fn new(config: &'a Config, dataset: &Dataset) -> Result<Self> {
        Ok(Self {
            config,
            cohorts: CohortAssignment::from_members(
                dataset.individuals(),
                &config.older_cohort_members,
            )?,
        })
    }

    pub fn subsample<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        rng: &mut R,
    ) -> Result<SubsampledDataset> {
        let matrix = AlleleMatrix::from_dataset(dataset)?;
        Subsampler::from_config(self.config).subsample(&matrix, dataset, rng)
    }

    pub fn regression_input(&self, subsample: &SubsampledDataset) -> RegressionInput {
        RegressionInput::from_dataset(subsample.dataset(), &self.cohorts)
    }

    pub fn slopes(&self, input: &RegressionInput) -> Result<SlopeModelFit> {
        SlopeModel::from_config(self.config).fit(input)
    }

    /// Newer-cohort rows of the sites that follow the dilution law.
    pub fn conforming(&self, input: &RegressionInput, slopes: &SlopeModelFit) -> RegressionInput {
        input.cohort(Cohort::Newer).without_sites(&slopes.rogue_sites())
    }

    pub fn bounds(&self, conforming: &RegressionInput) -> Result<BoundEstimate> {
        estimate_bounds(conforming, self.config.solver)
    }

    pub fn residual_structure(
        &self,
        conforming: &RegressionInput,
    ) -> Result<(ResidualMatrix, PcaResult)> {
        let residuals = residual_matrix(conforming, self.config.solver)?;
        let pca = principal_components(&residuals, &self.config.suffix_labels)?;
        Ok((residuals, pca))
    }
}

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs with a generator seeded from `random_seed`.
    pub fn run(&self, dataset: &Dataset) -> Result<NumtReport> {
        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        self.run_with_rng(dataset, &mut rng)
    }

    pub fn run_with_rng<R: Rng + ?Sized>(
        &self,
        dataset: &Dataset,
        rng: &mut R,
    ) -> Result<NumtReport> {
        info!(
            individuals = dataset.individuals().len(),
            sites = dataset.sites().len(),
            observations = dataset.len(),
            "starting numt estimation"
        );
        let context = PipelineContext::new(&self.config, dataset)?;

        let subsample = context.subsample(dataset, rng)?;
        let input = context.regression_input(&subsample);
        let cohort = fit_cohort_intercepts(&input)?;
        let slopes = context.slopes(&input)?;
        let conforming = context.conforming(&input, &slopes);
        let bounds = context.bounds(&conforming)?;
        let (residuals, pca) = context.residual_structure(&conforming)?;

        info!(
            lower_bound = bounds.lower_bound,
            upper_bound = bounds.upper_bound,
            "numt estimation finished"
        );
        Ok(NumtReport {
            subsample: SubsampleSummary::from(&subsample),
            cohort,
            slopes,
            bounds,
            residuals,
            pca,
        })
    }
}
