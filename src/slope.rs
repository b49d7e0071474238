//! Per-site slopes of log allele frequency on `x` and the rogue-site rule.
//!
//! The newer cohort is fitted with `y ~ site + x + x:site + (1 | individual)`
//! under treatment coding, so the model reports the reference site's
//! intercept and slope plus every other site's deviation from them. Adding
//! the reference back recovers each site's own line.
use crate::config::{Config, SolverSettings};
use crate::error::{NumtError, Result};
use crate::linalg::DesignMatrix;
use crate::mixed::fit_reml;
use crate::regression::{Cohort, RegressionInput};
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

/// Fitted line of one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteFitResult {
    pub site: String,
    pub intercept: f64,
    pub slope: Option<f64>,
    pub random_effect_variance: Option<f64>,
}

/// Sites whose allele frequency barely tracks `x` break the dilution law.
#[derive(Debug, Clone, Copy)]
pub struct OutlierClassifier {
    threshold: f64,
}

impl OutlierClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn is_rogue(&self, slope: f64) -> bool {
        slope.abs() < self.threshold
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierFlag {
    pub site: String,
    pub rogue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlopeModelFit {
    pub sites: Vec<SiteFitResult>,
    pub flags: Vec<OutlierFlag>,
    pub residual_variance: f64,
    pub group_variance: f64,
    pub n_obs: usize,
}

impl SlopeModelFit {
    pub fn rogue_sites(&self) -> HashSet<String> {
        self.flags
            .iter()
            .filter(|f| f.rogue)
            .map(|f| f.site.clone())
            .collect()
    }

    pub fn site(&self, site: &str) -> Option<&SiteFitResult> {
        self.sites.iter().find(|s| s.site == site)
    }
}

pub struct SlopeModel {
    classifier: OutlierClassifier,
    settings: SolverSettings,
}

impl SlopeModel {
    pub fn new(slope_threshold: f64, settings: SolverSettings) -> Self {
        Self {
            classifier: OutlierClassifier::new(slope_threshold),
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.slope_threshold, config.solver)
    }

    /// Fits the newer cohort of `input` and flags rogue sites.
    pub fn fit(&self, input: &RegressionInput) -> Result<SlopeModelFit> {
        let newer = input.cohort(Cohort::Newer);
        let rows: Vec<_> = newer.complete_rows().collect();
        let m = newer.sites().len();
        if m == 0 {
            return Err(NumtError::NoSitesRetained { model: "slope model" });
        }

        // Columns: intercept, site deviations, x, x:site deviations.
        let p = 2 * m;
        let slope_column = m;
        let mut names = Vec::with_capacity(p);
        names.push("(Intercept)".to_owned());
        names.extend(newer.sites()[1..].iter().map(|s| format!("site{}", s)));
        names.push("x".to_owned());
        names.extend(newer.sites()[1..].iter().map(|s| format!("x:site{}", s)));

        let mut design = Array2::zeros((rows.len(), p));
        for (i, row) in rows.iter().enumerate() {
            design[[i, 0]] = 1.0;
            design[[i, slope_column]] = row.x;
            if row.site > 0 {
                design[[i, row.site]] = 1.0;
                design[[i, slope_column + row.site]] = row.x;
            }
        }
        let response: Array1<f64> = rows.iter().filter_map(|r| r.y).collect();
        let groups: Vec<usize> = rows.iter().map(|r| r.individual).collect();

        let fit = fit_reml(
            &DesignMatrix::new(names, design),
            &response,
            &groups,
            newer.individuals().len(),
            self.settings,
            "slope model",
        )?;

        let beta = &fit.coefficients;
        let sites: Vec<SiteFitResult> = newer
            .sites()
            .iter()
            .enumerate()
            .map(|(j, site)| {
                let (intercept, slope) = if j == 0 {
                    (beta[0], beta[slope_column])
                } else {
                    (beta[0] + beta[j], beta[slope_column] + beta[slope_column + j])
                };
                SiteFitResult {
                    site: site.clone(),
                    intercept,
                    slope: Some(slope),
                    random_effect_variance: Some(fit.group_variance),
                }
            })
            .collect();

        let flags: Vec<OutlierFlag> = sites
            .iter()
            .map(|s| OutlierFlag {
                site: s.site.clone(),
                rogue: s.slope.map_or(false, |slope| self.classifier.is_rogue(slope)),
            })
            .collect();

        info!(
            sites = m,
            rogue = flags.iter().filter(|f| f.rogue).count(),
            group_variance = fit.group_variance,
            "per-site slope model"
        );
        Ok(SlopeModelFit {
            sites,
            flags,
            residual_variance: fit.residual_variance,
            group_variance: fit.group_variance,
            n_obs: fit.n_obs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::CohortAssignment;
    use crate::simulate::{DilutionSimulator, SiteSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_classifier_threshold() {
        let classifier = OutlierClassifier::new(0.7);
        assert!(classifier.is_rogue(0.0));
        assert!(classifier.is_rogue(-0.69));
        assert!(!classifier.is_rogue(1.0));
        assert!(!classifier.is_rogue(-0.9));
    }

    #[test]
    fn test_flat_site_is_rogue_and_diluted_site_is_not() -> std::result::Result<(), NumtError> {
        let simulator = DilutionSimulator::new(0.05);
        let individuals = DilutionSimulator::spread_individuals("ind", 10, 0.1, 0.6);
        let sites = vec![
            SiteSpec::conforming("ok1", 0.6),
            SiteSpec::new("flat", 0.5, 0.0),
            SiteSpec::conforming("ok2", 0.3),
            SiteSpec::conforming("ok3", 0.8),
        ];
        let dataset = simulator.simulate(&individuals, &sites, &mut StdRng::seed_from_u64(3));
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &[])?;
        let input = RegressionInput::from_dataset(&dataset, &cohorts);

        let fit = SlopeModel::new(0.7, SolverSettings::default()).fit(&input)?;
        assert_eq!(fit.rogue_sites(), ["flat".to_owned()].into_iter().collect::<HashSet<String>>());
        for name in ["ok1", "ok2", "ok3"] {
            let slope = fit.site(name).and_then(|s| s.slope).unwrap();
            assert!((slope - 1.0).abs() < 0.15, "{} {}", name, slope);
        }
        let flat = fit.site("flat").and_then(|s| s.slope).unwrap();
        assert!(flat.abs() < 0.15, "{}", flat);
        Ok(())
    }

    #[test]
    fn test_exhausted_variance_search_is_reported() -> std::result::Result<(), NumtError> {
        let individuals = DilutionSimulator::spread_individuals("ind", 6, 0.1, 0.6);
        let sites = vec![SiteSpec::conforming("a", 0.6), SiteSpec::new("b", 0.4, 0.0)];
        let dataset = DilutionSimulator::new(0.05).simulate(
            &individuals,
            &sites,
            &mut StdRng::seed_from_u64(21),
        );
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &[])?;
        let settings = SolverSettings {
            max_iterations: 1,
            ..SolverSettings::default()
        };
        let result =
            SlopeModel::new(0.7, settings).fit(&RegressionInput::from_dataset(&dataset, &cohorts));
        assert!(matches!(
            result,
            Err(NumtError::Convergence { model: "slope model", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_older_cohort_is_ignored() -> std::result::Result<(), NumtError> {
        let simulator = DilutionSimulator::new(0.05);
        let individuals = DilutionSimulator::spread_individuals("ind", 8, 0.1, 0.6);
        let sites = vec![SiteSpec::conforming("a", 0.6), SiteSpec::conforming("b", 0.4)];
        let dataset = simulator.simulate(&individuals, &sites, &mut StdRng::seed_from_u64(9));
        let older = vec!["ind0".to_owned(), "ind1".to_owned()];
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &older)?;
        let fit = SlopeModel::new(0.7, SolverSettings::default())
            .fit(&RegressionInput::from_dataset(&dataset, &cohorts))?;
        assert_eq!(fit.n_obs, 12);
        Ok(())
    }
}
