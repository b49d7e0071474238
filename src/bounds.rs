//! Point bounds on the numt proportion `c`.
//!
//! After rogue sites are removed the newer cohort is refitted with
//! `y ~ 0 + site + (1 | individual)`, offset `x`. A site's intercept is
//! `ln(c) + ln(p_n)` and `p_n ≤ 1`, so the largest intercept bounds `c` from
//! below. The least diluted sample bounds it from above.
use crate::config::SolverSettings;
use crate::error::{NumtError, Result};
use crate::linalg::DesignMatrix;
use crate::mixed::fit_reml;
use crate::regression::{inverse_logit, RegressionInput};
use crate::slope::SiteFitResult;
use ndarray::{Array1, Array2};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct BoundEstimate {
    pub upper_bound: f64,
    pub lower_bound: f64,
    /// Per-site intercepts of the refit.
    pub cvals: Vec<SiteFitResult>,
    pub residual_variance: f64,
    pub group_variance: f64,
    pub n_obs: usize,
}

/// Fits `input`, which must already be restricted to the newer cohort and
/// the non-rogue sites.
pub fn estimate_bounds(input: &RegressionInput, settings: SolverSettings) -> Result<BoundEstimate> {
    let model = "bounded estimator";
    let rows: Vec<_> = input.complete_rows().collect();
    let m = input.sites().len();
    if m == 0 || rows.is_empty() {
        return Err(NumtError::NoSitesRetained { model });
    }

    let names = input.sites().iter().map(|s| format!("site{}", s)).collect();
    let mut design = Array2::zeros((rows.len(), m));
    for (i, row) in rows.iter().enumerate() {
        design[[i, row.site]] = 1.0;
    }
    let response: Array1<f64> = rows.iter().filter_map(|r| r.y.map(|y| y - r.x)).collect();
    let groups: Vec<usize> = rows.iter().map(|r| r.individual).collect();

    let fit = fit_reml(
        &DesignMatrix::new(names, design),
        &response,
        &groups,
        input.individuals().len(),
        settings,
        model,
    )?;

    let cvals: Vec<SiteFitResult> = input
        .sites()
        .iter()
        .zip(&fit.coefficients)
        .map(|(site, &intercept)| SiteFitResult {
            site: site.clone(),
            intercept,
            slope: None,
            random_effect_variance: Some(fit.group_variance),
        })
        .collect();

    let max_x = input.max_x().ok_or(NumtError::NoSitesRetained { model })?;
    let max_cval = cvals.iter().map(|c| c.intercept).fold(f64::NEG_INFINITY, f64::max);
    let estimate = BoundEstimate {
        upper_bound: inverse_logit(-max_x),
        lower_bound: max_cval.exp(),
        cvals,
        residual_variance: fit.residual_variance,
        group_variance: fit.group_variance,
        n_obs: fit.n_obs,
    };
    info!(
        sites = m,
        lower_bound = estimate.lower_bound,
        upper_bound = estimate.upper_bound,
        "numt proportion bounds"
    );
    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::{Cohort, CohortAssignment};
    use crate::simulate::{DilutionSimulator, SiteSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bounds_bracket_true_proportion() -> std::result::Result<(), NumtError> {
        for (seed, c) in [(1, 0.02), (2, 0.05), (3, 0.1)] {
            let individuals = DilutionSimulator::spread_individuals("ind", 12, 0.15, 0.6);
            let sites: Vec<SiteSpec> = (0..8)
                .map(|j| SiteSpec::conforming(&format!("snp{}", j), 0.2 + 0.08 * j as f64))
                .collect();
            let dataset = DilutionSimulator::new(c).simulate(
                &individuals,
                &sites,
                &mut StdRng::seed_from_u64(seed),
            );
            let cohorts = CohortAssignment::from_members(dataset.individuals(), &[])?;
            let input = RegressionInput::from_dataset(&dataset, &cohorts).cohort(Cohort::Newer);

            let bounds = estimate_bounds(&input, SolverSettings::default())?;
            assert!(bounds.lower_bound <= c, "c={} lower={}", c, bounds.lower_bound);
            assert!(c <= bounds.upper_bound, "c={} upper={}", c, bounds.upper_bound);
            assert!((bounds.upper_bound - 0.15).abs() < 1e-12);
            assert_eq!(bounds.cvals.len(), 8);
        }
        Ok(())
    }

    #[test]
    fn test_no_sites_left() -> std::result::Result<(), NumtError> {
        let dataset = DilutionSimulator::new(0.05).simulate(
            &DilutionSimulator::spread_individuals("ind", 3, 0.2, 0.5),
            &[SiteSpec::conforming("a", 0.5)],
            &mut StdRng::seed_from_u64(5),
        );
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &[])?;
        let input = RegressionInput::from_dataset(&dataset, &cohorts)
            .without_sites(&["a".to_owned()].into_iter().collect());
        assert!(matches!(
            estimate_bounds(&input, SolverSettings::default()),
            Err(NumtError::NoSitesRetained { .. })
        ));
        Ok(())
    }
}
