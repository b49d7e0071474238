//! Linear mixed model with a single random intercept per group, fitted by
//! restricted maximum likelihood.
//!
//! With `y = Xβ + Zb + e`, `b ~ N(0, σ_b² I)`, `e ~ N(0, σ² I)` and
//! `λ = σ_b² / σ²`, the marginal covariance is `σ² H` where `H` is block
//! diagonal with blocks `I + λ11'`. Each block inverts in closed form,
//!
//! ```text
//! (I + λ11')⁻¹ = I - λ / (1 + λ n_g) 11'     log|I + λ11'| = log(1 + λ n_g)
//! ```
//!
//! so every quantity the REML criterion needs comes from X'X, X'y, y'y and
//! the per-group column and response sums. σ² and β are profiled out and the
//! criterion is minimized over `log λ` with Brent's method.
use crate::config::SolverSettings;
use crate::error::{NumtError, Result};
use crate::linalg::{check_full_rank, DesignMatrix};
use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::brent::BrentOpt;
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Search interval for `log λ`.
const LOG_RATIO_BOUNDS: (f64, f64) = (-20.0, 12.0);

#[derive(Debug, Clone)]
pub struct MixedFit {
    pub names: Vec<String>,
    pub coefficients: Vec<f64>,
    /// Residual variance σ².
    pub residual_variance: f64,
    /// Random-intercept variance σ_b².
    pub group_variance: f64,
    /// -2 times the restricted log-likelihood at the optimum.
    pub reml_deviance: f64,
    pub iterations: u64,
    pub n_obs: usize,
    pub n_groups: usize,
}

impl MixedFit {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.coefficients[i])
    }
}

/// Sufficient statistics of one fit, shared by every criterion evaluation.
#[derive(Clone)]
struct CrossProducts {
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    yty: f64,
    /// Per group: size, column sums of X, sum of y.
    groups: Vec<(f64, DVector<f64>, f64)>,
    n_obs: usize,
}

struct Profile {
    beta: DVector<f64>,
    /// r'H⁻¹r at the profiled β.
    quadratic: f64,
    deviance: f64,
}

impl CrossProducts {
    fn new(
        design: &DesignMatrix,
        response: &Array1<f64>,
        groups: &[usize],
        n_groups: usize,
    ) -> Self {
        let p = design.ncols();
        let mut group_stats = vec![(0.0, DVector::zeros(p), 0.0); n_groups];
        let rows = design.matrix().rows().into_iter();
        for (row, (&g, &y)) in rows.zip(groups.iter().zip(response.iter())) {
            let stats = &mut group_stats[g];
            stats.0 += 1.0;
            for (k, &x) in row.iter().enumerate() {
                stats.1[k] += x;
            }
            stats.2 += y;
        }
        Self {
            xtx: design.cross_product(None),
            xty: design.cross_vector(response, None),
            yty: response.dot(response),
            groups: group_stats.into_iter().filter(|(n, _, _)| *n > 0.0).collect(),
            n_obs: response.len(),
        }
    }

    fn profile(&self, ratio: f64) -> Result<Profile> {
        let mut xhx = self.xtx.clone();
        let mut xhy = self.xty.clone();
        let mut yhy = self.yty;
        let mut log_det_h = 0.0;
        for (n, sums, total) in &self.groups {
            let w = ratio / (1.0 + ratio * n);
            xhx.ger(-w, sums, sums, 1.0);
            xhy.axpy(-w * total, sums, 1.0);
            yhy -= w * total * total;
            log_det_h += (ratio * n).ln_1p();
        }

        let chol = xhx
            .cholesky()
            .ok_or_else(|| NumtError::convergence("REML", "X'H⁻¹X lost positive definiteness"))?;
        let log_det_xhx = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let beta = chol.solve(&xhy);
        let quadratic = yhy - beta.dot(&xhy);

        let dof = (self.n_obs - self.xtx.ncols()) as f64;
        if !(quadratic > 0.0) {
            return Err(NumtError::convergence(
                "REML",
                format!("residual quadratic form {} is not positive", quadratic),
            ));
        }
        let deviance = dof * (1.0 + (2.0 * PI * quadratic / dof).ln()) + log_det_h + log_det_xhx;
        Ok(Profile {
            beta,
            quadratic,
            deviance,
        })
    }
}

struct RemlCriterion {
    products: CrossProducts,
}

impl CostFunction for RemlCriterion {
    type Param = f64;
    type Output = f64;

    fn cost(
        &self,
        log_ratio: &Self::Param,
    ) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.products.profile(log_ratio.exp())?.deviance)
    }
}

/// Fits `response ~ design + (1 | group)` by REML.
///
/// `groups[i]` is the group index of row `i`, below `n_groups`.
pub fn fit_reml(
    design: &DesignMatrix,
    response: &Array1<f64>,
    groups: &[usize],
    n_groups: usize,
    settings: SolverSettings,
    model: &'static str,
) -> Result<MixedFit> {
    let products = CrossProducts::new(design, response, groups, n_groups);
    check_full_rank(&products.xtx, model)?;
    let p = design.ncols();
    if products.n_obs <= p {
        return Err(NumtError::SingularFit {
            model,
            rank: products.n_obs,
            columns: p,
        });
    }

    let solver = BrentOpt::new(LOG_RATIO_BOUNDS.0, LOG_RATIO_BOUNDS.1)
        .set_tolerance(f64::EPSILON.sqrt(), settings.tolerance);
    let result = Executor::new(RemlCriterion { products: products.clone() }, solver)
        .configure(|state| state.max_iters(settings.max_iterations))
        .run()
        .map_err(|e| NumtError::convergence(model, e.to_string()))?;
    let state = result.state();
    if let Some(TerminationReason::MaxItersReached) = state.get_termination_reason() {
        return Err(NumtError::convergence(
            model,
            format!("variance ratio search hit {} iterations", settings.max_iterations),
        ));
    }
    let iterations = state.get_iter();
    let mut log_ratio = *state
        .get_best_param()
        .ok_or_else(|| NumtError::convergence(model, "no variance ratio evaluated"))?;

    let mut profile = products.profile(log_ratio.exp())?;
    // The interior search cannot reach λ = 0, where lme4-style fits often land.
    let boundary = products.profile(0.0)?;
    if boundary.deviance <= profile.deviance {
        log_ratio = f64::NEG_INFINITY;
        profile = boundary;
    } else if log_ratio >= LOG_RATIO_BOUNDS.1 - 1e-3 {
        warn!(model, log_ratio, "variance ratio at upper search bound");
    }

    let ratio = log_ratio.exp();
    let residual_variance = profile.quadratic / (products.n_obs - p) as f64;
    debug!(
        model,
        iterations,
        ratio,
        residual_variance,
        reml_deviance = profile.deviance,
        "REML fit"
    );

    Ok(MixedFit {
        names: design.names().to_vec(),
        coefficients: profile.beta.iter().copied().collect(),
        residual_variance,
        group_variance: ratio * residual_variance,
        reml_deviance: profile.deviance,
        iterations,
        n_obs: products.n_obs,
        n_groups: products.groups.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Four groups of six rows over three treatment levels, each level seen
    /// twice per group.
    fn balanced(group_effects: &[f64]) -> (DesignMatrix, Array1<f64>, Vec<usize>) {
        let means = [1.0, -0.5, 2.0];
        let noise = [0.05, -0.03, 0.02, -0.04, 0.01, -0.01];
        let mut rows = vec![];
        let mut response = vec![];
        let mut groups = vec![];
        for (g, effect) in group_effects.iter().enumerate() {
            for k in 0..6 {
                let level = k % 3;
                let mut row = vec![0.0; 3];
                row[level] = 1.0;
                rows.extend(row);
                response.push(means[level] + effect + noise[(k + g) % 6]);
                groups.push(g);
            }
        }
        let n = response.len();
        let design = DesignMatrix::new(
            vec!["a".into(), "b".into(), "c".into()],
            Array2::from_shape_vec((n, 3), rows).unwrap(),
        );
        (design, Array1::from(response), groups)
    }

    #[test]
    fn test_balanced_fixed_effects_are_level_means() -> std::result::Result<(), NumtError> {
        let (design, response, groups) = balanced(&[-1.0, 0.6, 0.3, 0.1]);
        let fit = fit_reml(&design, &response, &groups, 4, SolverSettings::default(), "test")?;

        for (level, name) in ["a", "b", "c"].iter().enumerate() {
            let mean: f64 = response
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 3 == level)
                .map(|(_, y)| *y)
                .sum::<f64>()
                / 8.0;
            let estimate = fit.coefficient(name).unwrap();
            assert!((estimate - mean).abs() < 1e-8, "{} {} {}", name, estimate, mean);
        }
        assert!(fit.group_variance > 0.1, "{}", fit.group_variance);
        assert!(fit.residual_variance < 0.01, "{}", fit.residual_variance);
        assert_eq!(fit.n_groups, 4);
        Ok(())
    }

    #[test]
    fn test_iteration_limit_is_a_convergence_error() {
        let (design, response, groups) = balanced(&[-1.0, 0.6, 0.3, 0.1]);
        let settings = SolverSettings {
            max_iterations: 1,
            ..SolverSettings::default()
        };
        let result = fit_reml(&design, &response, &groups, 4, settings, "test");
        assert!(matches!(
            result,
            Err(NumtError::Convergence { model: "test", .. })
        ));
    }

    #[test]
    fn test_tolerance_reaches_the_variance_search() -> std::result::Result<(), NumtError> {
        let (design, response, groups) = balanced(&[-1.0, 0.6, 0.3, 0.1]);
        let tight = fit_reml(&design, &response, &groups, 4, SolverSettings::default(), "test")?;
        let settings = SolverSettings {
            tolerance: 1e-2,
            ..SolverSettings::default()
        };
        let loose = fit_reml(&design, &response, &groups, 4, settings, "test")?;
        assert!((loose.group_variance / tight.group_variance - 1.0).abs() < 0.05);
        Ok(())
    }

    #[test]
    fn test_no_group_signal_gives_small_group_variance() -> std::result::Result<(), NumtError> {
        let (design, response, groups) = balanced(&[0.0, 0.0, 0.0, 0.0]);
        let fit = fit_reml(&design, &response, &groups, 4, SolverSettings::default(), "test")?;
        assert!(fit.group_variance < fit.residual_variance);
        Ok(())
    }

    #[test]
    fn test_rank_deficient_design() {
        let (design, response, groups) = balanced(&[0.0, 0.1, 0.2, 0.3]);
        let mut matrix = design.matrix().clone();
        matrix.column_mut(2).fill(0.0);
        let design = DesignMatrix::new(design.names().to_vec(), matrix);
        let result = fit_reml(&design, &response, &groups, 4, SolverSettings::default(), "test");
        assert!(matches!(result, Err(NumtError::SingularFit { .. })));
    }
}
