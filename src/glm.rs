//! Binomial GLM with a log link, fitted by iteratively reweighted least squares.
//!
//! For `μ = exp(Xβ + offset)` the IRLS working weights are `n μ / (1 - μ)` and
//! the working response is `η - offset + (p - μ) / μ`. A log link does not
//! keep `μ` below one by itself, so every step that leaves the unit interval
//! is halved back towards the previous coefficients.
use crate::config::SolverSettings;
use crate::error::{NumtError, Result};
use crate::linalg::{check_full_rank, solve_spd, DesignMatrix};
use ndarray::{Array1, Zip};
use tracing::debug;

const MAX_STEP_HALVINGS: usize = 40;
const MU_CEILING: f64 = 1.0 - 1e-10;

#[derive(Debug, Clone)]
pub struct GlmFit {
    pub coefficients: Vec<f64>,
    /// Fitted probabilities.
    pub fitted: Array1<f64>,
    pub deviance: f64,
    pub iterations: u64,
}

impl GlmFit {
    /// Observed minus fitted proportion.
    pub fn response_residuals(&self, successes: &Array1<f64>, trials: &Array1<f64>) -> Array1<f64> {
        Zip::from(successes)
            .and(trials)
            .and(&self.fitted)
            .map_collect(|&s, &n, &mu| s / n - mu)
    }
}

fn x_ln_ratio(a: f64, b: f64) -> f64 {
    if a > 0.0 {
        a * (a / b).ln()
    } else {
        0.0
    }
}

fn deviance(successes: &Array1<f64>, trials: &Array1<f64>, mu: &Array1<f64>) -> f64 {
    let mut total = 0.0;
    Zip::from(successes).and(trials).and(mu).for_each(|&s, &n, &mu| {
        total += x_ln_ratio(s, n * mu) + x_ln_ratio(n - s, n * (1.0 - mu));
    });
    2.0 * total
}

fn valid(mu: &Array1<f64>) -> bool {
    mu.iter().all(|m| m.is_finite() && *m > 0.0 && *m < MU_CEILING)
}

/// Fits `successes / trials ~ design` with a log link and an offset.
///
/// `start` must give fitted probabilities inside (0, 1); every row needs at
/// least one trial.
pub fn fit_binomial_log(
    design: &DesignMatrix,
    successes: &Array1<f64>,
    trials: &Array1<f64>,
    offset: &Array1<f64>,
    start: &[f64],
    settings: SolverSettings,
) -> Result<GlmFit> {
    let model = "binomial log-link GLM";
    check_full_rank(&design.cross_product(None), model)?;

    let linear = |beta: &[f64]| design.predict(beta) + offset;
    let mut beta = start.to_vec();
    let mut eta = linear(&beta);
    let mut mu = eta.mapv(f64::exp);
    if !valid(&mu) {
        return Err(NumtError::convergence(
            model,
            "starting values give fitted probabilities outside (0, 1)",
        ));
    }
    let proportion = successes / trials;
    let mut dev = deviance(successes, trials, &mu);

    for iteration in 1..=settings.max_iterations {
        let weights = Zip::from(trials).and(&mu).map_collect(|&n, &m| n * m / (1.0 - m));
        let working = Zip::from(&eta)
            .and(offset)
            .and(&proportion)
            .and(&mu)
            .map_collect(|&e, &o, &p, &m| e - o + (p - m) / m);

        let xtwx = design.cross_product(Some(&weights));
        let xtwz = design.cross_vector(&working, Some(&weights));
        let mut candidate: Vec<f64> = solve_spd(xtwx, &xtwz, model)?.iter().copied().collect();

        let mut halvings = 0;
        let (next_eta, next_mu, next_dev) = loop {
            let e = linear(&candidate);
            let m = e.mapv(f64::exp);
            let d = deviance(successes, trials, &m);
            if valid(&m) && d.is_finite() && d <= dev * (1.0 + 1e-12) + 1e-12 {
                break (e, m, d);
            }
            halvings += 1;
            if halvings > MAX_STEP_HALVINGS {
                return Err(NumtError::convergence(
                    model,
                    format!("step halving failed at iteration {}", iteration),
                ));
            }
            for (c, b) in candidate.iter_mut().zip(&beta) {
                *c = 0.5 * (*c + b);
            }
        };

        let change = (next_dev - dev).abs() / (next_dev.abs() + 0.1);
        beta = candidate;
        eta = next_eta;
        mu = next_mu;
        dev = next_dev;
        debug!(iteration, deviance = dev, halvings, "IRLS step");
        if change < settings.tolerance {
            return Ok(GlmFit {
                coefficients: beta,
                fitted: mu,
                deviance: dev,
                iterations: iteration,
            });
        }
    }

    Err(NumtError::convergence(
        model,
        format!("deviance still changing after {} iterations", settings.max_iterations),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_zero_offset_matches_pooled_proportion() -> std::result::Result<(), NumtError> {
        let design = DesignMatrix::new(vec!["s".into()], Array2::ones((4, 1)));
        let successes = array![3.0, 0.0, 5.0, 2.0];
        let trials = array![10.0, 20.0, 30.0, 40.0];
        let offset = Array1::zeros(4);
        let fit = fit_binomial_log(
            &design,
            &successes,
            &trials,
            &offset,
            &[-2.0],
            SolverSettings::default(),
        )?;
        assert!((fit.coefficients[0] - (10.0f64 / 100.0).ln()).abs() < 1e-6);

        let residuals = fit.response_residuals(&successes, &trials);
        assert!((residuals[1] - -0.1).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_offset_shifts_each_row() -> std::result::Result<(), NumtError> {
        // Exact proportions exp(b + x) with b = ln 0.05.
        let offset = array![0.0, 1.0, 2.0];
        let trials = array![1000.0, 1000.0, 1000.0];
        let successes = offset.mapv(|x: f64| (0.05 * x.exp() * 1000.0f64).round());
        let design = DesignMatrix::new(vec!["s".into()], Array2::ones((3, 1)));
        let fit = fit_binomial_log(
            &design,
            &successes,
            &trials,
            &offset,
            &[-5.0],
            SolverSettings::default(),
        )?;
        assert!((fit.coefficients[0].exp() - 0.05).abs() < 1e-3);
        assert!(fit.fitted.iter().all(|m| *m < 1.0));
        Ok(())
    }

    #[test]
    fn test_invalid_start() {
        let design = DesignMatrix::new(vec!["s".into()], Array2::ones((2, 1)));
        let result = fit_binomial_log(
            &design,
            &array![1.0, 1.0],
            &array![2.0, 2.0],
            &array![0.0, 0.0],
            &[0.5],
            SolverSettings::default(),
        );
        assert!(matches!(result, Err(NumtError::Convergence { .. })));
    }
}
