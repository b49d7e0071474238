//! Response-scale residuals of the per-site binomial fit, arranged as an
//! individual × site matrix and centered per individual.
use crate::config::SolverSettings;
use crate::error::{NumtError, Result};
use crate::glm::{fit_binomial_log, GlmFit};
use crate::linalg::DesignMatrix;
use crate::regression::RegressionInput;
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct ResidualMatrix {
    pub individuals: Vec<String>,
    pub sites: Vec<String>,
    /// Row-centered residuals, individuals by sites.
    pub values: Array2<f64>,
    pub deviance: f64,
}

/// Subtracts each row's mean from that row.
pub fn center_rows(matrix: &Array2<f64>) -> Array2<f64> {
    match matrix.mean_axis(Axis(1)) {
        Some(means) => matrix - &means.insert_axis(Axis(1)),
        None => matrix.clone(),
    }
}

/// Fits `(alt, main) ~ 0 + site` with offset `x` and returns the centered
/// residual matrix.
///
/// Observations without reads or with an infinite `x` do not enter the fit;
/// their cells take the individual's mean residual, which is zero after
/// centering.
pub fn residual_matrix(
    input: &RegressionInput,
    settings: SolverSettings,
) -> Result<ResidualMatrix> {
    let model = "residual GLM";
    let rows: Vec<_> = input
        .rows()
        .iter()
        .filter(|r| r.depth() > 0 && r.x.is_finite())
        .collect();
    let (n, m) = (input.individuals().len(), input.sites().len());
    if m == 0 || rows.is_empty() {
        return Err(NumtError::NoSitesRetained { model });
    }

    let mut design = Array2::zeros((rows.len(), m));
    for (i, row) in rows.iter().enumerate() {
        design[[i, row.site]] = 1.0;
    }
    let successes: Array1<f64> = rows.iter().map(|r| f64::from(r.alt)).collect();
    let trials: Array1<f64> = rows.iter().map(|r| r.depth() as f64).collect();
    let offset: Array1<f64> = rows.iter().map(|r| r.x).collect();

    // Start each site below the smallest fitted probability ceiling it meets.
    let mut pooled = vec![(0.0, 0.0, f64::NEG_INFINITY); m];
    for row in &rows {
        let site = &mut pooled[row.site];
        site.0 += f64::from(row.alt);
        site.1 += row.depth() as f64;
        site.2 = site.2.max(row.x);
    }
    let start: Vec<f64> = pooled
        .iter()
        .map(|&(alt, depth, max_x)| ((alt + 0.5) / (depth + 1.0)).ln() - max_x.max(0.0))
        .collect();

    let names = input.sites().iter().map(|s| format!("site{}", s)).collect();
    let fit: GlmFit = fit_binomial_log(
        &DesignMatrix::new(names, design),
        &successes,
        &trials,
        &offset,
        &start,
        settings,
    )?;
    debug!(iterations = fit.iterations, deviance = fit.deviance, "residual GLM converged");
    let residuals = fit.response_residuals(&successes, &trials);

    let mut sums = vec![0.0; n];
    let mut counts = vec![0usize; n];
    let mut cells: Array2<Option<f64>> = Array2::from_elem((n, m), None);
    for (row, &residual) in rows.iter().zip(residuals.iter()) {
        cells[[row.individual, row.site]] = Some(residual);
        sums[row.individual] += residual;
        counts[row.individual] += 1;
    }
    let values = Array2::from_shape_fn((n, m), |(i, j)| {
        cells[[i, j]].unwrap_or(if counts[i] > 0 { sums[i] / counts[i] as f64 } else { 0.0 })
    });

    info!(individuals = n, sites = m, "residual matrix");
    Ok(ResidualMatrix {
        individuals: input.individuals().to_vec(),
        sites: input.sites().to_vec(),
        values: center_rows(&values),
        deviance: fit.deviance,
    })
}
