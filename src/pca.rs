//! Principal components of the residual matrix.
//!
//! Columns are centered and scaled to unit sample variance, then decomposed
//! by SVD: `Z = U S V'`. Scores are `U S`, loadings are `V` and component
//! variances are `s² / (n - 1)`.
use crate::error::{NumtError, Result};
use crate::linalg::to_dmatrix;
use crate::residual::ResidualMatrix;
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;

/// Display label derived from the last character of an individual id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndividualLabel {
    pub individual: String,
    pub code: Option<char>,
    pub label: String,
}

impl IndividualLabel {
    /// Looks the suffix up in `labels`, falling back to the suffix itself.
    pub fn from_suffix(individual: &str, labels: &BTreeMap<String, String>) -> Self {
        let code = individual.chars().last();
        let key = code.map(String::from).unwrap_or_default();
        Self {
            individual: individual.to_owned(),
            code,
            label: labels.get(&key).cloned().unwrap_or(key),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PcaResult {
    pub individuals: Vec<String>,
    pub sites: Vec<String>,
    /// Individuals by components.
    pub scores: Array2<f64>,
    /// Sites by components.
    pub loadings: Array2<f64>,
    pub standard_deviations: Vec<f64>,
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
    /// Total variance of the scaled matrix.
    pub total_variance: f64,
    pub labels: Vec<IndividualLabel>,
}

/// Centers each column and scales it to unit sample variance.
pub fn scale_columns(matrix: &Array2<f64>, sites: &[String]) -> Result<Array2<f64>> {
    let n = matrix.nrows();
    if n < 2 {
        return Err(NumtError::InsufficientIndividuals {
            model: "principal components",
            required: 2,
            found: n,
        });
    }
    let means = matrix.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(matrix.ncols()));
    let sds = matrix.std_axis(Axis(0), 1.0);
    for (j, sd) in sds.iter().enumerate() {
        if !(*sd > 1e-12) {
            return Err(NumtError::ZeroVarianceSite {
                site: sites.get(j).cloned().unwrap_or_else(|| j.to_string()),
            });
        }
    }
    Ok((matrix - &means) / &sds)
}

pub fn principal_components(
    residuals: &ResidualMatrix,
    labels: &BTreeMap<String, String>,
) -> Result<PcaResult> {
    let scaled = scale_columns(&residuals.values, &residuals.sites)?;
    let (n, m) = scaled.dim();
    let svd = to_dmatrix(&scaled).svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(NumtError::convergence("PCA", "SVD returned no singular vectors")),
    };

    let singular_values = svd.singular_values;
    let mut order: Vec<usize> = (0..singular_values.len()).collect();
    order.sort_by(|&a, &b| singular_values[b].total_cmp(&singular_values[a]));
    let k = order.len();

    let scores = Array2::from_shape_fn((n, k), |(i, c)| {
        u[(i, order[c])] * singular_values[order[c]]
    });
    let loadings = Array2::from_shape_fn((m, k), |(j, c)| v_t[(order[c], j)]);
    let denominator = (n - 1) as f64;
    let explained_variance: Vec<f64> = order
        .iter()
        .map(|&c| singular_values[c] * singular_values[c] / denominator)
        .collect();
    let total_variance = scaled.mapv(|z| z * z).sum() / denominator;

    Ok(PcaResult {
        individuals: residuals.individuals.clone(),
        sites: residuals.sites.clone(),
        scores,
        loadings,
        standard_deviations: explained_variance.iter().map(|v| v.sqrt()).collect(),
        explained_variance_ratio: explained_variance.iter().map(|v| v / total_variance).collect(),
        explained_variance,
        total_variance,
        labels: residuals
            .individuals
            .iter()
            .map(|id| IndividualLabel::from_suffix(id, labels))
            .collect(),
    })
}
