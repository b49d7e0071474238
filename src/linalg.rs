//! Dense design matrices and least squares on their normal equations.
use crate::error::{NumtError, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Singular values of X'X below this fraction of the largest count as zero.
const RANK_TOLERANCE: f64 = 1e-12;

/// A model matrix with named columns.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    names: Vec<String>,
    matrix: Array2<f64>,
}

impl DesignMatrix {
    pub fn new(names: Vec<String>, matrix: Array2<f64>) -> Self {
        debug_assert_eq!(names.len(), matrix.ncols());
        Self { names, matrix }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// X'WX with optional row weights.
    pub fn cross_product(&self, weights: Option<&Array1<f64>>) -> DMatrix<f64> {
        let xtx = match weights {
            Some(w) => {
                let weighted = &self.matrix * &w.view().insert_axis(ndarray::Axis(1));
                self.matrix.t().dot(&weighted)
            }
            None => self.matrix.t().dot(&self.matrix),
        };
        to_dmatrix(&xtx)
    }

    /// X'Wv with optional row weights.
    pub fn cross_vector(&self, v: &Array1<f64>, weights: Option<&Array1<f64>>) -> DVector<f64> {
        let xtv = match weights {
            Some(w) => self.matrix.t().dot(&(v * w)),
            None => self.matrix.t().dot(v),
        };
        DVector::from_iterator(xtv.len(), xtv.iter().copied())
    }

    pub fn predict(&self, coefficients: &[f64]) -> Array1<f64> {
        self.matrix.dot(&Array1::from(coefficients.to_vec()))
    }
}

pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Numerical rank of a symmetric positive semi-definite matrix.
pub fn rank(xtx: &DMatrix<f64>) -> usize {
    if xtx.is_empty() {
        return 0;
    }
    let singular_values = xtx.clone().svd(false, false).singular_values;
    let largest = singular_values.max();
    if largest <= 0.0 {
        return 0;
    }
    singular_values
        .iter()
        .filter(|s| **s > largest * RANK_TOLERANCE)
        .count()
}

/// Fails with `SingularFit` unless X'X has full column rank.
pub fn check_full_rank(xtx: &DMatrix<f64>, model: &'static str) -> Result<()> {
    let columns = xtx.ncols();
    let rank = rank(xtx);
    if rank < columns || columns == 0 {
        return Err(NumtError::SingularFit { model, rank, columns });
    }
    Ok(())
}

/// Solves A b = r for symmetric positive definite A.
pub fn solve_spd(a: DMatrix<f64>, rhs: &DVector<f64>, model: &'static str) -> Result<DVector<f64>> {
    let columns = a.ncols();
    match a.clone().cholesky() {
        Some(chol) => Ok(chol.solve(rhs)),
        None => Err(NumtError::SingularFit {
            model,
            rank: rank(&a),
            columns,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub coefficients: Vec<f64>,
    pub fitted: Array1<f64>,
    pub rss: f64,
    pub df_residual: usize,
}

impl LeastSquares {
    /// Residual standard error, `None` without residual degrees of freedom.
    pub fn sigma(&self) -> Option<f64> {
        if self.df_residual == 0 {
            None
        } else {
            Some((self.rss / self.df_residual as f64).sqrt())
        }
    }
}

/// Ordinary least squares of `response` on `design`.
pub fn least_squares(
    design: &DesignMatrix,
    response: &Array1<f64>,
    model: &'static str,
) -> Result<LeastSquares> {
    let xtx = design.cross_product(None);
    check_full_rank(&xtx, model)?;
    let beta = solve_spd(xtx, &design.cross_vector(response, None), model)?;
    let coefficients: Vec<f64> = beta.iter().copied().collect();
    let fitted = design.predict(&coefficients);
    let rss = (response - &fitted).mapv(|r| r * r).sum();
    Ok(LeastSquares {
        coefficients,
        fitted,
        rss,
        df_residual: design.nrows().saturating_sub(design.ncols()),
    })
}
