//! Backend trait definitions for linear solvers.
//!
//! The builders hand a square system to a [`LinearSolver`] and get back the
//! solution vector, or an error the builder propagates upward unchanged.
//! Both the full-order sparse system and the small dense reduced system go
//! through the same trait.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use thiserror::Error;

/// Error type for backend operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Singular matrix in {0}")]
    Singular(&'static str),

    #[error("{solver} did not converge in {iterations} iterations (relative residual = {residual:.3e})")]
    NotConverged {
        solver: &'static str,
        iterations: usize,
        residual: f64,
    },

    #[error("Matrix is {rows}x{cols} but the right hand side has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
}

/// System matrix in either storage.
#[derive(Debug, Clone, Copy)]
pub enum SystemMatrix<'a> {
    Sparse(&'a CsrMatrix<f64>),
    Dense(&'a DMatrix<f64>),
}

impl SystemMatrix<'_> {
    pub fn nrows(&self) -> usize {
        match self {
            SystemMatrix::Sparse(a) => a.nrows(),
            SystemMatrix::Dense(a) => a.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            SystemMatrix::Sparse(a) => a.ncols(),
            SystemMatrix::Dense(a) => a.ncols(),
        }
    }

    pub fn mul_vector(&self, x: &DVector<f64>) -> DVector<f64> {
        match self {
            SystemMatrix::Sparse(a) => csr_mul_vector(a, x),
            SystemMatrix::Dense(a) => *a * x,
        }
    }

    pub fn diagonal(&self) -> DVector<f64> {
        match self {
            SystemMatrix::Sparse(a) => {
                let mut diag = DVector::zeros(a.nrows());
                for (i, row) in a.row_iter().enumerate() {
                    if let Ok(pos) = row.col_indices().binary_search(&i) {
                        diag[i] = row.values()[pos];
                    }
                }
                diag
            }
            SystemMatrix::Dense(a) => a.diagonal(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            SystemMatrix::Sparse(a) => {
                let mut dense = DMatrix::zeros(a.nrows(), a.ncols());
                for (row_idx, row) in a.row_iter().enumerate() {
                    for (&col_idx, &value) in row.col_indices().iter().zip(row.values().iter()) {
                        dense[(row_idx, col_idx)] += value;
                    }
                }
                dense
            }
            SystemMatrix::Dense(a) => (*a).clone(),
        }
    }
}

/// A linear system ready for solving: A * x = b.
///
/// Boundary conditions are already applied by the builder.
#[derive(Debug, Clone, Copy)]
pub struct LinearSystemData<'a> {
    pub matrix: SystemMatrix<'a>,
    pub rhs: &'a DVector<f64>,
}

impl<'a> LinearSystemData<'a> {
    pub fn sparse(matrix: &'a CsrMatrix<f64>, rhs: &'a DVector<f64>) -> Self {
        Self {
            matrix: SystemMatrix::Sparse(matrix),
            rhs,
        }
    }

    pub fn dense(matrix: &'a DMatrix<f64>, rhs: &'a DVector<f64>) -> Self {
        Self {
            matrix: SystemMatrix::Dense(matrix),
            rhs,
        }
    }

    pub fn size(&self) -> usize {
        self.rhs.len()
    }

    /// The matrix must be square and match the right hand side.
    pub fn check_dimensions(&self) -> Result<(), BackendError> {
        let (rows, cols) = (self.matrix.nrows(), self.matrix.ncols());
        if rows != cols || rows != self.rhs.len() {
            return Err(BackendError::DimensionMismatch {
                rows,
                cols,
                rhs: self.rhs.len(),
            });
        }
        Ok(())
    }
}

/// Solver convergence and diagnostic info.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveInfo {
    /// Number of iterations (1 for direct solvers)
    pub iterations: usize,
    /// Final residual norm (if available)
    pub residual_norm: Option<f64>,
    /// Human-readable solver name (e.g., "nalgebra-LU", "jacobi-CG")
    pub solver_name: String,
}

/// Trait for a linear solver backend.
pub trait LinearSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Solve A * x = b and return x.
    fn solve(&self, system: &LinearSystemData) -> Result<(DVector<f64>, SolveInfo), BackendError>;
}

/// y = A * x for a CSR matrix.
pub fn csr_mul_vector(a: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::zeros(a.nrows());
    for (i, row) in a.row_iter().enumerate() {
        y[i] = row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&j, &v)| v * x[j])
            .sum();
    }
    y
}
