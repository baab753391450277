//! Direct solver using nalgebra's dense LU decomposition.
//!
//! Sparse systems are expanded to dense storage first, so this backend is
//! meant for small-to-medium problems and for the dense reduced systems of
//! the ROM builder.

use super::traits::*;
use nalgebra::DVector;

/// Dense LU with partial pivoting.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLuSolver;

impl LinearSolver for DenseLuSolver {
    fn name(&self) -> &str {
        "nalgebra-LU"
    }

    fn solve(&self, system: &LinearSystemData) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        system.check_dimensions()?;

        let x = if system.size() == 0 {
            DVector::zeros(0)
        } else {
            system
                .matrix
                .to_dense()
                .lu()
                .solve(system.rhs)
                .ok_or(BackendError::Singular("LU decomposition"))?
        };

        Ok((
            x,
            SolveInfo {
                iterations: 1,
                residual_norm: None,
                solver_name: self.name().to_string(),
            },
        ))
    }
}
