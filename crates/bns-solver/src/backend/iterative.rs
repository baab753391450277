//! Jacobi-preconditioned conjugate gradient.
//!
//! Works directly on the CSR matrix. Intended for symmetric positive
//! definite systems; on anything else it may fail to converge, which is
//! reported as [`BackendError::NotConverged`] and never retried here.

use super::traits::*;
use nalgebra::DVector;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConjugateGradientSolver {
    /// Relative residual tolerance ||r|| / ||b||
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ConjugateGradientSolver {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

impl ConjugateGradientSolver {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}

impl LinearSolver for ConjugateGradientSolver {
    fn name(&self) -> &str {
        "jacobi-CG"
    }

    fn solve(&self, system: &LinearSystemData) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        system.check_dimensions()?;
        let n = system.size();
        let b = system.rhs;

        let info = |iterations, residual| SolveInfo {
            iterations,
            residual_norm: Some(residual),
            solver_name: self.name().to_string(),
        };

        let b_norm = b.norm();
        if n == 0 || b_norm == 0.0 {
            return Ok((DVector::zeros(n), info(0, 0.0)));
        }

        // Jacobi preconditioner; zero diagonals fall back to identity
        let inv_diag = system
            .matrix
            .diagonal()
            .map(|d| if d.abs() > f64::MIN_POSITIVE { 1.0 / d } else { 1.0 });

        let mut x = DVector::zeros(n);
        let mut r = b.clone();
        let mut z = r.component_mul(&inv_diag);
        let mut p = z.clone();
        let mut rz = r.dot(&z);

        for iteration in 1..=self.max_iterations {
            let ap = system.matrix.mul_vector(&p);
            let pap = p.dot(&ap);
            if pap.abs() <= f64::MIN_POSITIVE {
                return Err(BackendError::Singular("conjugate gradient"));
            }

            let alpha = rz / pap;
            x.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &ap, 1.0);

            let relative = r.norm() / b_norm;
            if relative <= self.tolerance {
                return Ok((x, info(iteration, relative)));
            }

            z = r.component_mul(&inv_diag);
            let rz_next = r.dot(&z);
            let beta = rz_next / rz;
            rz = rz_next;
            p = &z + beta * &p;
        }

        Err(BackendError::NotConverged {
            solver: "jacobi-CG",
            iterations: self.max_iterations,
            residual: r.norm() / b_norm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn spd_system() -> (DMatrix<f64>, DVector<f64>) {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 4.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 1.0]);
        (a, b)
    }

    #[test]
    fn cg_converges_on_spd_system() {
        let (a, b) = spd_system();
        let (x, info) = ConjugateGradientSolver::default()
            .solve(&LinearSystemData::dense(&a, &b))
            .unwrap();

        assert!((&a * &x - &b).norm() < 1e-9);
        assert!(info.iterations <= 3);
    }

    #[test]
    fn cg_reports_non_convergence() {
        let (a, b) = spd_system();
        let solver = ConjugateGradientSolver::new(1e-14, 1);
        assert!(matches!(
            solver.solve(&LinearSystemData::dense(&a, &b)),
            Err(BackendError::NotConverged { iterations: 1, .. })
        ));
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let (a, _) = spd_system();
        let b = DVector::zeros(3);
        let (x, info) = ConjugateGradientSolver::default()
            .solve(&LinearSystemData::dense(&a, &b))
            .unwrap();
        assert_eq!(x, DVector::zeros(3));
        assert_eq!(info.iterations, 0);
    }
}
