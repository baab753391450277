//! Linear solver abstraction layer.
//!
//! The builders hand their assembled system to a [`LinearSolver`] without
//! knowing which backend is behind it. The concrete backend is picked from
//! [`LinearSolverSettings`] when the builder is created.
//!
//! # Architecture
//!
//! ```text
//! Entities (nalgebra DMatrix: small, dense)
//!         │
//!         ▼
//! Builder (CSR system, or dense reduced system for ROM)
//!         │
//!         ▼
//! LinearSolver trait
//!    ┌────┴────┐
//!    ▼         ▼
//! Dense LU   Jacobi CG
//! ```

pub mod iterative;
pub mod native;
pub mod traits;

pub use iterative::ConjugateGradientSolver;
pub use native::DenseLuSolver;
pub use traits::*;

use crate::config::{LinearSolverSettings, SolverType};

/// Creates the linear solver selected by the settings.
pub fn create_linear_solver(settings: &LinearSolverSettings) -> Box<dyn LinearSolver> {
    match settings.solver_type {
        SolverType::Lu => Box::new(DenseLuSolver),
        SolverType::Cg => Box::new(ConjugateGradientSolver::new(
            settings.tolerance,
            settings.max_iterations,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_follows_settings() {
        let mut settings = LinearSolverSettings::default();
        assert_eq!(create_linear_solver(&settings).name(), "nalgebra-LU");

        settings.solver_type = SolverType::Cg;
        assert_eq!(create_linear_solver(&settings).name(), "jacobi-CG");
    }
}
