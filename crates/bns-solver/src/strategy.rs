//! Newton-Raphson solution strategy.
//!
//! Drives a builder-and-solver through the nonlinear iterations of one
//! solution step:
//!
//! 1. Let the scheme initialize the step
//! 2. Build the residual system `A Δx = b` at the current nodal values
//! 3. Solve for the increment and let the scheme apply it
//! 4. Check convergence, then let the scheme finalize the step
//!
//! # Convergence Criteria
//!
//! - **Increment**: ||Δx|| <= absolute_tolerance + relative_tolerance * ||x||
//! - **Residual**: ||b|| <= residual_tolerance, from the second iteration on,
//!   checked before the increment of that iteration is applied
//!
//! Any error from the builder, the scheme or the linear solver aborts the
//! step and is returned unchanged.

use crate::builder::{BuilderAndSolver, create_builder};
use crate::config::{BuilderSettings, StrategySettings};
use crate::error::{Result, SolverError};
use crate::model::ModelPart;
use crate::scheme::{IncrementalUpdateStaticScheme, Scheme};
use crate::variables::VariableRegistry;
use log::{debug, info, warn};
use nalgebra::DVector;

/// Criterion that ended the iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Increment norm below tolerance
    Increment,
    /// Residual norm below tolerance
    Residual,
}

/// Results of one solution step
#[derive(Debug, Clone)]
pub struct StepResults {
    /// Number of iterations to convergence
    pub num_iterations: usize,
    pub status: ConvergenceStatus,
    /// Norm of the last solved increment
    pub increment_norm: f64,
    /// Norm of the last right hand side
    pub residual_norm: f64,
    /// Increment norm per iteration
    pub iteration_history: Vec<f64>,
    /// Residual norm per iteration
    pub residual_history: Vec<f64>,
}

pub struct NewtonRaphsonStrategy {
    builder: Box<dyn BuilderAndSolver>,
    scheme: Box<dyn Scheme>,
    settings: StrategySettings,
    calculate_reactions: bool,
    reform_dof_at_each_iteration: bool,
    initialized: bool,
}

impl NewtonRaphsonStrategy {
    pub fn new(
        builder: Box<dyn BuilderAndSolver>,
        scheme: Box<dyn Scheme>,
        settings: &BuilderSettings,
    ) -> Self {
        Self {
            builder,
            scheme,
            settings: settings.strategy.clone(),
            calculate_reactions: settings.calculate_reactions,
            reform_dof_at_each_iteration: settings.reform_dof_at_each_iteration,
            initialized: false,
        }
    }

    /// Builder from the settings with the static incremental scheme.
    pub fn from_settings(settings: &BuilderSettings, registry: &VariableRegistry) -> Result<Self> {
        let builder = create_builder(settings, registry)?;
        Ok(Self::new(builder, Box::new(IncrementalUpdateStaticScheme), settings))
    }

    pub fn builder(&self) -> &dyn BuilderAndSolver {
        self.builder.as_ref()
    }

    pub fn builder_mut(&mut self) -> &mut dyn BuilderAndSolver {
        self.builder.as_mut()
    }

    pub fn scheme(&self) -> &dyn Scheme {
        self.scheme.as_ref()
    }

    /// Forget the dof set; the next step sets everything up again.
    pub fn clear(&mut self) {
        self.builder.clear();
        self.initialized = false;
    }

    fn converged_by_increment(&self, increment_norm: f64, x_norm: f64) -> bool {
        increment_norm <= self.settings.absolute_tolerance + self.settings.relative_tolerance * x_norm
    }

    pub fn solve_solution_step(&mut self, model: &mut ModelPart) -> Result<StepResults> {
        self.scheme.initialize_solution_step(model)?;
        let mut iteration_history = Vec::new();
        let mut residual_history = Vec::new();
        let mut increment_norm = f64::INFINITY;
        let mut status = None;
        let mut num_iterations = 0;

        for iteration in 1..=self.settings.max_iterations {
            num_iterations = iteration;
            if !self.initialized || self.reform_dof_at_each_iteration {
                self.builder.set_up_dof_set(self.scheme.as_ref(), model)?;
                self.builder.set_up_system(model)?;
                self.initialized = true;
            }

            let report = self.builder.build_and_solve(self.scheme.as_ref(), model)?;
            residual_history.push(report.rhs_norm);

            if iteration > 1 && report.rhs_norm <= self.settings.residual_tolerance {
                status = Some(ConvergenceStatus::Residual);
                break;
            }

            let dof_set = self.builder.dof_set()?;
            self.scheme.update(model, dof_set, self.builder.increment())?;
            increment_norm = report.increment_norm;
            iteration_history.push(increment_norm);

            let x_norm = DVector::from_vec(dof_set.values_by_equation(model)?).norm();
            debug!(
                "Newton iteration {}: |dx| = {:.3e}, |b| = {:.3e}, |x| = {:.3e}",
                iteration, increment_norm, report.rhs_norm, x_norm
            );
            if self.converged_by_increment(increment_norm, x_norm) {
                status = Some(ConvergenceStatus::Increment);
                break;
            }
        }

        let Some(status) = status else {
            warn!(
                "Newton-Raphson did not converge in {} iterations (|dx| = {:.3e})",
                num_iterations, increment_norm
            );
            return Err(SolverError::NotConverged {
                iterations: num_iterations,
                increment_norm,
            });
        };

        self.scheme.finalize_solution_step(model)?;
        if self.calculate_reactions {
            self.builder.calculate_reactions(self.scheme.as_ref(), model)?;
        }

        info!(
            "{} builder converged in {} iterations ({:?})",
            self.builder.name(),
            num_iterations,
            status
        );
        Ok(StepResults {
            num_iterations,
            status,
            increment_norm,
            residual_norm: residual_history.last().copied().unwrap_or(0.0),
            iteration_history,
            residual_history,
        })
    }
}
