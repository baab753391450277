//! Elimination builder: only free dofs are equations.
//!
//! Free dofs are numbered first, fixed dofs after them. Every contribution
//! to a fixed row or column falls outside the equation system and is never
//! assembled, so no Dirichlet treatment is needed afterwards.

use super::{BuildReport, BuilderAndSolver, store_reactions};
use crate::backend::{LinearSolver, LinearSystemData};
use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::ModelPart;
use crate::scheme::Scheme;
use crate::sparse_assembly::{SparsityPattern, assemble_rhs, assemble_rhs_all_dofs, assemble_system};
use log::{debug, info};
use nalgebra::DVector;
use std::time::Instant;

pub struct EliminationBuilderAndSolver {
    linear_solver: Box<dyn LinearSolver>,
    calculate_reactions: bool,
    dof_set: Option<DofSet>,
    system_ready: bool,
    pattern: Option<SparsityPattern>,
    dx: DVector<f64>,
}

impl EliminationBuilderAndSolver {
    pub fn new(linear_solver: Box<dyn LinearSolver>) -> Self {
        Self {
            linear_solver,
            calculate_reactions: false,
            dof_set: None,
            system_ready: false,
            pattern: None,
            dx: DVector::zeros(0),
        }
    }

    pub fn with_reactions(mut self, calculate_reactions: bool) -> Self {
        self.calculate_reactions = calculate_reactions;
        self
    }
}

impl BuilderAndSolver for EliminationBuilderAndSolver {
    fn name(&self) -> &'static str {
        "elimination"
    }

    fn set_up_dof_set(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<()> {
        if !model.constraints().is_empty() {
            return Err(SolverError::UnsupportedConstraints("elimination"));
        }
        let dof_set = DofSet::scan(scheme, model)?;
        if cfg!(debug_assertions) && self.calculate_reactions {
            dof_set.check_reactions(model)?;
        }
        self.dof_set = Some(dof_set);
        self.system_ready = false;
        self.pattern = None;
        Ok(())
    }

    fn set_up_system(&mut self, model: &ModelPart) -> Result<()> {
        if !model.constraints().is_empty() {
            return Err(SolverError::UnsupportedConstraints("elimination"));
        }
        let dof_set = self.dof_set.as_mut().ok_or(SolverError::DofSetNotInitialized)?;
        dof_set.number_free_first(model)?;
        let size = dof_set.equation_system_size();

        self.pattern = None;
        self.dx = DVector::zeros(size);
        self.system_ready = true;
        info!(
            "Elimination system set up: {} free of {} dofs",
            size,
            dof_set.len()
        );
        Ok(())
    }

    fn build_and_solve(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<BuildReport> {
        let dof_set = self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)?;
        if !self.system_ready {
            return Err(SolverError::SystemNotInitialized);
        }

        let start = Instant::now();
        if self.pattern.is_none() {
            self.pattern = Some(SparsityPattern::build(scheme, model, dof_set)?);
        }
        let pattern = self.pattern.as_ref().ok_or(SolverError::SystemNotInitialized)?;
        let (a, b) = assemble_system(scheme, model, dof_set, pattern)?;
        let build_time = start.elapsed();

        let (dx, solve_info) = self.linear_solver.solve(&LinearSystemData::sparse(&a, &b))?;
        debug!(
            "Elimination build in {:.3?}, {} solve of {} equations in {:.3?}",
            build_time,
            solve_info.solver_name,
            b.len(),
            start.elapsed() - build_time
        );

        self.dx = dx;
        Ok(BuildReport {
            system_size: b.len(),
            rhs_norm: b.norm(),
            increment_norm: self.dx.norm(),
            solve_info,
        })
    }

    fn build_rhs(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<DVector<f64>> {
        let dof_set = self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)?;
        assemble_rhs(scheme, model, dof_set)
    }

    fn calculate_reactions(&mut self, scheme: &dyn Scheme, model: &mut ModelPart) -> Result<()> {
        let dof_set = self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)?;
        let b = assemble_rhs_all_dofs(scheme, model, dof_set)?;
        store_reactions(model, dof_set, &b)
    }

    fn dof_set(&self) -> Result<&DofSet> {
        self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)
    }

    fn increment(&self) -> &DVector<f64> {
        &self.dx
    }

    fn equation_system_size(&self) -> usize {
        self.dof_set
            .as_ref()
            .map_or(0, DofSet::equation_system_size)
    }

    fn clear(&mut self) {
        self.dof_set = None;
        self.system_ready = false;
        self.pattern = None;
        self.dx = DVector::zeros(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DenseLuSolver;
    use crate::constraints::MasterSlaveConstraint;
    use crate::elements::{LinearBar, PointLoad};
    use crate::model::DofKey;
    use crate::scheme::IncrementalUpdateStaticScheme;
    use crate::variables::VariableRegistry;
    use std::sync::Arc;

    fn clamped_chain() -> (ModelPart, Vec<DofKey>) {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        let mut keys = Vec::new();
        for id in 1..=3 {
            model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
            keys.push(model.add_dof(id, ux).unwrap());
        }
        model.add_element(Box::new(LinearBar::new(1, [1, 2], ux, 2.0)));
        model.add_element(Box::new(LinearBar::new(2, [2, 3], ux, 2.0)));
        model.add_condition(Box::new(PointLoad::new(3, 3, ux, 1.0)));
        model.fix_dof(keys[0]).unwrap();
        (model, keys)
    }

    #[test]
    fn fixed_dofs_are_numbered_last() {
        let (model, keys) = clamped_chain();
        let scheme = IncrementalUpdateStaticScheme;
        let mut builder = EliminationBuilderAndSolver::new(Box::new(DenseLuSolver));
        builder.set_up_dof_set(&scheme, &model).unwrap();
        builder.set_up_system(&model).unwrap();

        let dof_set = builder.dof_set().unwrap();
        assert_eq!(builder.equation_system_size(), 2);
        assert_eq!(dof_set.equation_id(keys[1]).unwrap(), 0);
        assert_eq!(dof_set.equation_id(keys[2]).unwrap(), 1);
        assert_eq!(dof_set.equation_id(keys[0]).unwrap(), 2);

        let report = builder.build_and_solve(&scheme, &model).unwrap();
        assert_eq!(report.system_size, 2);
        let dx = builder.increment();
        assert!((dx[0] - 0.5).abs() < 1e-12);
        assert!((dx[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constraints_are_rejected() {
        let (mut model, keys) = clamped_chain();
        model.add_constraint(MasterSlaveConstraint::tie(1, keys[2], keys[1]));
        let mut builder = EliminationBuilderAndSolver::new(Box::new(DenseLuSolver));
        assert!(matches!(
            builder.set_up_dof_set(&IncrementalUpdateStaticScheme, &model),
            Err(SolverError::UnsupportedConstraints("elimination"))
        ));
    }
}
