//! Schemes: the glue between entities and the builders.
//!
//! A scheme asks an entity for its local system, maps the local dofs to
//! equation ids, and applies solved increments back onto the nodal values.
//!
//! - [`IncrementalUpdateStaticScheme`]: the entity's residual form as-is
//! - [`ResidualBasedAdjointBossakScheme`]: adjoint equations of a Bossak
//!   time integration, solved backwards in time

pub mod adjoint_bossak;

pub use adjoint_bossak::{BossakConstants, ResidualBasedAdjointBossakScheme, TimeSchemeAdjoints};

use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::{DofKey, Entity, ModelPart};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Local contribution of one entity, plus the scratch buffers used to
/// compute it. Builders keep one per rayon worker.
#[derive(Debug, Clone)]
pub struct LocalSystem {
    pub lhs: DMatrix<f64>,
    pub rhs: DVector<f64>,
    pub equation_ids: Vec<usize>,
    pub dofs: Vec<DofKey>,
}

impl LocalSystem {
    pub fn new() -> Self {
        Self {
            lhs: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
            equation_ids: Vec::new(),
            dofs: Vec::new(),
        }
    }

    /// LHS must be n x n and RHS of length n, n = number of equation ids.
    pub fn check_sizes(&self, entity: usize) -> Result<()> {
        let n = self.equation_ids.len();
        if self.lhs.nrows() != n || self.lhs.ncols() != n || self.rhs.len() != n {
            return Err(self.mismatch(entity));
        }
        Ok(())
    }

    pub fn check_rhs_size(&self, entity: usize) -> Result<()> {
        if self.rhs.len() != self.equation_ids.len() {
            return Err(self.mismatch(entity));
        }
        Ok(())
    }

    fn mismatch(&self, entity: usize) -> SolverError {
        SolverError::LocalSizeMismatch {
            entity,
            lhs_rows: self.lhs.nrows(),
            lhs_cols: self.lhs.ncols(),
            rhs_len: self.rhs.len(),
            num_equations: self.equation_ids.len(),
        }
    }
}

impl Default for LocalSystem {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Scheme: Send + Sync {
    fn name(&self) -> &'static str;

    fn dof_list(&self, entity: &dyn Entity, model: &ModelPart) -> Result<Vec<DofKey>> {
        entity.dof_list(model)
    }

    /// Fill `local` with the entity's LHS, RHS, dofs and equation ids.
    fn calculate_system_contributions(
        &self,
        entity: &dyn Entity,
        model: &ModelPart,
        dof_set: &DofSet,
        local: &mut LocalSystem,
    ) -> Result<()> {
        local.dofs = self.dof_list(entity, model)?;
        entity.calculate_local_system(model, &mut local.lhs, &mut local.rhs)?;
        dof_set.equation_ids_into(&local.dofs, &mut local.equation_ids)?;
        local.check_sizes(entity.id())
    }

    /// Fill only the RHS, dofs and equation ids of `local`.
    fn calculate_rhs_contribution(
        &self,
        entity: &dyn Entity,
        model: &ModelPart,
        dof_set: &DofSet,
        local: &mut LocalSystem,
    ) -> Result<()> {
        local.dofs = self.dof_list(entity, model)?;
        entity.calculate_right_hand_side(model, &mut local.rhs)?;
        dof_set.equation_ids_into(&local.dofs, &mut local.equation_ids)?;
        local.check_rhs_size(entity.id())
    }

    /// Called once at the start of every solution step, before any build.
    fn initialize_solution_step(&mut self, _model: &ModelPart) -> Result<()> {
        Ok(())
    }

    /// Apply the increment `dx` (indexed by equation id) to the model.
    fn update(&mut self, model: &mut ModelPart, dof_set: &DofSet, dx: &DVector<f64>) -> Result<()>;

    /// Called once after the solution step converged.
    fn finalize_solution_step(&mut self, _model: &ModelPart) -> Result<()> {
        Ok(())
    }
}

/// `x += dx` for every free dof of the set. Fixed dofs and dofs numbered
/// outside `dx` are left alone.
pub fn apply_increment(model: &mut ModelPart, dof_set: &DofSet, dx: &DVector<f64>) {
    model.nodes_mut().par_iter_mut().for_each(|node| {
        let node_id = node.id;
        for dof in node.dofs.iter_mut().filter(|d| !d.fixed) {
            if let Ok(eq) = dof_set.equation_id(DofKey::new(node_id, dof.variable)) {
                if eq < dx.len() {
                    dof.value += dx[eq];
                }
            }
        }
    });
}

/// Residual-based incremental update for static problems: the entity's
/// local system is used as-is and free dofs are incremented by `dx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalUpdateStaticScheme;

impl Scheme for IncrementalUpdateStaticScheme {
    fn name(&self) -> &'static str {
        "incremental-update-static"
    }

    fn update(&mut self, model: &mut ModelPart, dof_set: &DofSet, dx: &DVector<f64>) -> Result<()> {
        apply_increment(model, dof_set, dx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableRegistry;
    use std::sync::Arc;

    #[test]
    fn update_skips_fixed_dofs() {
        let mut model = ModelPart::new(Arc::new(VariableRegistry::structural()));
        let mut keys = Vec::new();
        for id in 1..=3 {
            model.add_node(id, [0.0; 3]).unwrap();
            keys.push(model.add_dof_by_name(id, "DISPLACEMENT_X").unwrap());
        }
        model.fix_dof(keys[0]).unwrap();
        model.set_dof_value(keys[0], 0.5).unwrap();

        let dof_set = DofSet::from_keys(keys.clone()).unwrap();
        let dx = DVector::from_vec(vec![10.0, 1.0, 2.0]);
        IncrementalUpdateStaticScheme
            .update(&mut model, &dof_set, &dx)
            .unwrap();

        assert_eq!(model.dof_value(keys[0]).unwrap(), 0.5);
        assert_eq!(model.dof_value(keys[1]).unwrap(), 1.0);
        assert_eq!(model.dof_value(keys[2]).unwrap(), 2.0);
    }

    #[test]
    fn size_check_reports_mismatch() {
        let mut local = LocalSystem::new();
        local.lhs = DMatrix::zeros(2, 2);
        local.rhs = DVector::zeros(3);
        local.equation_ids = vec![0, 1];
        assert!(matches!(
            local.check_sizes(9),
            Err(SolverError::LocalSizeMismatch { entity: 9, rhs_len: 3, .. })
        ));
    }
}
