//! Lumped nodal mass with optional viscous damping.
//!
//! Contributes nothing to the static residual; only the time derivative
//! terms are non-zero (`M = [m]`, `C = [c]`).

use crate::error::Result;
use crate::model::{DofKey, Entity, ModelPart, NodeId};
use crate::variables::VariableKey;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct LumpedMass {
    pub id: usize,
    pub node: [NodeId; 1],
    pub variable: VariableKey,
    pub mass: f64,
    pub damping: f64,
}

impl LumpedMass {
    pub fn new(id: usize, node: NodeId, variable: VariableKey, mass: f64) -> Self {
        Self {
            id,
            node: [node],
            variable,
            mass,
            damping: 0.0,
        }
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }
}

impl Entity for LumpedMass {
    fn id(&self) -> usize {
        self.id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node
    }

    fn dof_list(&self, _model: &ModelPart) -> Result<Vec<DofKey>> {
        Ok(vec![DofKey::new(self.node[0], self.variable)])
    }

    fn calculate_local_system(
        &self,
        _model: &ModelPart,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> Result<()> {
        *lhs = DMatrix::zeros(1, 1);
        *rhs = DVector::zeros(1);
        Ok(())
    }

    fn calculate_first_derivatives_lhs(&self, _model: &ModelPart, lhs: &mut DMatrix<f64>) -> Result<()> {
        *lhs = DMatrix::from_element(1, 1, self.damping);
        Ok(())
    }

    fn calculate_second_derivatives_lhs(&self, _model: &ModelPart, lhs: &mut DMatrix<f64>) -> Result<()> {
        *lhs = DMatrix::from_element(1, 1, self.mass);
        Ok(())
    }
}
