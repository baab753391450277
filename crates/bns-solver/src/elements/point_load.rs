//! Constant nodal load.

use crate::error::Result;
use crate::model::{DofKey, Entity, ModelPart, NodeId};
use crate::variables::VariableKey;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct PointLoad {
    pub id: usize,
    pub node: [NodeId; 1],
    pub variable: VariableKey,
    pub magnitude: f64,
}

impl PointLoad {
    pub fn new(id: usize, node: NodeId, variable: VariableKey, magnitude: f64) -> Self {
        Self {
            id,
            node: [node],
            variable,
            magnitude,
        }
    }
}

impl Entity for PointLoad {
    fn id(&self) -> usize {
        self.id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node
    }

    fn dof_list(&self, _model: &ModelPart) -> Result<Vec<DofKey>> {
        Ok(vec![DofKey::new(self.node[0], self.variable)])
    }

    // The load does not depend on the solution: zero stiffness.
    fn calculate_local_system(
        &self,
        model: &ModelPart,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> Result<()> {
        *lhs = DMatrix::zeros(1, 1);
        self.calculate_right_hand_side(model, rhs)
    }

    fn calculate_right_hand_side(&self, _model: &ModelPart, rhs: &mut DVector<f64>) -> Result<()> {
        *rhs = DVector::from_element(1, self.magnitude);
        Ok(())
    }
}
