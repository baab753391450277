//! Spring connecting a single dof to the ground.

use crate::error::Result;
use crate::model::{DofKey, Entity, ModelPart, NodeId};
use crate::variables::VariableKey;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct GroundSpring {
    pub id: usize,
    pub node: [NodeId; 1],
    pub variable: VariableKey,
    pub stiffness: f64,
}

impl GroundSpring {
    pub fn new(id: usize, node: NodeId, variable: VariableKey, stiffness: f64) -> Self {
        Self {
            id,
            node: [node],
            variable,
            stiffness,
        }
    }

    fn key(&self) -> DofKey {
        DofKey::new(self.node[0], self.variable)
    }
}

impl Entity for GroundSpring {
    fn id(&self) -> usize {
        self.id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node
    }

    fn dof_list(&self, _model: &ModelPart) -> Result<Vec<DofKey>> {
        Ok(vec![self.key()])
    }

    fn calculate_local_system(
        &self,
        model: &ModelPart,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> Result<()> {
        let u = model.dof_value(self.key())?;
        *lhs = DMatrix::from_element(1, 1, self.stiffness);
        *rhs = DVector::from_element(1, -self.stiffness * u);
        Ok(())
    }
}
