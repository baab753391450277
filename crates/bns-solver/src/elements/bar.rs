//! Two-node axial bar acting on one variable.
//!
//! ```text
//! K = k * [ 1  -1]
//!         [-1   1]
//! ```

use crate::error::Result;
use crate::model::{DofKey, Entity, ModelPart, NodeId};
use crate::variables::VariableKey;
use nalgebra::{DMatrix, DVector, Vector2};

#[derive(Debug, Clone, PartialEq)]
pub struct LinearBar {
    pub id: usize,
    /// Node connectivity [node1_id, node2_id]
    pub nodes: [NodeId; 2],
    pub variable: VariableKey,
    pub stiffness: f64,
    pub active: bool,
}

impl LinearBar {
    pub fn new(id: usize, nodes: [NodeId; 2], variable: VariableKey, stiffness: f64) -> Self {
        Self {
            id,
            nodes,
            variable,
            stiffness,
            active: true,
        }
    }

    /// Same bar, flagged inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn stiffness_matrix(&self) -> DMatrix<f64> {
        let k = self.stiffness;
        DMatrix::from_row_slice(2, 2, &[k, -k, -k, k])
    }
}

impl Entity for LinearBar {
    fn id(&self) -> usize {
        self.id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    fn dof_list(&self, _model: &ModelPart) -> Result<Vec<DofKey>> {
        Ok(self
            .nodes
            .iter()
            .map(|&n| DofKey::new(n, self.variable))
            .collect())
    }

    fn calculate_local_system(
        &self,
        model: &ModelPart,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> Result<()> {
        let u = Vector2::new(
            model.dof_value(DofKey::new(self.nodes[0], self.variable))?,
            model.dof_value(DofKey::new(self.nodes[1], self.variable))?,
        );
        *lhs = self.stiffness_matrix();
        let internal = self.stiffness * (u[0] - u[1]);
        *rhs = DVector::from_vec(vec![-internal, internal]);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableRegistry;
    use std::sync::Arc;

    #[test]
    fn residual_vanishes_for_rigid_motion() {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        for id in 1..=2 {
            model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
            let key = model.add_dof(id, ux).unwrap();
            model.set_dof_value(key, 0.25).unwrap();
        }

        let bar = LinearBar::new(1, [1, 2], ux, 3.0);
        let mut lhs = DMatrix::zeros(0, 0);
        let mut rhs = DVector::zeros(0);
        bar.calculate_local_system(&model, &mut lhs, &mut rhs).unwrap();

        assert_eq!(lhs, DMatrix::from_row_slice(2, 2, &[3.0, -3.0, -3.0, 3.0]));
        assert_eq!(rhs, DVector::zeros(2));
    }

    #[test]
    fn stretched_bar_pulls_nodes_together() {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        model.add_node(1, [0.0; 3]).unwrap();
        model.add_node(2, [1.0, 0.0, 0.0]).unwrap();
        model.add_dof(1, ux).unwrap();
        let key = model.add_dof(2, ux).unwrap();
        model.set_dof_value(key, 0.5).unwrap();

        let bar = LinearBar::new(1, [1, 2], ux, 2.0);
        let mut rhs = DVector::zeros(0);
        bar.calculate_right_hand_side(&model, &mut rhs).unwrap();

        assert_eq!(rhs, DVector::from_vec(vec![1.0, -1.0]));
    }
}
