//! Response functions for adjoint problems.
//!
//! A response `J` enters the adjoint equations only through its partial
//! derivatives with respect to the dofs and their first and second time
//! derivatives, evaluated entity by entity in the local dof order.

use crate::error::Result;
use crate::model::{DofKey, Entity, ModelPart};
use nalgebra::DVector;

pub trait AdjointResponse: Send + Sync {
    /// `∂J/∂w` for the local dofs of `entity`.
    fn calculate_gradient(
        &self,
        entity: &dyn Entity,
        dofs: &[DofKey],
        model: &ModelPart,
        gradient: &mut DVector<f64>,
    ) -> Result<()>;

    /// `∂J/∂ẇ`; zero unless overridden.
    fn calculate_first_derivatives_gradient(
        &self,
        _entity: &dyn Entity,
        dofs: &[DofKey],
        _model: &ModelPart,
        gradient: &mut DVector<f64>,
    ) -> Result<()> {
        *gradient = DVector::zeros(dofs.len());
        Ok(())
    }

    /// `∂J/∂ẅ`; zero unless overridden.
    fn calculate_second_derivatives_gradient(
        &self,
        _entity: &dyn Entity,
        dofs: &[DofKey],
        _model: &ModelPart,
        gradient: &mut DVector<f64>,
    ) -> Result<()> {
        *gradient = DVector::zeros(dofs.len());
        Ok(())
    }
}

/// `J = u(dof)` at every time step.
///
/// The gradient is reported by exactly one entity, the one with id
/// `traced_entity`; every other entity reports zero. The id should be
/// unique across elements and conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodalValueResponse {
    pub dof: DofKey,
    pub traced_entity: usize,
}

impl NodalValueResponse {
    pub fn new(dof: DofKey, traced_entity: usize) -> Self {
        Self { dof, traced_entity }
    }
}

impl AdjointResponse for NodalValueResponse {
    fn calculate_gradient(
        &self,
        entity: &dyn Entity,
        dofs: &[DofKey],
        _model: &ModelPart,
        gradient: &mut DVector<f64>,
    ) -> Result<()> {
        *gradient = DVector::zeros(dofs.len());
        if entity.id() == self.traced_entity {
            if let Some(i) = dofs.iter().position(|k| *k == self.dof) {
                gradient[i] = 1.0;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::LinearBar;
    use crate::variables::VariableRegistry;
    use std::sync::Arc;

    #[test]
    fn only_the_traced_entity_reports_the_gradient() {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        for id in 1..=3 {
            model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
            model.add_dof(id, ux).unwrap();
        }
        let first = LinearBar::new(1, [1, 2], ux, 1.0);
        let second = LinearBar::new(2, [2, 3], ux, 1.0);
        let response = NodalValueResponse::new(DofKey::new(2, ux), 2);

        let mut gradient = DVector::zeros(0);
        let dofs = first.dof_list(&model).unwrap();
        response
            .calculate_gradient(&first, &dofs, &model, &mut gradient)
            .unwrap();
        assert_eq!(gradient, DVector::from_vec(vec![0.0, 0.0]));

        let dofs = second.dof_list(&model).unwrap();
        response
            .calculate_gradient(&second, &dofs, &model, &mut gradient)
            .unwrap();
        assert_eq!(gradient, DVector::from_vec(vec![1.0, 0.0]));

        response
            .calculate_second_derivatives_gradient(&second, &dofs, &model, &mut gradient)
            .unwrap();
        assert_eq!(gradient, DVector::zeros(2));
    }
}
