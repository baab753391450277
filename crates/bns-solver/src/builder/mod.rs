//! Builder-and-solver strategies.
//!
//! A builder owns the dof set, the equation numbering and the global
//! system of one model. Per nonlinear iteration it assembles the system,
//! applies boundary conditions or the reduced projection, calls the linear
//! solver and leaves the increment (indexed by equation id) ready for
//! [`Scheme::update`](crate::scheme::Scheme::update).
//!
//! The variants are picked once, at construction, by [`create_builder`]:
//!
//! | builder | system | Dirichlet | constraints |
//! |---|---|---|---|
//! | [`BlockBuilderAndSolver`] | all dofs | rows/columns after assembly | yes |
//! | [`EliminationBuilderAndSolver`] | free dofs | never assembled | rejected |
//! | [`RomBuilderAndSolver`] | `r x r` dense | zero basis rows | ignored |

pub mod block;
pub mod elimination;
pub mod rom;

pub use block::BlockBuilderAndSolver;
pub use elimination::EliminationBuilderAndSolver;
pub use rom::RomBuilderAndSolver;

use crate::backend::{SolveInfo, create_linear_solver};
use crate::config::{BuilderKind, BuilderSettings};
use crate::dof_set::DofSet;
use crate::error::Result;
use crate::model::ModelPart;
use crate::scheme::Scheme;
use crate::variables::VariableRegistry;
use nalgebra::DVector;

/// Summary of one `build_and_solve` call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    /// Size of the solved system (reduced size for ROM)
    pub system_size: usize,
    /// Norm of the right hand side that was solved for
    pub rhs_norm: f64,
    /// Norm of the increment, in full-order dofs
    pub increment_norm: f64,
    pub solve_info: SolveInfo,
}

pub trait BuilderAndSolver: Send {
    fn name(&self) -> &'static str;

    /// Collect the dofs of all elements, conditions and constraints.
    fn set_up_dof_set(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<()>;

    /// Number the equations and size the system. Invalidates any cached
    /// sparsity pattern.
    fn set_up_system(&mut self, model: &ModelPart) -> Result<()>;

    /// Assemble, apply boundary conditions, solve. The increment is left in
    /// [`increment`](Self::increment).
    fn build_and_solve(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<BuildReport>;

    /// Assemble the right hand side only, with fixed rows zeroed.
    fn build_rhs(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<DVector<f64>>;

    /// Store the reaction of every fixed dof on the dof itself.
    fn calculate_reactions(&mut self, scheme: &dyn Scheme, model: &mut ModelPart) -> Result<()>;

    fn dof_set(&self) -> Result<&DofSet>;

    /// Last solved increment, indexed by equation id
    fn increment(&self) -> &DVector<f64>;

    fn equation_system_size(&self) -> usize;

    /// Drop the dof set and all system storage.
    fn clear(&mut self);
}

/// `reaction = -b` for every fixed dof. `b` must be assembled without
/// Dirichlet treatment and cover every dof of the set.
pub(crate) fn store_reactions(model: &mut ModelPart, dof_set: &DofSet, b: &DVector<f64>) -> Result<()> {
    for (key, eq) in dof_set.iter() {
        let dof = model.dof_mut(*key)?;
        if dof.fixed && eq < b.len() {
            dof.reaction_value = -b[eq];
        }
    }
    Ok(())
}

/// Creates the builder selected by the settings, with its linear solver.
pub fn create_builder(
    settings: &BuilderSettings,
    registry: &VariableRegistry,
) -> Result<Box<dyn BuilderAndSolver>> {
    settings.validate()?;
    let linear_solver = create_linear_solver(&settings.linear_solver);
    let builder: Box<dyn BuilderAndSolver> = match settings.builder {
        BuilderKind::Block => Box::new(
            BlockBuilderAndSolver::new(linear_solver).with_reactions(settings.calculate_reactions),
        ),
        BuilderKind::Elimination => Box::new(
            EliminationBuilderAndSolver::new(linear_solver)
                .with_reactions(settings.calculate_reactions),
        ),
        BuilderKind::Rom => Box::new(
            RomBuilderAndSolver::new(
                linear_solver,
                registry,
                &settings.nodal_unknowns,
                settings.number_of_rom_dofs,
            )?
            .with_reactions(settings.calculate_reactions),
        ),
    };
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;

    #[test]
    fn factory_selects_builder() {
        let registry = VariableRegistry::structural();

        let block = create_builder(&BuilderSettings::default(), &registry).unwrap();
        assert_eq!(block.name(), "block");

        let settings = BuilderSettings {
            builder: BuilderKind::Elimination,
            ..Default::default()
        };
        assert_eq!(create_builder(&settings, &registry).unwrap().name(), "elimination");

        let rom = BuilderSettings::rom(["DISPLACEMENT_X"], 2);
        assert_eq!(create_builder(&rom, &registry).unwrap().name(), "rom");
    }

    #[test]
    fn rom_with_unknown_variable_fails_at_construction() {
        let registry = VariableRegistry::structural();
        let settings = BuilderSettings::rom(["PRESSURE"], 2);
        assert!(matches!(
            create_builder(&settings, &registry),
            Err(SolverError::UnknownVariable(name)) if name == "PRESSURE"
        ));
    }
}
