//! Adjoint scheme for Bossak time integration.
//!
//! Solves the adjoint problem of a first or second order dynamic system
//! backwards in time. The nodal dof values hold the residual adjoint `λ1`;
//! the time integration adjoints `λ2`, `λ3` and the auxiliary adjoint are
//! kept per dof by the scheme, for the current and the previous step.
//!
//! Local system of an entity, with `K`, `D`, `M` the derivatives of its
//! residual with respect to `w`, `ẇ` and `ẅ`:
//!
//! ```text
//! LHS = K + c6 D + c7 (1 - α) M
//! RHS = -∂J/∂w - c6 ∂J/∂ẇ - c7 ∂J/∂ẅ
//!       + (c7 aux' + c4 λ2' + c5 λ3') / n_entities(dof)
//!       - LHS λ1
//! ```
//!
//! Primes denote values of the previous step. The previous step term is
//! shared between the entities touching a dof so that it enters the
//! global right hand side exactly once.
//!
//! After every increment:
//!
//! ```text
//! λ2 = Σ_e (-∂J/∂ẇ - D λ1)           + c0 λ2' + c1 λ3'
//! λ3 = Σ_e (-∂J/∂ẅ - (1 - α) M λ1)   + c2 λ2' + c3 λ3' + aux'
//! ```
//!
//! and once the step converged, `aux = -Σ_e (α M λ1 + ∂J/∂ẅ)`.

use super::{LocalSystem, Scheme, apply_increment};
use crate::config::AdjointBossakSettings;
use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::{DofKey, Entity, ModelPart};
use crate::response::AdjointResponse;
use crate::sparse_assembly::active_entities;
use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Bossak parameters and the derived integration constants for a time step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BossakConstants {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub c4: f64,
    pub c5: f64,
    pub c6: f64,
    pub c7: f64,
}

impl BossakConstants {
    pub fn new(alpha: f64, time_step: f64) -> Self {
        let beta = 0.25 * (1.0 - alpha) * (1.0 - alpha);
        let gamma = 0.5 - alpha;
        let dt = time_step;
        Self {
            alpha,
            beta,
            gamma,
            c0: 1.0 - gamma / beta,
            c1: -1.0 / (beta * dt),
            c2: (1.0 - 0.5 * gamma / beta) * dt,
            c3: 1.0 - 0.5 / beta,
            c4: (beta - gamma * (gamma + 0.5)) / (dt * beta * beta),
            c5: -(gamma + 0.5) / (dt * dt * beta * beta),
            c6: gamma / (beta * dt),
            c7: 1.0 / (dt * dt * beta),
        }
    }
}

/// Time integration adjoints of one dof
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeSchemeAdjoints {
    pub lambda2: f64,
    pub lambda3: f64,
    pub auxiliary: f64,
}

type NodalSums = FxHashMap<DofKey, (f64, f64)>;

pub struct ResidualBasedAdjointBossakScheme {
    alpha: f64,
    constants: Option<BossakConstants>,
    response: Box<dyn AdjointResponse>,
    current: FxHashMap<DofKey, TimeSchemeAdjoints>,
    previous: FxHashMap<DofKey, TimeSchemeAdjoints>,
    neighbour_count: FxHashMap<DofKey, usize>,
}

fn local_values(model: &ModelPart, dofs: &[DofKey]) -> Result<DVector<f64>> {
    let values = dofs
        .iter()
        .map(|k| model.dof_value(*k))
        .collect::<Result<Vec<_>>>()?;
    Ok(DVector::from_vec(values))
}

/// A local matrix and vector must both match the local dof count.
fn check_local(entity: usize, n: usize, matrix: &DMatrix<f64>, vector: &DVector<f64>) -> Result<()> {
    if matrix.nrows() != n || matrix.ncols() != n || vector.len() != n {
        return Err(SolverError::LocalSizeMismatch {
            entity,
            lhs_rows: matrix.nrows(),
            lhs_cols: matrix.ncols(),
            rhs_len: vector.len(),
            num_equations: n,
        });
    }
    Ok(())
}

fn merge_sums(mut a: NodalSums, b: NodalSums) -> NodalSums {
    for (key, (x, y)) in b {
        let entry = a.entry(key).or_insert((0.0, 0.0));
        entry.0 += x;
        entry.1 += y;
    }
    a
}

impl ResidualBasedAdjointBossakScheme {
    pub fn new(settings: &AdjointBossakSettings, response: Box<dyn AdjointResponse>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            alpha: settings.alpha_bossak,
            constants: None,
            response,
            current: FxHashMap::default(),
            previous: FxHashMap::default(),
            neighbour_count: FxHashMap::default(),
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Constants of the current step, once it has been initialized
    pub fn constants(&self) -> Option<&BossakConstants> {
        self.constants.as_ref()
    }

    /// Current time integration adjoints of a dof (zero if never touched)
    pub fn time_scheme_adjoints(&self, key: DofKey) -> TimeSchemeAdjoints {
        self.current.get(&key).copied().unwrap_or_default()
    }

    fn step_constants(&self) -> Result<BossakConstants> {
        self.constants
            .ok_or(SolverError::StepNotInitialized("adjoint Bossak"))
    }

    /// Sum two local vectors per entity into per-dof totals.
    fn nodal_sums<F>(&self, model: &ModelPart, local: F) -> Result<NodalSums>
    where
        F: Fn(&dyn Entity, &[DofKey]) -> Result<(DVector<f64>, DVector<f64>)> + Send + Sync,
    {
        active_entities(model)
            .try_fold(NodalSums::default, |mut sums, entity| -> Result<_> {
                let dofs = self.dof_list(entity, model)?;
                let (a, b) = local(entity, &dofs)?;
                for (i, key) in dofs.iter().enumerate() {
                    let entry = sums.entry(*key).or_insert((0.0, 0.0));
                    entry.0 += a[i];
                    entry.1 += b[i];
                }
                Ok(sums)
            })
            .try_reduce(NodalSums::default, |a, b| Ok(merge_sums(a, b)))
    }

    /// `(D, ∂J/∂ẇ)` of an entity.
    fn first_derivative_terms(
        &self,
        entity: &dyn Entity,
        dofs: &[DofKey],
        model: &ModelPart,
    ) -> Result<(DMatrix<f64>, DVector<f64>)> {
        let mut damping = DMatrix::zeros(0, 0);
        let mut gradient = DVector::zeros(0);
        entity.calculate_first_derivatives_lhs(model, &mut damping)?;
        self.response
            .calculate_first_derivatives_gradient(entity, dofs, model, &mut gradient)?;
        check_local(entity.id(), dofs.len(), &damping, &gradient)?;
        Ok((damping, gradient))
    }

    /// `(scale M, ∂J/∂ẅ)` of an entity.
    fn second_derivative_terms(
        &self,
        entity: &dyn Entity,
        dofs: &[DofKey],
        model: &ModelPart,
        scale: f64,
    ) -> Result<(DMatrix<f64>, DVector<f64>)> {
        let mut mass = DMatrix::zeros(0, 0);
        let mut gradient = DVector::zeros(0);
        entity.calculate_second_derivatives_lhs(model, &mut mass)?;
        mass *= scale;
        self.response
            .calculate_second_derivatives_gradient(entity, dofs, model, &mut gradient)?;
        check_local(entity.id(), dofs.len(), &mass, &gradient)?;
        Ok((mass, gradient))
    }
}

impl Scheme for ResidualBasedAdjointBossakScheme {
    fn name(&self) -> &'static str {
        "adjoint-bossak"
    }

    fn initialize_solution_step(&mut self, model: &ModelPart) -> Result<()> {
        let time_step = model.previous_time() - model.time();
        if time_step <= 0.0 {
            return Err(SolverError::InvalidTimeStep(time_step));
        }
        let constants = BossakConstants::new(self.alpha, time_step);

        let scheme: &Self = self;
        let neighbour_count = active_entities(model)
            .try_fold(FxHashMap::<DofKey, usize>::default, |mut count, entity| -> Result<_> {
                for key in scheme.dof_list(entity, model)? {
                    *count.entry(key).or_insert(0) += 1;
                }
                Ok(count)
            })
            .try_reduce(FxHashMap::default, |mut a, b| {
                for (key, n) in b {
                    *a.entry(key).or_insert(0) += n;
                }
                Ok(a)
            })?;

        self.neighbour_count = neighbour_count;
        self.previous = std::mem::take(&mut self.current);
        self.constants = Some(constants);
        debug!(
            "Adjoint Bossak step: dt = {:.3e}, alpha = {}, c6 = {:.3e}, c7 = {:.3e}",
            time_step, self.alpha, constants.c6, constants.c7
        );
        Ok(())
    }

    fn calculate_system_contributions(
        &self,
        entity: &dyn Entity,
        model: &ModelPart,
        dof_set: &DofSet,
        local: &mut LocalSystem,
    ) -> Result<()> {
        let c = self.step_constants()?;
        local.dofs = self.dof_list(entity, model)?;
        let dofs = &local.dofs;
        let n = dofs.len();
        let lambda1 = local_values(model, dofs)?;

        let mut residual = DVector::zeros(0);
        let mut gradient = DVector::zeros(0);
        entity.calculate_local_system(model, &mut local.lhs, &mut residual)?;
        self.response
            .calculate_gradient(entity, dofs, model, &mut gradient)?;
        check_local(entity.id(), n, &local.lhs, &gradient)?;
        local.rhs = -gradient;

        let (damping, gradient) = self.first_derivative_terms(entity, dofs, model)?;
        local.lhs += damping * c.c6;
        local.rhs -= gradient * c.c6;

        let (mass, gradient) = self.second_derivative_terms(entity, dofs, model, 1.0 - c.alpha)?;
        local.lhs += mass * c.c7;
        local.rhs -= gradient * c.c7;

        for (i, key) in dofs.iter().enumerate() {
            let old = self.previous.get(key).copied().unwrap_or_default();
            let sharing = self.neighbour_count.get(key).copied().unwrap_or(1).max(1);
            local.rhs[i] += (c.c7 * old.auxiliary + c.c4 * old.lambda2 + c.c5 * old.lambda3)
                / sharing as f64;
        }
        local.rhs -= &local.lhs * &lambda1;

        dof_set.equation_ids_into(&local.dofs, &mut local.equation_ids)?;
        local.check_sizes(entity.id())
    }

    fn calculate_rhs_contribution(
        &self,
        entity: &dyn Entity,
        model: &ModelPart,
        dof_set: &DofSet,
        local: &mut LocalSystem,
    ) -> Result<()> {
        self.calculate_system_contributions(entity, model, dof_set, local)
    }

    fn update(&mut self, model: &mut ModelPart, dof_set: &DofSet, dx: &DVector<f64>) -> Result<()> {
        apply_increment(model, dof_set, dx);
        let model: &ModelPart = model;
        let c = self.step_constants()?;

        let sums = self.nodal_sums(model, |entity, dofs| {
            let lambda1 = local_values(model, dofs)?;
            let (damping, first) = self.first_derivative_terms(entity, dofs, model)?;
            let (mass, second) = self.second_derivative_terms(entity, dofs, model, 1.0 - c.alpha)?;
            Ok((-first - damping * &lambda1, -second - mass * &lambda1))
        })?;

        for key in dof_set.keys() {
            let (lambda2, lambda3) = sums.get(key).copied().unwrap_or((0.0, 0.0));
            let old = self.previous.get(key).copied().unwrap_or_default();
            let entry = self.current.entry(*key).or_default();
            entry.lambda2 = lambda2 + c.c0 * old.lambda2 + c.c1 * old.lambda3;
            entry.lambda3 = lambda3 + c.c2 * old.lambda2 + c.c3 * old.lambda3 + old.auxiliary;
        }
        Ok(())
    }

    fn finalize_solution_step(&mut self, model: &ModelPart) -> Result<()> {
        let c = self.step_constants()?;
        let sums = self.nodal_sums(model, |entity, dofs| {
            let lambda1 = local_values(model, dofs)?;
            let (mass, second) = self.second_derivative_terms(entity, dofs, model, c.alpha)?;
            Ok((mass * &lambda1 + second, DVector::zeros(dofs.len())))
        })?;

        for entry in self.current.values_mut() {
            entry.auxiliary = 0.0;
        }
        for (key, (auxiliary, _)) in sums {
            self.current.entry(key).or_default().auxiliary = -auxiliary;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DenseLuSolver;
    use crate::builder::{BlockBuilderAndSolver, BuilderAndSolver};
    use crate::config::BuilderSettings;
    use crate::elements::{GroundSpring, LinearBar, LumpedMass};
    use crate::response::NodalValueResponse;
    use crate::strategy::NewtonRaphsonStrategy;
    use crate::variables::VariableRegistry;
    use std::sync::Arc;

    fn adjoint_strategy(response: NodalValueResponse, alpha: f64) -> NewtonRaphsonStrategy {
        let settings = AdjointBossakSettings { alpha_bossak: alpha };
        let scheme = ResidualBasedAdjointBossakScheme::new(&settings, Box::new(response)).unwrap();
        NewtonRaphsonStrategy::new(
            Box::new(BlockBuilderAndSolver::new(Box::new(DenseLuSolver))),
            Box::new(scheme),
            &BuilderSettings::default(),
        )
    }

    /// One linear adjoint step driven by hand, keeping the concrete scheme.
    fn solve_step(scheme: &mut ResidualBasedAdjointBossakScheme, model: &mut ModelPart) {
        let mut builder = BlockBuilderAndSolver::new(Box::new(DenseLuSolver));
        scheme.initialize_solution_step(model).unwrap();
        builder.set_up_dof_set(&*scheme, model).unwrap();
        builder.set_up_system(model).unwrap();
        builder.build_and_solve(&*scheme, model).unwrap();
        let dof_set = builder.dof_set().unwrap();
        scheme.update(model, dof_set, builder.increment()).unwrap();
        scheme.finalize_solution_step(model).unwrap();
    }

    #[test]
    fn constants_follow_alpha_and_time_step() {
        let c = BossakConstants::new(0.0, 0.5);
        assert_eq!(c.beta, 0.25);
        assert_eq!(c.gamma, 0.5);
        assert_eq!(c.c0, -1.0);
        assert_eq!(c.c3, -1.0);
        assert_eq!(c.c6, 4.0);
        assert_eq!(c.c7, 16.0);

        let c = BossakConstants::new(-0.3, 0.1);
        assert!((c.beta - 0.4225).abs() < 1e-15);
        assert!((c.gamma - 0.8).abs() < 1e-15);
        assert!((c.c6 - 0.8 / (0.4225 * 0.1)).abs() < 1e-10);
        assert!((c.c7 - 1.0 / (0.01 * 0.4225)).abs() < 1e-9);
    }

    #[test]
    fn step_needs_decreasing_time() {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        model.add_node(1, [0.0; 3]).unwrap();
        let key = model.add_dof(1, ux).unwrap();
        model.add_element(Box::new(GroundSpring::new(1, 1, ux, 1.0)));

        let settings = AdjointBossakSettings::default();
        let mut scheme =
            ResidualBasedAdjointBossakScheme::new(&settings, Box::new(NodalValueResponse::new(key, 1)))
                .unwrap();
        let dof_set = DofSet::from_keys([key]).unwrap();
        let mut local = LocalSystem::new();
        assert!(matches!(
            scheme.calculate_system_contributions(model.elements()[0].as_ref(), &model, &dof_set, &mut local),
            Err(SolverError::StepNotInitialized(_))
        ));

        model.advance_time(1.0);
        assert!(matches!(
            scheme.initialize_solution_step(&model),
            Err(SolverError::InvalidTimeStep(dt)) if dt < 0.0
        ));

        model.advance_time(0.75);
        scheme.initialize_solution_step(&model).unwrap();
        assert_eq!(scheme.constants().unwrap().c7, BossakConstants::new(-0.3, 0.25).c7);
    }

    #[test]
    fn static_limit_gives_the_influence_line() {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        let mut keys = Vec::new();
        for id in 1..=3 {
            model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
            keys.push(model.add_dof(id, ux).unwrap());
        }
        model.add_element(Box::new(LinearBar::new(1, [1, 2], ux, 1.0)));
        model.add_element(Box::new(LinearBar::new(2, [2, 3], ux, 1.0)));
        model.fix_dof(keys[0]).unwrap();
        model.advance_time(1.0);
        model.advance_time(0.9);

        let mut strategy = adjoint_strategy(NodalValueResponse::new(keys[2], 2), -0.3);
        strategy.solve_solution_step(&mut model).unwrap();

        // K λ = -∂J/∂u for J = u3
        assert_eq!(model.dof_value(keys[0]).unwrap(), 0.0);
        assert!((model.dof_value(keys[1]).unwrap() + 1.0).abs() < 1e-10);
        assert!((model.dof_value(keys[2]).unwrap() + 2.0).abs() < 1e-10);
    }

    #[test]
    fn two_steps_carry_the_time_scheme_adjoints() {
        let (k, m, d, alpha, dt) = (4.0, 2.0, 0.5, -0.3, 0.1);
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        model.add_node(1, [0.0; 3]).unwrap();
        let key = model.add_dof(1, ux).unwrap();
        model.add_element(Box::new(GroundSpring::new(1, 1, ux, k)));
        model.add_element(Box::new(LumpedMass::new(2, 1, ux, m).with_damping(d)));

        let c = BossakConstants::new(alpha, dt);
        let a = k + c.c6 * d + c.c7 * (1.0 - alpha) * m;
        let settings = AdjointBossakSettings { alpha_bossak: alpha };
        let mut scheme =
            ResidualBasedAdjointBossakScheme::new(&settings, Box::new(NodalValueResponse::new(key, 1)))
                .unwrap();

        model.advance_time(1.0);
        model.advance_time(1.0 - dt);
        solve_step(&mut scheme, &mut model);
        let lambda1 = model.dof_value(key).unwrap();
        assert!((lambda1 + 1.0 / a).abs() < 1e-12);

        let first = scheme.time_scheme_adjoints(key);
        assert!((first.lambda2 + d * lambda1).abs() < 1e-12);
        assert!((first.lambda3 + (1.0 - alpha) * m * lambda1).abs() < 1e-12);
        assert!((first.auxiliary + alpha * m * lambda1).abs() < 1e-12);

        model.advance_time(1.0 - 2.0 * dt);
        solve_step(&mut scheme, &mut model);
        let carried = c.c7 * first.auxiliary + c.c4 * first.lambda2 + c.c5 * first.lambda3;
        let lambda1 = model.dof_value(key).unwrap();
        assert!((lambda1 - (carried - 1.0) / a).abs() < 1e-10);

        let second = scheme.time_scheme_adjoints(key);
        let expected_lambda2 = -d * lambda1 + c.c0 * first.lambda2 + c.c1 * first.lambda3;
        assert!((second.lambda2 - expected_lambda2).abs() < 1e-9);
    }
}
