//! Reduced order model builder.
//!
//! Every node carries a basis matrix `Φ_n` of shape
//! `nodal_unknowns × number_of_rom_dofs`. For each entity the rows of the
//! nodal bases of its dofs are stacked into a local projection `T`, and the
//! local system is reduced with a Galerkin projection:
//!
//! ```text
//! A_r += Tᵗ LHS T        b_r += Tᵗ RHS
//! ```
//!
//! The `r x r` dense system is solved and the reduced increment is mapped
//! back to the nodes with `Δx_n = Φ_n Δx_r`. No full-order matrix is built.
//!
//! Rows of `T` belonging to fixed dofs are zero. Since the back-projection
//! does not zero them, the reduced operator is not the plain restriction
//! of the full-order one; fixed dofs are still left untouched because the
//! scheme update skips them.

use super::{BuildReport, BuilderAndSolver};
use crate::backend::{LinearSolver, LinearSystemData};
use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::{DofKey, ModelPart, Node};
use crate::scheme::{LocalSystem, Scheme};
use crate::sparse_assembly::{active_entities, assemble_rhs, zero_fixed_rows};
use crate::variables::{VariableKey, VariableRegistry};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::time::Instant;

/// Dense reduced system of one rayon worker, or of the whole model once
/// reduced.
struct ReducedSystem {
    lhs: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl ReducedSystem {
    fn zeros(rom_dofs: usize) -> Self {
        Self {
            lhs: DMatrix::zeros(rom_dofs, rom_dofs),
            rhs: DVector::zeros(rom_dofs),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.lhs += other.lhs;
        self.rhs += other.rhs;
        self
    }
}

pub struct RomBuilderAndSolver {
    linear_solver: Box<dyn LinearSolver>,
    nodal_unknowns: Vec<VariableKey>,
    rom_dofs: usize,
    calculate_reactions: bool,
    dof_set: Option<DofSet>,
    system_ready: bool,
    reduced_state: Option<DVector<f64>>,
    dx_reduced: DVector<f64>,
    dx: DVector<f64>,
}

impl RomBuilderAndSolver {
    /// Resolves the unknown names through the registry.
    pub fn new<S: AsRef<str>>(
        linear_solver: Box<dyn LinearSolver>,
        registry: &VariableRegistry,
        nodal_unknowns: &[S],
        rom_dofs: usize,
    ) -> Result<Self> {
        let nodal_unknowns = nodal_unknowns
            .iter()
            .map(|name| registry.key(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if nodal_unknowns.is_empty() || rom_dofs == 0 {
            return Err(SolverError::InvalidConfiguration(
                "the rom builder needs nodal unknowns and a positive number of rom dofs".into(),
            ));
        }

        Ok(Self {
            linear_solver,
            nodal_unknowns,
            rom_dofs,
            calculate_reactions: false,
            dof_set: None,
            system_ready: false,
            reduced_state: None,
            dx_reduced: DVector::zeros(rom_dofs),
            dx: DVector::zeros(0),
        })
    }

    /// Only checks that every dof has a reaction variable in debug builds;
    /// the ROM builder itself computes no reactions.
    pub fn with_reactions(mut self, calculate_reactions: bool) -> Self {
        self.calculate_reactions = calculate_reactions;
        self
    }

    pub fn number_of_rom_dofs(&self) -> usize {
        self.rom_dofs
    }

    pub fn nodal_unknowns(&self) -> &[VariableKey] {
        &self.nodal_unknowns
    }

    /// Reduced coordinates, available after the first solve
    pub fn reduced_state(&self) -> Option<&DVector<f64>> {
        self.reduced_state.as_ref()
    }

    pub fn reduced_increment(&self) -> &DVector<f64> {
        &self.dx_reduced
    }

    fn unknown_index(&self, variable: VariableKey) -> Option<usize> {
        self.nodal_unknowns.iter().position(|&v| v == variable)
    }

    fn basis<'n>(&self, node: &'n Node) -> Result<&'n DMatrix<f64>> {
        let basis = node
            .reduced_basis
            .as_ref()
            .ok_or(SolverError::MissingReducedBasis(node.id))?;
        if basis.nrows() != self.nodal_unknowns.len() || basis.ncols() != self.rom_dofs {
            return Err(SolverError::ReducedBasisShape {
                node: node.id,
                rows: basis.nrows(),
                cols: basis.ncols(),
                expected_rows: self.nodal_unknowns.len(),
                expected_cols: self.rom_dofs,
            });
        }
        Ok(basis)
    }

    /// Equation ids of the node's reduced unknowns, paired with their row
    /// in the basis.
    fn nodal_equations(&self, dof_set: &DofSet, node: &Node) -> Vec<(usize, usize)> {
        self.nodal_unknowns
            .iter()
            .enumerate()
            .filter_map(|(row, &variable)| {
                dof_set
                    .equation_id(DofKey::new(node.id, variable))
                    .ok()
                    .map(|eq| (row, eq))
            })
            .collect()
    }

    /// `x_r = Σ_n Φ_nᵗ x_n` over the current nodal values.
    pub fn project_to_reduced_basis(&self, model: &ModelPart) -> Result<DVector<f64>> {
        let dof_set = self.dof_set()?;
        let r = self.rom_dofs;
        model
            .nodes()
            .par_iter()
            .map(|node| -> Result<DVector<f64>> {
                let equations = self.nodal_equations(dof_set, node);
                if equations.is_empty() {
                    return Ok(DVector::zeros(r));
                }
                let mut x = DVector::zeros(self.nodal_unknowns.len());
                for &(row, _) in &equations {
                    x[row] = model.dof_value(DofKey::new(node.id, self.nodal_unknowns[row]))?;
                }
                Ok(self.basis(node)?.tr_mul(&x))
            })
            .try_reduce(|| DVector::zeros(r), |a, b| Ok(a + b))
    }

    /// `Δx_n = Φ_n Δx_r`, scattered into a full-order vector indexed by
    /// equation id. Dofs outside the reduced unknowns stay zero.
    pub fn project_to_fine_basis(&self, model: &ModelPart, dx_reduced: &DVector<f64>) -> Result<DVector<f64>> {
        let dof_set = self.dof_set()?;
        let nodal: Vec<Vec<(usize, f64)>> = model
            .nodes()
            .par_iter()
            .map(|node| -> Result<Vec<(usize, f64)>> {
                let equations = self.nodal_equations(dof_set, node);
                if equations.is_empty() {
                    return Ok(Vec::new());
                }
                let values = self.basis(node)? * dx_reduced;
                Ok(equations
                    .into_iter()
                    .map(|(row, eq)| (eq, values[row]))
                    .collect())
            })
            .collect::<Result<_>>()?;

        let mut dx = DVector::zeros(dof_set.len());
        for (eq, value) in nodal.into_iter().flatten() {
            dx[eq] = value;
        }
        Ok(dx)
    }

    /// Local projection `T`: one row per local dof.
    fn local_basis(&self, model: &ModelPart, dofs: &[DofKey], t: &mut DMatrix<f64>) -> Result<()> {
        t.resize_mut(dofs.len(), self.rom_dofs, 0.0);
        t.fill(0.0);
        for (i, key) in dofs.iter().enumerate() {
            let Some(row) = self.unknown_index(key.variable) else {
                continue;
            };
            if model.is_fixed(*key)? {
                continue;
            }
            let basis = self.basis(model.node(key.node)?)?;
            t.row_mut(i).copy_from(&basis.row(row));
        }
        Ok(())
    }

    fn assemble_reduced(&self, scheme: &dyn Scheme, model: &ModelPart) -> Result<ReducedSystem> {
        let dof_set = self.dof_set()?;
        let r = self.rom_dofs;
        active_entities(model)
            .try_fold(
                || (LocalSystem::new(), DMatrix::<f64>::zeros(0, 0), ReducedSystem::zeros(r)),
                |(mut local, mut t, mut system), entity| -> Result<_> {
                    scheme.calculate_system_contributions(entity, model, dof_set, &mut local)?;
                    self.local_basis(model, &local.dofs, &mut t)?;
                    let lhs_t = &local.lhs * &t;
                    system.lhs += t.tr_mul(&lhs_t);
                    system.rhs += t.tr_mul(&local.rhs);
                    Ok((local, t, system))
                },
            )
            .map(|partial| partial.map(|(_, _, system)| system))
            .try_reduce(|| ReducedSystem::zeros(r), |a, b| Ok(a.merge(b)))
    }
}

impl BuilderAndSolver for RomBuilderAndSolver {
    fn name(&self) -> &'static str {
        "rom"
    }

    fn set_up_dof_set(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<()> {
        let dof_set = DofSet::scan(scheme, model)?;
        if cfg!(debug_assertions) && self.calculate_reactions {
            dof_set.check_reactions(model)?;
        }
        self.dof_set = Some(dof_set);
        self.system_ready = false;
        Ok(())
    }

    fn set_up_system(&mut self, model: &ModelPart) -> Result<()> {
        let dof_set = self.dof_set.as_mut().ok_or(SolverError::DofSetNotInitialized)?;
        dof_set.number_block();
        let size = dof_set.equation_system_size();

        if !model.constraints().is_empty() {
            warn!(
                "ROM builder ignores {} master-slave constraints",
                model.constraints().len()
            );
        }
        self.reduced_state = None;
        self.dx_reduced = DVector::zeros(self.rom_dofs);
        self.dx = DVector::zeros(size);
        self.system_ready = true;
        info!(
            "ROM system set up: {} full-order dofs, {} reduced dofs",
            size, self.rom_dofs
        );
        Ok(())
    }

    fn build_and_solve(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<BuildReport> {
        self.dof_set()?;
        if !self.system_ready {
            return Err(SolverError::SystemNotInitialized);
        }

        if self.reduced_state.is_none() {
            self.reduced_state = Some(self.project_to_reduced_basis(model)?);
        }

        let start = Instant::now();
        let system = self.assemble_reduced(scheme, model)?;
        let build_time = start.elapsed();
        info!("ROM build time: {:.3?}", build_time);

        let (dx_reduced, solve_info) = self
            .linear_solver
            .solve(&LinearSystemData::dense(&system.lhs, &system.rhs))?;
        let dx = self.project_to_fine_basis(model, &dx_reduced)?;
        info!("ROM solve time: {:.3?}", start.elapsed() - build_time);
        debug!("Reduced increment: {:?}", dx_reduced.as_slice());

        if let Some(state) = self.reduced_state.as_mut() {
            *state += &dx_reduced;
        }
        self.dx_reduced = dx_reduced;
        self.dx = dx;

        Ok(BuildReport {
            system_size: self.rom_dofs,
            rhs_norm: system.rhs.norm(),
            increment_norm: self.dx.norm(),
            solve_info,
        })
    }

    fn build_rhs(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<DVector<f64>> {
        let dof_set = self.dof_set()?;
        let mut b = assemble_rhs(scheme, model, dof_set)?;
        zero_fixed_rows(&mut b, &dof_set.fixed_by_equation(model)?);
        Ok(b)
    }

    fn calculate_reactions(&mut self, _scheme: &dyn Scheme, _model: &mut ModelPart) -> Result<()> {
        debug!("Reactions are not computed by the ROM builder");
        Ok(())
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
        self.reduced_state = None;
        self.dx_reduced = DVector::zeros(self.rom_dofs);
        self.dx = DVector::zeros(0);
    }
}
