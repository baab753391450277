//! Block builder: every dof is an equation.
//!
//! Fixed dofs stay in the system. After assembly their rows are reduced to
//! the diagonal and their columns are cleared, so the linear solve returns
//! an exact zero increment for them.
//!
//! Master-slave constraints are applied through the relation matrix `T`
//! (independent dofs to all dofs) and the slave correction `g`, the amount
//! by which every slave currently violates its relation:
//!
//! ```text
//! Tᵗ A T dx_i = Tᵗ (b - A g)
//! dx          = T dx_i + g
//! ```
//!
//! Slave rows and columns of `Tᵗ A T` are empty; they get a scaled unit
//! diagonal and a zero right hand side.

use super::{BuildReport, BuilderAndSolver, store_reactions};
use crate::backend::{LinearSolver, LinearSystemData, SystemMatrix, csr_mul_vector};
use crate::constraints::ResolvedConstraints;
use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::ModelPart;
use crate::scheme::Scheme;
use crate::sparse_assembly::{
    SparsityPattern, apply_dirichlet, assemble_rhs, assemble_rhs_all_dofs, assemble_system,
    zero_fixed_rows,
};
use log::{debug, info};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::time::Instant;

struct ConstraintSystem {
    resolved: ResolvedConstraints,
    t: CsrMatrix<f64>,
    t_transpose: CsrMatrix<f64>,
    slave_equations: Vec<usize>,
}

impl ConstraintSystem {
    fn new(model: &ModelPart, dof_set: &DofSet) -> Result<Self> {
        let resolved = ResolvedConstraints::resolve(model)?;
        let t = resolved.relation_matrix(dof_set)?;
        let t_transpose = t.transpose();
        let slave_equations = resolved
            .iter()
            .map(|(slave, _)| dof_set.equation_id(*slave))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            resolved,
            t,
            t_transpose,
            slave_equations,
        })
    }

    /// Current violation of every slave relation, by equation id.
    fn slave_correction(&self, model: &ModelPart, dof_set: &DofSet) -> Result<DVector<f64>> {
        let mut g = DVector::zeros(dof_set.equation_system_size());
        for ((slave, relation), &eq) in self.resolved.iter().zip(&self.slave_equations) {
            g[eq] = relation.evaluate(model)? - model.dof_value(*slave)?;
        }
        Ok(g)
    }

    fn transform(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        g: &DVector<f64>,
    ) -> (CsrMatrix<f64>, DVector<f64>) {
        let reduced = &(&self.t_transpose * a) * &self.t;
        let mut b_reduced = csr_mul_vector(&self.t_transpose, &(b - csr_mul_vector(a, g)));

        let diagonal = SystemMatrix::Sparse(&reduced).diagonal();
        let mut scale = diagonal.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
        if scale == 0.0 {
            scale = 1.0;
        }

        let mut coo = CooMatrix::from(&reduced);
        for &s in &self.slave_equations {
            coo.push(s, s, scale);
            b_reduced[s] = 0.0;
        }
        (CsrMatrix::from(&coo), b_reduced)
    }
}

pub struct BlockBuilderAndSolver {
    linear_solver: Box<dyn LinearSolver>,
    calculate_reactions: bool,
    dof_set: Option<DofSet>,
    constraints: Option<ConstraintSystem>,
    system_ready: bool,
    pattern: Option<SparsityPattern>,
    lhs: Option<CsrMatrix<f64>>,
    rhs: DVector<f64>,
    slave_correction: Option<DVector<f64>>,
    dx: DVector<f64>,
}

impl BlockBuilderAndSolver {
    pub fn new(linear_solver: Box<dyn LinearSolver>) -> Self {
        Self {
            linear_solver,
            calculate_reactions: false,
            dof_set: None,
            constraints: None,
            system_ready: false,
            pattern: None,
            lhs: None,
            rhs: DVector::zeros(0),
            slave_correction: None,
            dx: DVector::zeros(0),
        }
    }

    pub fn with_reactions(mut self, calculate_reactions: bool) -> Self {
        self.calculate_reactions = calculate_reactions;
        self
    }

    /// Assemble the system and apply constraints and Dirichlet conditions.
    pub fn build(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<()> {
        let dof_set = self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)?;
        if !self.system_ready {
            return Err(SolverError::SystemNotInitialized);
        }

        let start = Instant::now();
        if self.pattern.is_none() {
            self.pattern = Some(SparsityPattern::build(scheme, model, dof_set)?);
        }
        let pattern = self.pattern.as_ref().ok_or(SolverError::SystemNotInitialized)?;

        let (mut a, mut b) = assemble_system(scheme, model, dof_set, pattern)?;
        self.slave_correction = None;
        if let Some(constraints) = &self.constraints {
            let g = constraints.slave_correction(model, dof_set)?;
            (a, b) = constraints.transform(&a, &b, &g);
            self.slave_correction = Some(g);
        }

        let fixed = dof_set.fixed_by_equation(model)?;
        apply_dirichlet(&mut a, &mut b, &fixed);

        debug!(
            "Block build: {} equations, {} non-zeros in {:.3?}",
            b.len(),
            a.nnz(),
            start.elapsed()
        );
        self.lhs = Some(a);
        self.rhs = b;
        Ok(())
    }

    /// Solve the built system into the increment.
    pub fn solve(&mut self) -> Result<BuildReport> {
        let a = self.lhs.as_ref().ok_or(SolverError::SystemNotInitialized)?;

        let start = Instant::now();
        let (mut dx, solve_info) = self
            .linear_solver
            .solve(&LinearSystemData::sparse(a, &self.rhs))?;
        if let (Some(constraints), Some(g)) = (&self.constraints, &self.slave_correction) {
            dx = csr_mul_vector(&constraints.t, &dx) + g;
        }
        debug!(
            "{} solve of {} equations in {:.3?}",
            solve_info.solver_name,
            self.rhs.len(),
            start.elapsed()
        );

        self.dx = dx;
        Ok(BuildReport {
            system_size: self.rhs.len(),
            rhs_norm: self.rhs.norm(),
            increment_norm: self.dx.norm(),
            solve_info,
        })
    }

    /// Last built matrix, with boundary conditions applied
    pub fn system_matrix(&self) -> Option<&CsrMatrix<f64>> {
        self.lhs.as_ref()
    }

    /// Last built right hand side, with boundary conditions applied
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }
}

impl BuilderAndSolver for BlockBuilderAndSolver {
    fn name(&self) -> &'static str {
        "block"
    }

    fn set_up_dof_set(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<()> {
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
        let dof_set = self.dof_set.as_mut().ok_or(SolverError::DofSetNotInitialized)?;
        dof_set.number_block();
        let size = dof_set.equation_system_size();

        self.constraints = if model.constraints().is_empty() {
            None
        } else {
            Some(ConstraintSystem::new(model, dof_set)?)
        };
        self.pattern = None;
        self.lhs = None;
        self.rhs = DVector::zeros(size);
        self.dx = DVector::zeros(size);
        self.system_ready = true;

        info!(
            "Block system set up: {} equations, {} constrained dofs",
            size,
            self.constraints.as_ref().map_or(0, |c| c.slave_equations.len())
        );
        Ok(())
    }

    fn build_and_solve(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<BuildReport> {
        self.build(scheme, model)?;
        self.solve()
    }

    fn build_rhs(&mut self, scheme: &dyn Scheme, model: &ModelPart) -> Result<DVector<f64>> {
        let dof_set = self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)?;
        let mut b = assemble_rhs(scheme, model, dof_set)?;
        zero_fixed_rows(&mut b, &dof_set.fixed_by_equation(model)?);
        Ok(b)
    }

    fn calculate_reactions(&mut self, scheme: &dyn Scheme, model: &mut ModelPart) -> Result<()> {
        let dof_set = self.dof_set.as_ref().ok_or(SolverError::DofSetNotInitialized)?;
        let mut b = assemble_rhs_all_dofs(scheme, model, dof_set)?;
        // Slave forces are carried over to their masters
        if let Some(constraints) = &self.constraints {
            b = csr_mul_vector(&constraints.t_transpose, &b);
        }
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
        self.constraints = None;
        self.system_ready = false;
        self.pattern = None;
        self.lhs = None;
        self.rhs = DVector::zeros(0);
        self.slave_correction = None;
        self.dx = DVector::zeros(0);
    }
}
