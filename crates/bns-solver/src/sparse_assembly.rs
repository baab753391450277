//! Parallel sparse assembly of the global system.
//!
//! Assembly happens in two passes:
//!
//! 1. [`SparsityPattern::build`] scans every entity once per system set-up
//!    and records which (row, column) pairs can receive a contribution. The
//!    diagonal is always part of the pattern.
//! 2. [`assemble_system`] and [`assemble_rhs`] run once per iteration. Rayon
//!    workers compute local systems into per-worker scratch and add them to
//!    an [`AssemblyTarget`], whose entries are atomic cells. Different
//!    workers may hit the same entry; the compare-and-swap add makes that
//!    race free without locks.
//!
//! The target is turned into a `CsrMatrix`/`DVector` only after the parallel
//! region has returned. If any entity fails, the target is dropped and no
//! partially assembled system is ever handed out.
//!
//! Contributions with an equation id at or above the equation system size
//! are skipped. The elimination builder relies on this to keep fixed dofs
//! out of the system.

use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::{Entity, ModelPart};
use crate::scheme::{LocalSystem, Scheme};
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// `f64` with an atomic add, stored as the bit pattern of an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Adds `value` and returns the previous value.
    pub fn fetch_add(&self, value: f64) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + value).to_bits();
            match self
                .0
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(previous) => return f64::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn into_inner(self) -> f64 {
        f64::from_bits(self.0.into_inner())
    }
}

/// CSR structure (row offsets and sorted column indices) of the global
/// matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    size: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
}

impl SparsityPattern {
    /// Collect the pattern from all entities, active or not.
    pub fn build(scheme: &dyn Scheme, model: &ModelPart, dof_set: &DofSet) -> Result<Self> {
        let size = dof_set.equation_system_size();
        let rows: Vec<Mutex<Vec<usize>>> = (0..size).map(|i| Mutex::new(vec![i])).collect();

        model
            .elements()
            .par_iter()
            .chain(model.conditions().par_iter())
            .try_for_each_init(Vec::new, |ids, entity| -> Result<()> {
                let dofs = scheme.dof_list(entity.as_ref(), model)?;
                dof_set.equation_ids_into(&dofs, ids)?;
                for &row in ids.iter().filter(|&&i| i < size) {
                    let mut cols = rows[row].lock().unwrap_or_else(PoisonError::into_inner);
                    cols.extend(ids.iter().copied().filter(|&j| j < size));
                }
                Ok(())
            })?;

        let mut rows: Vec<Vec<usize>> = rows
            .into_iter()
            .map(|row| row.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect();
        rows.par_iter_mut().for_each(|cols| {
            cols.sort_unstable();
            cols.dedup();
        });

        let pattern = Self::from_rows(size, rows);
        debug!(
            "Sparsity pattern: {} equations, {} non-zeros",
            pattern.size,
            pattern.nnz()
        );
        Ok(pattern)
    }

    /// Rows must hold sorted, deduplicated column indices below `size`.
    fn from_rows(size: usize, rows: Vec<Vec<usize>>) -> Self {
        let mut row_offsets = Vec::with_capacity(size + 1);
        row_offsets.push(0);
        let mut col_indices = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for cols in rows {
            col_indices.extend(cols);
            row_offsets.push(col_indices.len());
        }
        Self {
            size,
            row_offsets,
            col_indices,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    /// Index into the value array of entry (row, col), if it is in the pattern.
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        let start = *self.row_offsets.get(row)?;
        let end = *self.row_offsets.get(row + 1)?;
        self.col_indices[start..end]
            .binary_search(&col)
            .ok()
            .map(|offset| start + offset)
    }
}

/// Global system under assembly.
pub struct AssemblyTarget<'p> {
    pattern: Option<&'p SparsityPattern>,
    values: Vec<AtomicF64>,
    rhs: Vec<AtomicF64>,
}

impl<'p> AssemblyTarget<'p> {
    /// Matrix and right hand side.
    pub fn new(pattern: &'p SparsityPattern) -> Self {
        Self {
            pattern: Some(pattern),
            values: (0..pattern.nnz()).map(|_| AtomicF64::default()).collect(),
            rhs: (0..pattern.size()).map(|_| AtomicF64::default()).collect(),
        }
    }

    /// Right hand side only.
    pub fn rhs_only(size: usize) -> Self {
        Self {
            pattern: None,
            values: Vec::new(),
            rhs: (0..size).map(|_| AtomicF64::default()).collect(),
        }
    }

    fn size(&self) -> usize {
        self.rhs.len()
    }

    /// Add a local system. Only the RHS is used for RHS-only targets.
    pub fn assemble(&self, local: &LocalSystem) -> Result<()> {
        let size = self.size();
        for (i, &row) in local.equation_ids.iter().enumerate() {
            if row >= size {
                continue;
            }
            self.rhs[row].fetch_add(local.rhs[i]);

            let Some(pattern) = self.pattern else {
                continue;
            };
            for (j, &col) in local.equation_ids.iter().enumerate() {
                if col >= size {
                    continue;
                }
                let pos = pattern.position(row, col).ok_or_else(|| {
                    SolverError::SparseFormat(format!(
                        "entry ({row}, {col}) is not in the sparsity pattern"
                    ))
                })?;
                self.values[pos].fetch_add(local.lhs[(i, j)]);
            }
        }
        Ok(())
    }

    /// Convert into the finished system. Only call after the parallel
    /// region that assembled into this target has returned.
    pub fn finish(self) -> Result<(CsrMatrix<f64>, DVector<f64>)> {
        let pattern = self
            .pattern
            .ok_or_else(|| SolverError::SparseFormat("target has no matrix".into()))?;
        let values: Vec<f64> = self.values.into_iter().map(AtomicF64::into_inner).collect();
        let matrix = CsrMatrix::try_from_csr_data(
            pattern.size,
            pattern.size,
            pattern.row_offsets.clone(),
            pattern.col_indices.clone(),
            values,
        )
        .map_err(|e| SolverError::SparseFormat(e.to_string()))?;
        let rhs = DVector::from_iterator(self.rhs.len(), self.rhs.into_iter().map(AtomicF64::into_inner));
        Ok((matrix, rhs))
    }

    pub fn finish_rhs(self) -> DVector<f64> {
        DVector::from_iterator(self.rhs.len(), self.rhs.into_iter().map(AtomicF64::into_inner))
    }
}

/// Elements and conditions that are not flagged inactive.
pub(crate) fn active_entities(model: &ModelPart) -> impl ParallelIterator<Item = &dyn Entity> {
    model
        .elements()
        .par_iter()
        .chain(model.conditions().par_iter())
        .map(|e| e.as_ref() as &dyn Entity)
        .filter(|e| e.is_active())
}

/// Assemble LHS and RHS of all active entities. No boundary conditions are
/// applied.
pub fn assemble_system(
    scheme: &dyn Scheme,
    model: &ModelPart,
    dof_set: &DofSet,
    pattern: &SparsityPattern,
) -> Result<(CsrMatrix<f64>, DVector<f64>)> {
    let target = AssemblyTarget::new(pattern);
    active_entities(model).try_for_each_init(LocalSystem::new, |local, entity| {
        scheme.calculate_system_contributions(entity, model, dof_set, local)?;
        target.assemble(local)
    })?;
    target.finish()
}

/// Assemble the RHS of all active entities. No boundary conditions are
/// applied.
pub fn assemble_rhs(scheme: &dyn Scheme, model: &ModelPart, dof_set: &DofSet) -> Result<DVector<f64>> {
    assemble_rhs_sized(scheme, model, dof_set, dof_set.equation_system_size())
}

/// Like [`assemble_rhs`], but with a row for every dof of the set, including
/// the ones outside the equation system. Used for reactions.
pub fn assemble_rhs_all_dofs(
    scheme: &dyn Scheme,
    model: &ModelPart,
    dof_set: &DofSet,
) -> Result<DVector<f64>> {
    assemble_rhs_sized(scheme, model, dof_set, dof_set.len())
}

fn assemble_rhs_sized(
    scheme: &dyn Scheme,
    model: &ModelPart,
    dof_set: &DofSet,
    size: usize,
) -> Result<DVector<f64>> {
    let target = AssemblyTarget::rhs_only(size);
    active_entities(model).try_for_each_init(LocalSystem::new, |local, entity| {
        scheme.calculate_rhs_contribution(entity, model, dof_set, local)?;
        target.assemble(local)
    })?;
    Ok(target.finish_rhs())
}

/// Zero the RHS entries of fixed equations.
///
/// `fixed` is indexed by equation id and may be longer than `rhs`.
pub fn zero_fixed_rows(rhs: &mut DVector<f64>, fixed: &[bool]) {
    for (value, _) in rhs.iter_mut().zip(fixed).filter(|(_, f)| **f) {
        *value = 0.0;
    }
}

/// Dirichlet treatment by rows and columns.
///
/// Fixed rows keep only their diagonal (1 if it was zero) and a zero RHS;
/// fixed columns of free rows are zeroed. The solution of the modified
/// system is exactly zero at every fixed equation.
pub fn apply_dirichlet(matrix: &mut CsrMatrix<f64>, rhs: &mut DVector<f64>, fixed: &[bool]) {
    for (i, mut row) in matrix.row_iter_mut().enumerate() {
        let row_fixed = fixed.get(i).copied().unwrap_or(false);
        let (cols, values) = row.cols_and_values_mut();
        for (&j, value) in cols.iter().zip(values.iter_mut()) {
            if row_fixed {
                if j == i {
                    if *value == 0.0 {
                        *value = 1.0;
                    }
                } else {
                    *value = 0.0;
                }
            } else if fixed.get(j).copied().unwrap_or(false) {
                *value = 0.0;
            }
        }
    }
    zero_fixed_rows(rhs, fixed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{LinearBar, PointLoad};
    use crate::model::{DofKey, NodeId};
    use crate::scheme::IncrementalUpdateStaticScheme;
    use crate::variables::{VariableKey, VariableRegistry};
    use std::sync::Arc;

    fn bar_model(num_nodes: usize) -> ModelPart {
        let registry = Arc::new(VariableRegistry::structural());
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let mut model = ModelPart::new(registry);
        for id in 1..=num_nodes {
            model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
            model.add_dof(id, ux).unwrap();
        }
        for id in 1..num_nodes {
            model.add_element(Box::new(LinearBar::new(id, [id, id + 1], ux, 1.0)));
        }
        model
    }

    fn dense(matrix: &CsrMatrix<f64>) -> nalgebra::DMatrix<f64> {
        crate::backend::SystemMatrix::Sparse(matrix).to_dense()
    }

    #[test]
    fn atomic_add_accumulates_across_threads() {
        let cell = AtomicF64::new(0.5);
        (0..1000).into_par_iter().for_each(|_| {
            cell.fetch_add(1.0);
        });
        assert_eq!(cell.load(), 1000.5);
    }

    #[test]
    fn pattern_contains_diagonal_and_couplings() {
        let model = bar_model(3);
        let scheme = IncrementalUpdateStaticScheme;
        let dof_set = DofSet::scan(&scheme, &model).unwrap();
        let pattern = SparsityPattern::build(&scheme, &model, &dof_set).unwrap();

        assert_eq!(pattern.size(), 3);
        assert_eq!(pattern.nnz(), 7);
        assert!(pattern.position(0, 0).is_some());
        assert!(pattern.position(0, 1).is_some());
        assert!(pattern.position(0, 2).is_none());
    }

    #[test]
    fn two_bars_assemble_to_the_chain_matrix() {
        let model = bar_model(3);
        let scheme = IncrementalUpdateStaticScheme;
        let dof_set = DofSet::scan(&scheme, &model).unwrap();
        let pattern = SparsityPattern::build(&scheme, &model, &dof_set).unwrap();

        let (a, b) = assemble_system(&scheme, &model, &dof_set, &pattern).unwrap();
        let expected = nalgebra::DMatrix::from_row_slice(
            3,
            3,
            &[1.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 1.0],
        );
        assert_eq!(dense(&a), expected);
        assert_eq!(b, DVector::zeros(3));
    }

    #[test]
    fn rhs_only_assembly_matches_full_assembly() {
        let mut model = bar_model(3);
        let ux = model.registry().key("DISPLACEMENT_X").unwrap();
        model.add_condition(Box::new(PointLoad::new(10, 3, ux, 2.5)));
        let scheme = IncrementalUpdateStaticScheme;
        let dof_set = DofSet::scan(&scheme, &model).unwrap();
        let pattern = SparsityPattern::build(&scheme, &model, &dof_set).unwrap();

        let (_, b_full) = assemble_system(&scheme, &model, &dof_set, &pattern).unwrap();
        let b_rhs = assemble_rhs(&scheme, &model, &dof_set).unwrap();
        assert_eq!(b_full, b_rhs);
        assert_eq!(b_rhs[2], 2.5);
    }

    #[test]
    fn dirichlet_keeps_diagonal_and_clears_couplings() {
        let model = bar_model(3);
        let scheme = IncrementalUpdateStaticScheme;
        let dof_set = DofSet::scan(&scheme, &model).unwrap();
        let pattern = SparsityPattern::build(&scheme, &model, &dof_set).unwrap();
        let (mut a, _) = assemble_system(&scheme, &model, &dof_set, &pattern).unwrap();
        let mut b = DVector::from_vec(vec![3.0, 1.0, 1.0]);

        apply_dirichlet(&mut a, &mut b, &[true, false, false]);

        let expected = nalgebra::DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.0, 0.0, 0.0, 2.0, -1.0, 0.0, -1.0, 1.0],
        );
        assert_eq!(dense(&a), expected);
        assert_eq!(b, DVector::from_vec(vec![0.0, 1.0, 1.0]));
    }

    /// Two dofs, but a 3x3 local matrix.
    struct OversizedBar([NodeId; 2], VariableKey);

    impl Entity for OversizedBar {
        fn id(&self) -> usize {
            7
        }

        fn node_ids(&self) -> &[NodeId] {
            &self.0
        }

        fn dof_list(&self, _model: &ModelPart) -> Result<Vec<DofKey>> {
            Ok(self.0.iter().map(|&n| DofKey::new(n, self.1)).collect())
        }

        fn calculate_local_system(
            &self,
            _model: &ModelPart,
            lhs: &mut nalgebra::DMatrix<f64>,
            rhs: &mut DVector<f64>,
        ) -> Result<()> {
            *lhs = nalgebra::DMatrix::identity(3, 3);
            *rhs = DVector::zeros(2);
            Ok(())
        }
    }

    #[test]
    fn mis_sized_local_system_aborts_assembly() {
        let mut model = bar_model(3);
        let ux = model.registry().key("DISPLACEMENT_X").unwrap();
        model.add_element(Box::new(OversizedBar([2, 3], ux)));
        let scheme = IncrementalUpdateStaticScheme;
        let dof_set = DofSet::scan(&scheme, &model).unwrap();
        let pattern = SparsityPattern::build(&scheme, &model, &dof_set).unwrap();

        assert!(matches!(
            assemble_system(&scheme, &model, &dof_set, &pattern),
            Err(SolverError::LocalSizeMismatch {
                entity: 7,
                lhs_rows: 3,
                lhs_cols: 3,
                rhs_len: 2,
                num_equations: 2,
            })
        ));
    }
}
