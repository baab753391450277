//! Degree of freedom registry and equation numbering.
//!
//! The dof set is collected from elements, conditions and master-slave
//! constraints in parallel. Each rayon worker accumulates into its own hash
//! set; the partial sets are merged and sorted by (node id, variable key) so
//! that equation numbering is identical from run to run, whatever the
//! scheduling.

use crate::error::{Result, SolverError};
use crate::model::{DofKey, ModelPart};
use crate::scheme::Scheme;
use log::debug;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// Sorted, deduplicated set of dofs with their equation ids.
#[derive(Debug, Clone)]
pub struct DofSet {
    keys: Vec<DofKey>,
    equation_ids: Vec<usize>,
    position: FxHashMap<DofKey, usize>,
    equation_system_size: usize,
}

impl DofSet {
    /// Scan elements, conditions and constraints for their dofs.
    ///
    /// The resulting set carries block numbering (equation id = position).
    pub fn scan(scheme: &dyn Scheme, model: &ModelPart) -> Result<Self> {
        let entity_dofs = model
            .elements()
            .par_iter()
            .chain(model.conditions().par_iter())
            .try_fold(FxHashSet::<DofKey>::default, |mut set, entity| -> Result<_> {
                set.extend(scheme.dof_list(entity.as_ref(), model)?);
                Ok(set)
            })
            .try_reduce(FxHashSet::default, |a, b| Ok(merge(a, b)))?;

        let constraint_dofs = model
            .constraints()
            .par_iter()
            .fold(FxHashSet::<DofKey>::default, |mut set, constraint| {
                set.extend(constraint.dof_list());
                set
            })
            .reduce(FxHashSet::default, merge);

        let merged = merge(entity_dofs, constraint_dofs);
        for key in &merged {
            model.dof(*key)?;
        }

        let set = Self::from_keys(merged)?;
        debug!(
            "Dof set collected: {} dofs from {} elements, {} conditions, {} constraints",
            set.len(),
            model.elements().len(),
            model.conditions().len(),
            model.constraints().len()
        );
        Ok(set)
    }

    /// Build a dof set from arbitrary keys (duplicates are removed).
    pub fn from_keys<I: IntoIterator<Item = DofKey>>(keys: I) -> Result<Self> {
        let mut keys: Vec<DofKey> = keys.into_iter().collect();
        keys.par_sort_unstable();
        keys.dedup();

        if keys.is_empty() {
            return Err(SolverError::EmptyDofSet);
        }

        let position = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let mut set = Self {
            equation_ids: vec![0; keys.len()],
            equation_system_size: keys.len(),
            keys,
            position,
        };
        set.number_block();
        Ok(set)
    }

    /// Equation id = position in the sorted order. All dofs, fixed or not,
    /// are part of the equation system.
    pub fn number_block(&mut self) {
        self.equation_ids
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, eq)| *eq = i);
        self.equation_system_size = self.keys.len();
    }

    /// Free dofs get `0..n_free` in sorted order, fixed dofs `n_free..n`.
    /// The equation system only covers the free dofs.
    pub fn number_free_first(&mut self, model: &ModelPart) -> Result<()> {
        let fixed = self
            .keys
            .iter()
            .map(|k| model.is_fixed(*k))
            .collect::<Result<Vec<bool>>>()?;

        let num_free = fixed.iter().filter(|f| !**f).count();
        let mut next_free = 0;
        let mut next_fixed = num_free;
        for (eq, is_fixed) in self.equation_ids.iter_mut().zip(fixed) {
            if is_fixed {
                *eq = next_fixed;
                next_fixed += 1;
            } else {
                *eq = next_free;
                next_free += 1;
            }
        }
        self.equation_system_size = num_free;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of rows of the global system
    pub fn equation_system_size(&self) -> usize {
        self.equation_system_size
    }

    pub fn keys(&self) -> &[DofKey] {
        &self.keys
    }

    pub fn contains(&self, key: DofKey) -> bool {
        self.position.contains_key(&key)
    }

    /// Dofs in sorted order with their equation ids
    pub fn iter(&self) -> impl Iterator<Item = (&DofKey, usize)> {
        self.keys.iter().zip(self.equation_ids.iter().copied())
    }

    pub fn equation_id(&self, key: DofKey) -> Result<usize> {
        self.position
            .get(&key)
            .map(|&p| self.equation_ids[p])
            .ok_or(SolverError::UnregisteredDof(key))
    }

    /// Map a local dof list to equation ids, reusing `out`.
    pub fn equation_ids_into(&self, dofs: &[DofKey], out: &mut Vec<usize>) -> Result<()> {
        out.clear();
        for key in dofs {
            out.push(self.equation_id(*key)?);
        }
        Ok(())
    }

    /// Fixed flag per equation id (length = number of dofs)
    pub fn fixed_by_equation(&self, model: &ModelPart) -> Result<Vec<bool>> {
        let mut fixed = vec![false; self.len()];
        for (key, eq) in self.iter() {
            fixed[eq] = model.is_fixed(*key)?;
        }
        Ok(fixed)
    }

    /// Current dof values ordered by equation id
    pub fn values_by_equation(&self, model: &ModelPart) -> Result<Vec<f64>> {
        let mut values = vec![0.0; self.len()];
        for (key, eq) in self.iter() {
            values[eq] = model.dof_value(*key)?;
        }
        Ok(values)
    }

    /// Every dof must have a reaction variable when reactions are requested.
    pub fn check_reactions(&self, model: &ModelPart) -> Result<()> {
        for key in &self.keys {
            if !model.dof(*key)?.has_reaction() {
                return Err(SolverError::MissingReaction(*key));
            }
        }
        Ok(())
    }
}

fn merge(a: FxHashSet<DofKey>, b: FxHashSet<DofKey>) -> FxHashSet<DofKey> {
    let (mut large, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    large.extend(small);
    large
}
