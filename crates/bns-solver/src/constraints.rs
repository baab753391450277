//! Master-slave constraints.
//!
//! A constraint ties one slave dof to a weighted combination of master dofs:
//!
//! ```text
//! u_slave = Σ w_i · u_master_i + constant
//! ```
//!
//! Masters may themselves be slaves of other constraints. Such chains are
//! flattened so that every slave is expressed through independent dofs only.
//! Cyclic chains are rejected.

use crate::dof_set::DofSet;
use crate::error::{Result, SolverError};
use crate::model::{DofKey, ModelPart};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MasterSlaveConstraint {
    pub id: usize,
    pub slave: DofKey,
    pub masters: Vec<(DofKey, f64)>,
    pub constant: f64,
}

impl MasterSlaveConstraint {
    pub fn new(id: usize, slave: DofKey, masters: Vec<(DofKey, f64)>, constant: f64) -> Self {
        Self {
            id,
            slave,
            masters,
            constant,
        }
    }

    /// Equality constraint `u_slave = u_master`
    pub fn tie(id: usize, slave: DofKey, master: DofKey) -> Self {
        Self::new(id, slave, vec![(master, 1.0)], 0.0)
    }

    /// Slave dof followed by the master dofs
    pub fn dof_list(&self) -> Vec<DofKey> {
        std::iter::once(self.slave)
            .chain(self.masters.iter().map(|(m, _)| *m))
            .collect()
    }
}

/// A slave expressed through independent dofs only.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub constraint: usize,
    pub masters: Vec<(DofKey, f64)>,
    pub constant: f64,
}

impl Relation {
    /// Value the slave must take for the given master values.
    pub fn evaluate(&self, model: &ModelPart) -> Result<f64> {
        let mut value = self.constant;
        for &(master, weight) in &self.masters {
            value += weight * model.dof_value(master)?;
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Flattened set of constraint relations, keyed by slave dof.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConstraints {
    relations: BTreeMap<DofKey, Relation>,
}

impl ResolvedConstraints {
    /// Validate and flatten the constraints of a model.
    pub fn resolve(model: &ModelPart) -> Result<Self> {
        let constraints = model.constraints();

        let mut by_slave: BTreeMap<DofKey, &MasterSlaveConstraint> = BTreeMap::new();
        for constraint in constraints {
            if model.is_fixed(constraint.slave)? {
                return Err(SolverError::FixedSlave(constraint.slave));
            }
            if by_slave.insert(constraint.slave, constraint).is_some() {
                return Err(SolverError::DuplicateSlave(constraint.slave));
            }
            for (master, _) in &constraint.masters {
                model.dof(*master)?;
            }
        }

        let mut state: BTreeMap<DofKey, Visit> = BTreeMap::new();
        let mut relations = BTreeMap::new();
        for &slave in by_slave.keys() {
            Self::flatten(slave, &by_slave, &mut state, &mut relations)?;
        }

        Ok(Self { relations })
    }

    fn flatten(
        slave: DofKey,
        by_slave: &BTreeMap<DofKey, &MasterSlaveConstraint>,
        state: &mut BTreeMap<DofKey, Visit>,
        relations: &mut BTreeMap<DofKey, Relation>,
    ) -> Result<()> {
        let constraint = by_slave[&slave];
        match state.get(&slave) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                return Err(SolverError::CyclicConstraint {
                    constraint: constraint.id,
                    dof: slave,
                });
            }
            None => {}
        }
        state.insert(slave, Visit::InProgress);

        let mut weights: BTreeMap<DofKey, f64> = BTreeMap::new();
        let mut constant = constraint.constant;
        for &(master, weight) in &constraint.masters {
            if by_slave.contains_key(&master) {
                Self::flatten(master, by_slave, state, relations)?;
                let inner = &relations[&master];
                constant += weight * inner.constant;
                for &(m, w) in &inner.masters {
                    *weights.entry(m).or_insert(0.0) += weight * w;
                }
            } else {
                *weights.entry(master).or_insert(0.0) += weight;
            }
        }

        state.insert(slave, Visit::Done);
        relations.insert(
            slave,
            Relation {
                constraint: constraint.id,
                masters: weights.into_iter().collect(),
                constant,
            },
        );
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn relation(&self, slave: DofKey) -> Option<&Relation> {
        self.relations.get(&slave)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DofKey, &Relation)> {
        self.relations.iter()
    }

    /// Relation matrix `T` (n x n, n = equation system size).
    ///
    /// Rows of independent dofs are identity rows; the row of a slave holds
    /// the master weights and has no diagonal.
    pub fn relation_matrix(&self, dof_set: &DofSet) -> Result<CsrMatrix<f64>> {
        let n = dof_set.equation_system_size();
        let mut rows = Vec::with_capacity(n);
        let mut cols = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);

        for (key, eq) in dof_set.iter() {
            if eq >= n {
                continue;
            }
            match self.relations.get(key) {
                Some(relation) => {
                    for &(master, weight) in &relation.masters {
                        let m = dof_set.equation_id(master)?;
                        rows.push(eq);
                        cols.push(m);
                        values.push(weight);
                    }
                }
                None => {
                    rows.push(eq);
                    cols.push(eq);
                    values.push(1.0);
                }
            }
        }

        let coo = CooMatrix::try_from_triplets(n, n, rows, cols, values)
            .map_err(|e| SolverError::SparseFormat(format!("{e:?}")))?;
        Ok(CsrMatrix::from(&coo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableRegistry;
    use std::sync::Arc;

    fn chain_model(n: usize) -> (ModelPart, Vec<DofKey>) {
        let mut model = ModelPart::new(Arc::new(VariableRegistry::structural()));
        let mut keys = Vec::new();
        for id in 1..=n {
            model.add_node(id, [id as f64, 0.0, 0.0]).unwrap();
            keys.push(model.add_dof_by_name(id, "DISPLACEMENT_X").unwrap());
        }
        (model, keys)
    }

    #[test]
    fn chains_are_flattened() {
        let (mut model, k) = chain_model(3);
        // u3 = 2 u2 + 1, u2 = 0.5 u1 + 3  =>  u3 = u1 + 7
        model.add_constraint(MasterSlaveConstraint::new(1, k[2], vec![(k[1], 2.0)], 1.0));
        model.add_constraint(MasterSlaveConstraint::new(2, k[1], vec![(k[0], 0.5)], 3.0));

        let resolved = ResolvedConstraints::resolve(&model).unwrap();
        let relation = resolved.relation(k[2]).unwrap();
        assert_eq!(relation.masters, vec![(k[0], 1.0)]);
        assert!((relation.constant - 7.0).abs() < 1e-14);
    }

    #[test]
    fn cycles_are_rejected() {
        let (mut model, k) = chain_model(2);
        model.add_constraint(MasterSlaveConstraint::tie(1, k[0], k[1]));
        model.add_constraint(MasterSlaveConstraint::tie(2, k[1], k[0]));

        assert!(matches!(
            ResolvedConstraints::resolve(&model),
            Err(SolverError::CyclicConstraint { .. })
        ));
    }

    #[test]
    fn duplicate_and_fixed_slaves_are_rejected() {
        let (mut model, k) = chain_model(3);
        model.add_constraint(MasterSlaveConstraint::tie(1, k[2], k[0]));
        model.add_constraint(MasterSlaveConstraint::tie(2, k[2], k[1]));
        assert!(matches!(
            ResolvedConstraints::resolve(&model),
            Err(SolverError::DuplicateSlave(_))
        ));

        let (mut model, k) = chain_model(2);
        model.fix_dof(k[1]).unwrap();
        model.add_constraint(MasterSlaveConstraint::tie(1, k[1], k[0]));
        assert!(matches!(
            ResolvedConstraints::resolve(&model),
            Err(SolverError::FixedSlave(_))
        ));
    }
}
