//! Model data structures consumed by the builders.
//!
//! A [`ModelPart`] owns a node arena (with the nodal dofs and the optional
//! reduced basis of every node), the elements and conditions that produce
//! local contributions, and the master-slave constraints.
//!
//! During assembly the model is only borrowed immutably; all shared mutable
//! state of an assembly pass lives in the global system being assembled.

use crate::constraints::MasterSlaveConstraint;
use crate::error::{Result, SolverError};
use crate::variables::{VariableKey, VariableRegistry};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type NodeId = usize;

/// Identity of a degree of freedom: the owning node and the variable.
///
/// The derived ordering (node id first, then variable key) is the total
/// order used for equation numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DofKey {
    pub node: NodeId,
    pub variable: VariableKey,
}

impl DofKey {
    pub fn new(node: NodeId, variable: VariableKey) -> Self {
        Self { node, variable }
    }
}

impl fmt::Display for DofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(node {}, variable {})", self.node, self.variable)
    }
}

/// Nodal degree of freedom state.
#[derive(Debug, Clone, PartialEq)]
pub struct Dof {
    pub variable: VariableKey,
    /// Current solution value
    pub value: f64,
    /// Dirichlet flag; fixed values are only changed by boundary condition code
    pub fixed: bool,
    /// Variable receiving the reaction, if any
    pub reaction: Option<VariableKey>,
    /// Last computed reaction
    pub reaction_value: f64,
}

impl Dof {
    pub fn has_reaction(&self) -> bool {
        self.reaction.is_some()
    }
}

/// A node of the model
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub coordinates: [f64; 3],
    /// Dofs declared on this node, sorted by variable key
    pub dofs: Vec<Dof>,
    /// Reduced basis (nodal unknowns x reduced modes), set externally
    pub reduced_basis: Option<DMatrix<f64>>,
}

impl Node {
    pub fn new(id: NodeId, coordinates: [f64; 3]) -> Self {
        Self {
            id,
            coordinates,
            dofs: Vec::new(),
            reduced_basis: None,
        }
    }

    pub fn dof(&self, variable: VariableKey) -> Option<&Dof> {
        self.dofs
            .binary_search_by_key(&variable, |d| d.variable)
            .ok()
            .map(|i| &self.dofs[i])
    }

    pub fn dof_mut(&mut self, variable: VariableKey) -> Option<&mut Dof> {
        self.dofs
            .binary_search_by_key(&variable, |d| d.variable)
            .ok()
            .map(move |i| &mut self.dofs[i])
    }
}

/// Source of local contributions (elements and conditions).
///
/// Implementations must be `Send + Sync`: the builders call them from rayon
/// workers with a shared borrow of the model.
pub trait Entity: Send + Sync {
    fn id(&self) -> usize;

    /// Nodes of the entity geometry, in local order
    fn node_ids(&self) -> &[NodeId];

    /// Ordered list of dofs; defines the local row/column order of the
    /// local system.
    fn dof_list(&self, model: &ModelPart) -> Result<Vec<DofKey>>;

    /// Compute the local left hand side and right hand side.
    ///
    /// `lhs` and `rhs` are scratch buffers from a previous call and may have
    /// any size; implementations resize them.
    fn calculate_local_system(
        &self,
        model: &ModelPart,
        lhs: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> Result<()>;

    /// Compute only the right hand side. The default discards a full local
    /// system.
    fn calculate_right_hand_side(&self, model: &ModelPart, rhs: &mut DVector<f64>) -> Result<()> {
        let mut lhs = DMatrix::zeros(0, 0);
        self.calculate_local_system(model, &mut lhs, rhs)
    }

    /// Derivative of the residual with respect to the first time
    /// derivatives of the dofs (damping). Zero unless overridden.
    fn calculate_first_derivatives_lhs(&self, model: &ModelPart, lhs: &mut DMatrix<f64>) -> Result<()> {
        let n = self.dof_list(model)?.len();
        *lhs = DMatrix::zeros(n, n);
        Ok(())
    }

    /// Derivative of the residual with respect to the second time
    /// derivatives of the dofs (mass). Zero unless overridden.
    fn calculate_second_derivatives_lhs(&self, model: &ModelPart, lhs: &mut DMatrix<f64>) -> Result<()> {
        let n = self.dof_list(model)?.len();
        *lhs = DMatrix::zeros(n, n);
        Ok(())
    }

    /// Entities that are not explicitly flagged inactive are assembled.
    fn is_active(&self) -> bool {
        true
    }
}

/// Container for everything the builders operate on
pub struct ModelPart {
    registry: Arc<VariableRegistry>,
    nodes: Vec<Node>,
    node_index: HashMap<NodeId, usize>,
    elements: Vec<Box<dyn Entity>>,
    conditions: Vec<Box<dyn Entity>>,
    constraints: Vec<MasterSlaveConstraint>,
    time: f64,
    previous_time: f64,
}

impl ModelPart {
    pub fn new(registry: Arc<VariableRegistry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            elements: Vec::new(),
            conditions: Vec::new(),
            constraints: Vec::new(),
            time: 0.0,
            previous_time: 0.0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Time of the step before the current one
    pub fn previous_time(&self) -> f64 {
        self.previous_time
    }

    /// Start a new solution step at `time`.
    pub fn advance_time(&mut self, time: f64) {
        self.previous_time = self.time;
        self.time = time;
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn add_node(&mut self, id: NodeId, coordinates: [f64; 3]) -> Result<()> {
        if self.node_index.contains_key(&id) {
            return Err(SolverError::DuplicateNode(id));
        }
        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(Node::new(id, coordinates));
        Ok(())
    }

    /// Declare a dof on a node. The reaction variable is taken from the
    /// registry. Declaring an existing dof again is a no-op.
    pub fn add_dof(&mut self, node: NodeId, variable: VariableKey) -> Result<DofKey> {
        let info = self
            .registry
            .info(variable)
            .ok_or_else(|| SolverError::UnknownVariable(variable.to_string()))?;
        let reaction = info.reaction;
        let node_ref = self.node_mut(node)?;
        if let Err(pos) = node_ref.dofs.binary_search_by_key(&variable, |d| d.variable) {
            node_ref.dofs.insert(
                pos,
                Dof {
                    variable,
                    value: 0.0,
                    fixed: false,
                    reaction,
                    reaction_value: 0.0,
                },
            );
        }
        Ok(DofKey::new(node, variable))
    }

    /// Declare a dof by variable name.
    pub fn add_dof_by_name(&mut self, node: NodeId, name: &str) -> Result<DofKey> {
        let variable = self.registry.key(name)?;
        self.add_dof(node, variable)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.node_index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or(SolverError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        match self.node_index.get(&id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(SolverError::NodeNotFound(id)),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable nodal state. Node ids must not be changed through this slice.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn dof(&self, key: DofKey) -> Result<&Dof> {
        self.node(key.node)?
            .dof(key.variable)
            .ok_or(SolverError::DofNotFound(key))
    }

    pub fn dof_mut(&mut self, key: DofKey) -> Result<&mut Dof> {
        self.node_mut(key.node)?
            .dof_mut(key.variable)
            .ok_or(SolverError::DofNotFound(key))
    }

    pub fn dof_value(&self, key: DofKey) -> Result<f64> {
        Ok(self.dof(key)?.value)
    }

    pub fn set_dof_value(&mut self, key: DofKey, value: f64) -> Result<()> {
        self.dof_mut(key)?.value = value;
        Ok(())
    }

    pub fn is_fixed(&self, key: DofKey) -> Result<bool> {
        Ok(self.dof(key)?.fixed)
    }

    pub fn fix_dof(&mut self, key: DofKey) -> Result<()> {
        self.dof_mut(key)?.fixed = true;
        Ok(())
    }

    pub fn free_dof(&mut self, key: DofKey) -> Result<()> {
        self.dof_mut(key)?.fixed = false;
        Ok(())
    }

    pub fn set_reduced_basis(&mut self, node: NodeId, basis: DMatrix<f64>) -> Result<()> {
        self.node_mut(node)?.reduced_basis = Some(basis);
        Ok(())
    }

    pub fn add_element(&mut self, element: Box<dyn Entity>) {
        self.elements.push(element);
    }

    pub fn add_condition(&mut self, condition: Box<dyn Entity>) {
        self.conditions.push(condition);
    }

    pub fn add_constraint(&mut self, constraint: MasterSlaveConstraint) {
        self.constraints.push(constraint);
    }

    pub fn elements(&self) -> &[Box<dyn Entity>] {
        &self.elements
    }

    pub fn conditions(&self) -> &[Box<dyn Entity>] {
        &self.conditions
    }

    pub fn constraints(&self) -> &[MasterSlaveConstraint] {
        &self.constraints
    }

    /// Elements followed by conditions
    pub fn entities(&self) -> impl Iterator<Item = &dyn Entity> {
        self.elements
            .iter()
            .chain(self.conditions.iter())
            .map(|e| e.as_ref() as &dyn Entity)
    }

    pub fn num_dofs_declared(&self) -> usize {
        self.nodes.iter().map(|n| n.dofs.len()).sum()
    }
}

impl fmt::Debug for ModelPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPart")
            .field("nodes", &self.nodes.len())
            .field("elements", &self.elements.len())
            .field("conditions", &self.conditions.len())
            .field("constraints", &self.constraints.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelPart {
        ModelPart::new(Arc::new(VariableRegistry::structural()))
    }

    #[test]
    fn dofs_are_kept_sorted_by_variable() {
        let mut model = model();
        model.add_node(1, [0.0; 3]).unwrap();
        model.add_dof_by_name(1, "DISPLACEMENT_Z").unwrap();
        model.add_dof_by_name(1, "DISPLACEMENT_X").unwrap();
        model.add_dof_by_name(1, "DISPLACEMENT_X").unwrap();

        let node = model.node(1).unwrap();
        assert_eq!(node.dofs.len(), 2);
        assert!(node.dofs[0].variable < node.dofs[1].variable);
        assert!(node.dofs.iter().all(|d| d.has_reaction()));
    }

    #[test]
    fn missing_nodes_and_dofs_are_reported() {
        let mut model = model();
        model.add_node(1, [0.0; 3]).unwrap();
        assert!(matches!(
            model.add_node(1, [1.0; 3]),
            Err(SolverError::DuplicateNode(1))
        ));
        assert!(matches!(
            model.add_dof_by_name(7, "DISPLACEMENT_X"),
            Err(SolverError::NodeNotFound(7))
        ));

        let t = model.registry().key("TEMPERATURE").unwrap();
        assert!(matches!(
            model.fix_dof(DofKey::new(1, t)),
            Err(SolverError::DofNotFound(_))
        ));
    }

    #[test]
    fn fixing_and_values() {
        let mut model = model();
        model.add_node(3, [0.0; 3]).unwrap();
        let key = model.add_dof_by_name(3, "TEMPERATURE").unwrap();

        model.set_dof_value(key, 273.15).unwrap();
        model.fix_dof(key).unwrap();
        assert!(model.is_fixed(key).unwrap());
        assert_eq!(model.dof_value(key).unwrap(), 273.15);

        model.free_dof(key).unwrap();
        assert!(!model.is_fixed(key).unwrap());
    }
}
