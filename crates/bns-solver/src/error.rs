//! Error types for bns-solver

use crate::backend::BackendError;
use crate::model::{DofKey, NodeId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("No degrees of freedom found in the model")]
    EmptyDofSet,

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Variable registered twice: {0}")]
    DuplicateVariable(String),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Node {0} registered twice")]
    DuplicateNode(NodeId),

    #[error("No dof {0} declared on its node")]
    DofNotFound(DofKey),

    #[error("Dof {0} is not part of the dof set (was the dof set set up after the model changed?)")]
    UnregisteredDof(DofKey),

    #[error("Reaction variable not set for dof {0}, not possible to calculate reactions")]
    MissingReaction(DofKey),

    #[error("Node {0} has no reduced basis assigned")]
    MissingReducedBasis(NodeId),

    #[error(
        "Reduced basis of node {node} is {rows}x{cols} but {expected_rows}x{expected_cols} was expected"
    )]
    ReducedBasisShape {
        node: NodeId,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error(
        "Entity {entity}: local system is {lhs_rows}x{lhs_cols} with rhs of size {rhs_len}, but it has {num_equations} equation ids"
    )]
    LocalSizeMismatch {
        entity: usize,
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_len: usize,
        num_equations: usize,
    },

    #[error("Constraint {constraint}: slave dof {dof} is part of a cyclic constraint chain")]
    CyclicConstraint { constraint: usize, dof: DofKey },

    #[error("Dof {0} is the slave of more than one constraint")]
    DuplicateSlave(DofKey),

    #[error("Dof {0} is fixed and cannot be the slave of a constraint")]
    FixedSlave(DofKey),

    #[error("Master-slave constraints are not supported by the {0} builder")]
    UnsupportedConstraints(&'static str),

    #[error("Dof set has not been set up")]
    DofSetNotInitialized,

    #[error("Equation system has not been set up")]
    SystemNotInitialized,

    #[error("Solution step has not been initialized for the {0} scheme")]
    StepNotInitialized(&'static str),

    #[error(
        "Backwards in time solution is not decreasing time from last step (time step = {0})"
    )]
    InvalidTimeStep(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Sparse format error: {0}")]
    SparseFormat(String),

    #[error("Linear solver failed: {0}")]
    LinearSolver(#[from] BackendError),

    #[error(
        "Newton-Raphson failed to converge in {iterations} iterations (final increment norm = {increment_norm:.3e})"
    )]
    NotConverged {
        iterations: usize,
        increment_norm: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
