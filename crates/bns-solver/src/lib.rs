//! Sparse builder-and-solver layer for finite element systems.
//!
//! Given a model of nodes, elements and conditions, the crate collects and
//! numbers the degrees of freedom, assembles the global sparse system in
//! parallel, applies Dirichlet conditions, master-slave constraints or a
//! reduced-basis projection, solves, and maps the increment back onto the
//! nodal values for the next nonlinear iteration. Besides the static
//! incremental scheme, an adjoint Bossak scheme solves the adjoint problem
//! of dynamic systems backwards in time.

pub mod backend;
pub mod builder;
pub mod config;
pub mod constraints;
pub mod dof_set;
pub mod elements;
pub mod error;
pub mod model;
pub mod response;
pub mod scheme;
pub mod sparse_assembly;
pub mod strategy;
pub mod variables;

pub use backend::{
    ConjugateGradientSolver, DenseLuSolver, LinearSolver, LinearSystemData, SolveInfo,
    SystemMatrix, create_linear_solver,
};
pub use builder::{
    BlockBuilderAndSolver, BuildReport, BuilderAndSolver, EliminationBuilderAndSolver,
    RomBuilderAndSolver, create_builder,
};
pub use config::{
    AdjointBossakSettings, BuilderKind, BuilderSettings, LinearSolverSettings, SolverType,
    StrategySettings,
};
pub use constraints::{MasterSlaveConstraint, ResolvedConstraints};
pub use dof_set::DofSet;
pub use elements::{GroundSpring, LinearBar, LumpedMass, PointLoad};
pub use error::{Result, SolverError};
pub use model::{Dof, DofKey, Entity, ModelPart, Node, NodeId};
pub use response::{AdjointResponse, NodalValueResponse};
pub use scheme::{
    BossakConstants, IncrementalUpdateStaticScheme, LocalSystem, ResidualBasedAdjointBossakScheme,
    Scheme, TimeSchemeAdjoints,
};
pub use sparse_assembly::{AssemblyTarget, SparsityPattern, apply_dirichlet, assemble_rhs, assemble_system};
pub use strategy::{ConvergenceStatus, NewtonRaphsonStrategy, StepResults};
pub use variables::{VariableKey, VariableRegistry, VariableRegistryBuilder};
