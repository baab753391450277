//! Reference entities.
//!
//! Minimal contribution sources used by the tests and the command line
//! demo. All of them act on a single scalar variable per node and use the
//! residual form: the right hand side is `f_ext - K u` at the current nodal
//! values, so a Newton step on a linear problem converges in one solve.
//! [`LumpedMass`] only has time derivative terms.

pub mod bar;
pub mod mass;
pub mod point_load;
pub mod spring;

pub use bar::LinearBar;
pub use mass::LumpedMass;
pub use point_load::PointLoad;
pub use spring::GroundSpring;
