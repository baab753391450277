//! Builder, linear solver and Newton strategy settings.
//!
//! Settings are plain serde structs. Missing keys take their defaults;
//! unknown keys are rejected.

use crate::error::{Result, SolverError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Builder-and-solver variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    /// All dofs in the system, Dirichlet rows/columns treated after assembly
    #[default]
    Block,
    /// Only free dofs in the system
    Elimination,
    /// Galerkin projection onto a per-node reduced basis
    Rom,
}

impl BuilderKind {
    pub fn name(&self) -> &'static str {
        match self {
            BuilderKind::Block => "block",
            BuilderKind::Elimination => "elimination",
            BuilderKind::Rom => "rom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverType {
    /// Dense LU (nalgebra)
    #[default]
    Lu,
    /// Jacobi-preconditioned conjugate gradient
    Cg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearSolverSettings {
    pub solver_type: SolverType,
    /// Relative residual tolerance (iterative solvers only)
    pub tolerance: f64,
    /// Iteration cap (iterative solvers only)
    pub max_iterations: usize,
}

impl Default for LinearSolverSettings {
    fn default() -> Self {
        Self {
            solver_type: SolverType::Lu,
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

/// Newton-Raphson settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategySettings {
    pub max_iterations: usize,
    /// Converged when ||dx|| <= absolute_tolerance + relative_tolerance * ||x||
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// Converged when the norm of the (Dirichlet-reduced) residual is below this
    pub residual_tolerance: f64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            relative_tolerance: 1e-9,
            absolute_tolerance: 1e-12,
            residual_tolerance: 1e-10,
        }
    }
}

/// Top level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderSettings {
    pub builder: BuilderKind,
    /// Variable names taking part in the reduced projection, in basis row order
    pub nodal_unknowns: Vec<String>,
    pub number_of_rom_dofs: usize,
    pub calculate_reactions: bool,
    pub reform_dof_at_each_iteration: bool,
    pub linear_solver: LinearSolverSettings,
    pub strategy: StrategySettings,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            builder: BuilderKind::Block,
            nodal_unknowns: Vec::new(),
            number_of_rom_dofs: 10,
            calculate_reactions: false,
            reform_dof_at_each_iteration: false,
            linear_solver: LinearSolverSettings::default(),
            strategy: StrategySettings::default(),
        }
    }
}

impl BuilderSettings {
    /// ROM settings with the given unknowns and reduced size.
    pub fn rom<S: Into<String>>(nodal_unknowns: impl IntoIterator<Item = S>, rom_dofs: usize) -> Self {
        Self {
            builder: BuilderKind::Rom,
            nodal_unknowns: nodal_unknowns.into_iter().map(Into::into).collect(),
            number_of_rom_dofs: rom_dofs,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.builder == BuilderKind::Rom {
            if self.number_of_rom_dofs == 0 {
                return Err(SolverError::InvalidConfiguration(
                    "number_of_rom_dofs must be positive for the rom builder".into(),
                ));
            }
            if self.nodal_unknowns.is_empty() {
                return Err(SolverError::InvalidConfiguration(
                    "nodal_unknowns must not be empty for the rom builder".into(),
                ));
            }
        }
        if self.linear_solver.solver_type == SolverType::Cg
            && (self.linear_solver.tolerance <= 0.0 || self.linear_solver.max_iterations == 0)
        {
            return Err(SolverError::InvalidConfiguration(
                "cg needs a positive tolerance and max_iterations".into(),
            ));
        }
        if self.strategy.max_iterations == 0 {
            return Err(SolverError::InvalidConfiguration(
                "strategy.max_iterations must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Settings of the adjoint Bossak scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdjointBossakSettings {
    /// Bossak alpha; 0 gives the Newmark average acceleration rule
    pub alpha_bossak: f64,
}

impl Default for AdjointBossakSettings {
    fn default() -> Self {
        Self { alpha_bossak: -0.3 }
    }
}

impl AdjointBossakSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// `beta = (1 - alpha)^2 / 4` must not vanish.
    pub fn validate(&self) -> Result<()> {
        if !self.alpha_bossak.is_finite() || self.alpha_bossak >= 1.0 {
            return Err(SolverError::InvalidConfiguration(format!(
                "alpha_bossak must be finite and below 1, got {}",
                self.alpha_bossak
            )));
        }
        Ok(())
    }
}
