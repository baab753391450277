//! Variable registry.
//!
//! Maps variable names (`DISPLACEMENT_X`, `TEMPERATURE`, ...) to compact
//! [`VariableKey`]s. The registry is built once per simulation run and then
//! frozen; builders and models hold it behind an `Arc` and never mutate it.

use crate::error::{Result, SolverError};
use std::collections::HashMap;
use std::fmt;

/// Compact identifier of a registered variable.
///
/// Keys are assigned in registration order, which also defines the order of
/// dofs on the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableKey(pub u32);

impl VariableKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a variable was registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// A standalone scalar (e.g. `TEMPERATURE`)
    Scalar,
    /// Component `index` of the vector variable `parent` (e.g. `DISPLACEMENT_Y`)
    Component { parent: String, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub key: VariableKey,
    pub kind: VariableKind,
    /// Variable receiving the reaction of dofs of this variable
    pub reaction: Option<VariableKey>,
}

/// Immutable name/key lookup table.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<VariableInfo>,
    by_name: HashMap<String, VariableKey>,
}

impl VariableRegistry {
    pub fn builder() -> VariableRegistryBuilder {
        VariableRegistryBuilder::default()
    }

    /// Registry for structural and thermal problems.
    ///
    /// Registers `DISPLACEMENT_{X,Y,Z}` paired with `REACTION_{X,Y,Z}` and
    /// `TEMPERATURE` paired with `REACTION_FLUX`.
    pub fn structural() -> Self {
        let mut registry = Self::default();
        for (index, axis) in ["X", "Y", "Z"].into_iter().enumerate() {
            let component = |parent: &str| VariableKind::Component {
                parent: parent.to_string(),
                index,
            };
            registry.push_pair(
                (format!("DISPLACEMENT_{axis}"), component("DISPLACEMENT")),
                (format!("REACTION_{axis}"), component("REACTION")),
            );
        }
        registry.push_pair(
            ("TEMPERATURE".to_string(), VariableKind::Scalar),
            ("REACTION_FLUX".to_string(), VariableKind::Scalar),
        );
        registry
    }

    /// Register a variable and its reaction; both names must be new.
    fn push_pair(&mut self, variable: (String, VariableKind), reaction: (String, VariableKind)) {
        let key = VariableKey(self.variables.len() as u32);
        let reaction_key = VariableKey(key.0 + 1);
        for ((name, kind), key, paired) in [
            (variable, key, Some(reaction_key)),
            (reaction, reaction_key, None),
        ] {
            self.by_name.insert(name.clone(), key);
            self.variables.push(VariableInfo {
                name,
                key,
                kind,
                reaction: paired,
            });
        }
    }

    /// Look up a variable by name.
    pub fn key(&self, name: &str) -> Result<VariableKey> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SolverError::UnknownVariable(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn info(&self, key: VariableKey) -> Option<&VariableInfo> {
        self.variables.get(key.index())
    }

    /// Name of a variable, or `"<unknown>"` for keys from another registry.
    pub fn name(&self, key: VariableKey) -> &str {
        self.info(key).map(|v| v.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn reaction_of(&self, key: VariableKey) -> Option<VariableKey> {
        self.info(key).and_then(|v| v.reaction)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.iter()
    }
}

/// Mutable stage of a [`VariableRegistry`].
#[derive(Debug, Default)]
pub struct VariableRegistryBuilder {
    registry: VariableRegistry,
}

impl VariableRegistryBuilder {
    pub fn add_scalar(&mut self, name: &str) -> Result<VariableKey> {
        self.insert(name.to_string(), VariableKind::Scalar)
    }

    /// Register one component variable per suffix, named `{name}_{suffix}`.
    pub fn add_vector(&mut self, name: &str, components: &[&str]) -> Result<Vec<VariableKey>> {
        components
            .iter()
            .enumerate()
            .map(|(index, suffix)| {
                self.insert(
                    format!("{name}_{suffix}"),
                    VariableKind::Component {
                        parent: name.to_string(),
                        index,
                    },
                )
            })
            .collect()
    }

    pub fn with_reaction(&mut self, variable: VariableKey, reaction: VariableKey) -> Result<()> {
        if self.registry.info(reaction).is_none() {
            return Err(SolverError::UnknownVariable(reaction.to_string()));
        }
        let info = self
            .registry
            .variables
            .get_mut(variable.index())
            .ok_or_else(|| SolverError::UnknownVariable(variable.to_string()))?;
        info.reaction = Some(reaction);
        Ok(())
    }

    pub fn build(self) -> VariableRegistry {
        self.registry
    }

    fn insert(&mut self, name: String, kind: VariableKind) -> Result<VariableKey> {
        if self.registry.by_name.contains_key(&name) {
            return Err(SolverError::DuplicateVariable(name));
        }
        let key = VariableKey(self.registry.variables.len() as u32);
        self.registry.by_name.insert(name.clone(), key);
        self.registry.variables.push(VariableInfo {
            name,
            key,
            kind,
            reaction: None,
        });
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_registry_pairs_reactions() {
        let registry = VariableRegistry::structural();
        let ux = registry.key("DISPLACEMENT_X").unwrap();
        let rx = registry.key("REACTION_X").unwrap();
        assert_eq!(registry.reaction_of(ux), Some(rx));
        assert_eq!(registry.reaction_of(rx), None);

        let t = registry.key("TEMPERATURE").unwrap();
        assert_eq!(registry.name(registry.reaction_of(t).unwrap()), "REACTION_FLUX");
    }

    #[test]
    fn vector_components_are_ordered() {
        let mut builder = VariableRegistry::builder();
        let keys = builder.add_vector("VELOCITY", &["X", "Y"]).unwrap();
        let registry = builder.build();

        assert!(keys[0] < keys[1]);
        assert_eq!(
            registry.info(keys[1]).unwrap().kind,
            VariableKind::Component {
                parent: "VELOCITY".to_string(),
                index: 1
            }
        );
    }

    #[test]
    fn unknown_and_duplicate_names_are_rejected() {
        let mut builder = VariableRegistry::builder();
        builder.add_scalar("PRESSURE").unwrap();
        assert!(matches!(
            builder.add_scalar("PRESSURE"),
            Err(SolverError::DuplicateVariable(_))
        ));

        let registry = builder.build();
        assert!(matches!(
            registry.key("DENSITY"),
            Err(SolverError::UnknownVariable(name)) if name == "DENSITY"
        ));
    }
}
