//! In-memory value source.
//!
//! Entities keep insertion order; an entity with no stored value for any
//! variable reports `has_data == false`.

use super::{ColumnDescriptor, SourceError, SourceResult, ValueSource};
use crate::model::entity::Entity;
use crate::model::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MemoryVariable {
    name: String,
    empty_value: Value,
    values: HashMap<Entity, Value>,
}

/// Source backed by plain maps.
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    entities: Vec<Entity>,
    registered: HashSet<Entity>,
    with_data: HashSet<Entity>,
    variable_order: Vec<String>,
    variables: BTreeMap<String, Arc<MemoryVariable>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a variable whose empty sentinel is `Value::Null`.
    pub fn with_variable(self, variable: impl Into<String>) -> Self {
        self.with_variable_empty(variable, Value::Null)
    }

    /// Declares a variable with an explicit empty sentinel.
    pub fn with_variable_empty(mut self, variable: impl Into<String>, empty_value: Value) -> Self {
        let variable = variable.into();
        if !self.variables.contains_key(variable.as_str()) {
            self.variable_order.push(variable.clone());
        }
        self.variables.insert(
            variable.clone(),
            Arc::new(MemoryVariable {
                name: variable,
                empty_value,
                values: HashMap::new(),
            }),
        );
        self
    }

    /// Registers an entity without any values.
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.register(entity);
        self
    }

    /// Stores one value, registering the entity if needed.
    ///
    /// Column descriptors resolved before this call keep their snapshot.
    ///
    /// # Errors
    /// Returns `VariableNotFound` when `variable` was not declared.
    pub fn insert(
        &mut self,
        entity: Entity,
        variable: &str,
        value: impl Into<Value>,
    ) -> SourceResult<()> {
        let slot = self
            .variables
            .get_mut(variable)
            .ok_or_else(|| SourceError::VariableNotFound {
                source: self.name.clone(),
                variable: variable.to_string(),
            })?;
        Arc::make_mut(slot)
            .values
            .insert(entity.clone(), value.into());
        self.with_data.insert(entity.clone());
        self.register(entity);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn register(&mut self, entity: Entity) {
        if self.registered.insert(entity.clone()) {
            self.entities.push(entity);
        }
    }
}

impl ValueSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn variable_names(&self) -> Vec<String> {
        self.variable_order.clone()
    }

    fn list_entities(&self) -> SourceResult<Vec<Entity>> {
        Ok(self.entities.clone())
    }

    fn has_data(&self, entity: &Entity) -> SourceResult<bool> {
        Ok(self.with_data.contains(entity))
    }

    fn resolve_column(&self, variable: &str) -> SourceResult<Arc<dyn ColumnDescriptor>> {
        let column = self
            .variables
            .get(variable)
            .ok_or_else(|| SourceError::VariableNotFound {
                source: self.name.clone(),
                variable: variable.to_string(),
            })?;
        Ok(Arc::new(MemoryColumn(Arc::clone(column))))
    }
}

struct MemoryColumn(Arc<MemoryVariable>);

impl ColumnDescriptor for MemoryColumn {
    fn variable(&self) -> &str {
        &self.0.name
    }

    fn read_value(&self, entity: &Entity) -> SourceResult<Value> {
        Ok(self
            .0
            .values
            .get(entity)
            .cloned()
            .unwrap_or_else(|| self.0.empty_value.clone()))
    }

    fn empty_value(&self) -> Value {
        self.0.empty_value.clone()
    }
}
