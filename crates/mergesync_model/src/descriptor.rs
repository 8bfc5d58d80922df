//! Static registration of syncable entity types.

use crate::error::{ModelError, ModelResult};
use std::collections::{BTreeSet, HashMap};

/// A declared parent → child foreign-key relationship used for cascade deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeRule {
    /// Parent entity type.
    pub parent: String,
    /// Child entity type.
    pub child: String,
    /// Field on the child that holds the parent's local id.
    pub foreign_key: String,
}

/// A field that references another entity across stores and must be
/// translated through the referenced record's `uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceField {
    /// Field on this entity holding the referenced id.
    pub field: String,
    /// Referenced entity type.
    pub target: String,
}

/// Registration of one syncable entity type.
///
/// # Example
///
/// ```
/// use mergesync_model::EntityDescriptor;
///
/// let sessions = EntityDescriptor::new("sessions")
///     .with_remote_collection("customer_sessions")
///     .with_reference("customer_id", "customers");
/// assert_eq!(sessions.local_table, "sessions");
/// assert!(sessions.has_references());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Entity type name, used in logs, results and sync-state keys.
    pub name: String,
    /// Table in the local store.
    pub local_table: String,
    /// Collection in the master store.
    pub remote_collection: String,
    /// Children deleted together with a record of this type.
    pub cascade: Vec<CascadeRule>,
    /// Cross-store reference fields.
    pub references: Vec<ReferenceField>,
}

impl EntityDescriptor {
    /// Creates a descriptor whose local table and remote collection share its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            local_table: name.clone(),
            remote_collection: name.clone(),
            name,
            cascade: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Sets the local table name.
    pub fn with_local_table(mut self, table: impl Into<String>) -> Self {
        self.local_table = table.into();
        self
    }

    /// Sets the remote collection name.
    pub fn with_remote_collection(mut self, collection: impl Into<String>) -> Self {
        self.remote_collection = collection.into();
        self
    }

    /// Declares that `child` rows whose `foreign_key` equals this record's id
    /// are deleted with it.
    pub fn with_cascade(mut self, child: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.cascade.push(CascadeRule {
            parent: self.name.clone(),
            child: child.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    /// Declares a cross-store reference field.
    pub fn with_reference(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.references.push(ReferenceField {
            field: field.into(),
            target: target.into(),
        });
        self
    }

    /// Returns true if any field needs identity resolution.
    pub fn has_references(&self) -> bool {
        !self.references.is_empty()
    }
}

/// The set of registered entity types, in dependency order.
///
/// Parents come before the children that reference them, so a referenced
/// record always exists on the destination side before its dependents are
/// processed. Ties keep registration order.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    ordered: Vec<EntityDescriptor>,
    index: HashMap<String, usize>,
}

impl EntityRegistry {
    /// Validates the descriptors and computes dependency order.
    pub fn new(descriptors: Vec<EntityDescriptor>) -> ModelResult<Self> {
        let mut position = HashMap::new();
        for (i, d) in descriptors.iter().enumerate() {
            for name in [&d.local_table, &d.remote_collection] {
                validate_identifier(name)?;
            }
            if position.insert(d.name.clone(), i).is_some() {
                return Err(ModelError::DuplicateEntity(d.name.clone()));
            }
        }

        // edges[parent] = children that must come after it
        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); descriptors.len()];
        for (i, d) in descriptors.iter().enumerate() {
            for rule in &d.cascade {
                validate_identifier(&rule.foreign_key)?;
                let child = lookup(&position, &d.name, &rule.child)?;
                if child != i {
                    edges[i].insert(child);
                }
            }
            for reference in &d.references {
                validate_identifier(&reference.field)?;
                let target = lookup(&position, &d.name, &reference.target)?;
                if target != i {
                    edges[target].insert(i);
                }
            }
        }

        let mut indegree = vec![0usize; descriptors.len()];
        for children in &edges {
            for &c in children {
                indegree[c] += 1;
            }
        }

        let mut order = Vec::with_capacity(descriptors.len());
        let mut ready: BTreeSet<usize> = (0..descriptors.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &c in &edges[next] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    ready.insert(c);
                }
            }
        }

        if order.len() != descriptors.len() {
            let stuck = (0..descriptors.len())
                .filter(|i| indegree[*i] > 0)
                .map(|i| descriptors[i].name.clone())
                .collect();
            return Err(ModelError::CyclicDependency(stuck));
        }

        let mut slots: Vec<Option<EntityDescriptor>> = descriptors.into_iter().map(Some).collect();
        let ordered: Vec<EntityDescriptor> = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();
        let index = ordered
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        Ok(Self { ordered, index })
    }

    /// Returns the descriptor for an entity type.
    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.index.get(name).map(|&i| &self.ordered[i])
    }

    /// Returns the descriptor for an entity type or an error.
    pub fn require(&self, name: &str) -> ModelResult<&EntityDescriptor> {
        self.get(name).ok_or_else(|| ModelError::UnknownEntity {
            from: "registry".into(),
            to: name.to_string(),
        })
    }

    /// Iterates descriptors in dependency order.
    pub fn ordered(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.ordered.iter()
    }

    /// Returns the cascade rules whose parent is `name`.
    pub fn children_of(&self, name: &str) -> &[CascadeRule] {
        self.get(name).map(|d| d.cascade.as_slice()).unwrap_or(&[])
    }

    /// Number of registered entity types.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

fn lookup(position: &HashMap<String, usize>, from: &str, to: &str) -> ModelResult<usize> {
    position
        .get(to)
        .copied()
        .ok_or_else(|| ModelError::UnknownEntity {
            from: from.to_string(),
            to: to.to_string(),
        })
}

/// Checks that a table, collection or field name is safe to splice into a query.
pub(crate) fn validate_identifier(name: &str) -> ModelResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ModelError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(registry: &EntityRegistry) -> Vec<&str> {
        registry.ordered().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn parents_precede_children() {
        let registry = EntityRegistry::new(vec![
            EntityDescriptor::new("payments").with_reference("session_id", "sessions"),
            EntityDescriptor::new("sessions").with_reference("customer_id", "customers"),
            EntityDescriptor::new("customers").with_cascade("sessions", "customer_id"),
            EntityDescriptor::new("settings"),
        ])
        .unwrap();

        assert_eq!(
            names(&registry),
            vec!["customers", "sessions", "payments", "settings"]
        );
    }

    #[test]
    fn registration_order_breaks_ties() {
        let registry = EntityRegistry::new(vec![
            EntityDescriptor::new("b"),
            EntityDescriptor::new("a"),
        ])
        .unwrap();
        assert_eq!(names(&registry), vec!["b", "a"]);
    }

    #[test]
    fn rejects_cycles() {
        let err = EntityRegistry::new(vec![
            EntityDescriptor::new("a").with_cascade("b", "a_id"),
            EntityDescriptor::new("b").with_cascade("a", "b_id"),
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::CyclicDependency(ref v) if v.len() == 2));
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let registry = EntityRegistry::new(vec![EntityDescriptor::new("folders")
            .with_cascade("folders", "parent_id")
            .with_reference("parent_id", "folders")])
        .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_unknown_and_duplicate_entities() {
        let err = EntityRegistry::new(vec![
            EntityDescriptor::new("sessions").with_reference("customer_id", "customers")
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::UnknownEntity { .. }));

        let err = EntityRegistry::new(vec![
            EntityDescriptor::new("a"),
            EntityDescriptor::new("a"),
        ])
        .unwrap_err();
        assert_eq!(err, ModelError::DuplicateEntity("a".into()));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let err = EntityRegistry::new(vec![
            EntityDescriptor::new("a").with_local_table("a; DROP TABLE b")
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier(_)));
    }

    #[test]
    fn children_of_returns_rules() {
        let registry = EntityRegistry::new(vec![
            EntityDescriptor::new("customers").with_cascade("sessions", "customer_id"),
            EntityDescriptor::new("sessions"),
        ])
        .unwrap();
        let rules = registry.children_of("customers");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].foreign_key, "customer_id");
        assert!(registry.children_of("sessions").is_empty());
        assert!(registry.children_of("missing").is_empty());
    }
}
