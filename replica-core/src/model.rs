//! Data-definition model
//!
//! Entities, their elements and relationships, derived views, and the
//! per-entity replication policy read at startup.

use crate::query::Select;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Suffix naming the text variant of an entity.
pub const TEXTS_SUFFIX: &str = ".texts";

/// Name prefix of localized views.
pub const LOCALIZED_PREFIX: &str = "localized.";

/// Relationship multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// Kind of relationship to another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Association,
    Composition,
}

/// A relationship element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target: String,
    /// Equality pairs `(local column, target column)`.
    pub on: Vec<(String, String)>,
    pub cardinality: Cardinality,
}

/// Element of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Column,
    Relation(Relation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
}

impl Element {
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ElementKind::Column,
        }
    }

    pub fn association(
        name: impl Into<String>,
        target: impl Into<String>,
        on: &[(&str, &str)],
        cardinality: Cardinality,
    ) -> Self {
        Self::relation(name, RelationKind::Association, target, on, cardinality)
    }

    pub fn composition(
        name: impl Into<String>,
        target: impl Into<String>,
        on: &[(&str, &str)],
        cardinality: Cardinality,
    ) -> Self {
        Self::relation(name, RelationKind::Composition, target, on, cardinality)
    }

    fn relation(
        name: impl Into<String>,
        kind: RelationKind,
        target: impl Into<String>,
        on: &[(&str, &str)],
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ElementKind::Relation(Relation {
                kind,
                target: target.into(),
                on: on
                    .iter()
                    .map(|(local, remote)| (local.to_string(), remote.to_string()))
                    .collect(),
                cardinality,
            }),
        }
    }

    /// Get the relationship, if this element is one.
    pub fn relation_ref(&self) -> Option<&Relation> {
        match &self.kind {
            ElementKind::Relation(relation) => Some(relation),
            ElementKind::Column => None,
        }
    }
}

/// Per-entity replication policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    pub enabled: bool,
    /// Cache group; `None` means the default group.
    pub group: Option<String>,
    /// Load on first miss instead of requiring an explicit preload.
    pub auto_load: bool,
    /// Overrides the configured TTL.
    pub ttl: Option<Duration>,
    /// Warm eagerly after any triggering read and after TTL expiry.
    pub preload: bool,
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            group: None,
            auto_load: true,
            ttl: None,
            preload: false,
        }
    }
}

impl ReplicationPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }
}

/// An entity or derived view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub elements: Vec<Element>,
    /// Key columns, in order.
    pub keys: Vec<String>,
    /// Defining query for derived views.
    pub query: Option<Select>,
    pub policy: Option<ReplicationPolicy>,
}

impl Definition {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: Vec::new(),
            keys: Vec::new(),
            query: None,
            policy: None,
        }
    }

    /// A derived view defined by `query`.
    pub fn view(name: impl Into<String>, query: Select) -> Self {
        Self {
            query: Some(query),
            ..Self::entity(name)
        }
    }

    /// Add key columns; they are also registered as columns.
    pub fn with_keys(mut self, keys: &[&str]) -> Self {
        for key in keys {
            if self.element(key).is_none() {
                self.elements.push(Element::column(*key));
            }
            self.keys.push(key.to_string());
        }
        self
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.elements
            .extend(columns.iter().map(|column| Element::column(*column)));
        self
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_policy(mut self, policy: ReplicationPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|element| element.name == name)
    }

    pub fn is_view(&self) -> bool {
        self.query.is_some()
    }

    /// Names of the plain columns, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.elements
            .iter()
            .filter(|element| matches!(element.kind, ElementKind::Column))
            .map(|element| element.name.as_str())
    }
}

/// Map a qualified entity name to its replica relation name.
pub fn relation_name(entity: &str) -> String {
    entity.replace('.', "_")
}

/// Name of the text variant of `entity`.
pub fn texts_name(entity: &str) -> String {
    format!("{entity}{TEXTS_SUFFIX}")
}

/// The data-definition model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    definitions: BTreeMap<String, Definition>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, definition: Definition) -> Self {
        self.insert(definition);
        self
    }

    pub fn insert(&mut self, definition: Definition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn is_view(&self, name: &str) -> bool {
        self.get(name).is_some_and(Definition::is_view)
    }

    pub fn is_localized_view(&self, name: &str) -> bool {
        name.starts_with(LOCALIZED_PREFIX)
    }

    /// The text variant of `entity`, if one is defined.
    pub fn text_variant(&self, entity: &str) -> Option<&Definition> {
        self.get(&texts_name(entity))
    }

    /// Find a relationship element on `entity`.
    pub fn relation(&self, entity: &str, element: &str) -> Option<&Relation> {
        self.get(entity)
            .and_then(|definition| definition.element(element))
            .and_then(Element::relation_ref)
    }
}
