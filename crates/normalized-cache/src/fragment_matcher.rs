//! Deciding whether a fragment's type condition applies to an object.
//!
//! The cache has no schema, so it can't tell on its own that a `... on Character` fragment
//! applies to a `Droid`. Two strategies are provided: a heuristic that only understands exact
//! type name matches, and one seeded with the possible types of every interface and union.

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    store::{NodeId, Store, StoreObject},
    CacheError,
};

/// Strategy used to match fragments against objects of the store.
pub trait FragmentMatcher: Send + Sync {
    fn match_fragment(&self, node_id: &NodeId, type_condition: &str, context: &MatchContext<'_>)
        -> Result<bool, CacheError>;
}

/// What a [`FragmentMatcher`] gets to look at.
pub struct MatchContext<'a> {
    store: &'a Store,
    uncertain: Cell<bool>,
}

impl<'a> MatchContext<'a> {
    pub fn new(store: &'a Store) -> Self {
        MatchContext {
            store,
            uncertain: Cell::new(false),
        }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    pub fn object(&self, node_id: &NodeId) -> Option<&'a StoreObject> {
        self.store.get(node_id)
    }

    /// The `__typename` of a node. Root nodes are typed after their operation when they
    /// don't carry one.
    pub fn typename(&self, node_id: &NodeId) -> Option<&'a str> {
        self.object(node_id)
            .and_then(StoreObject::typename)
            .or_else(|| node_id.root_typename())
    }

    /// Flags the current match as a guess. Missing data under a guessed fragment is
    /// reported but never fails a read.
    pub fn mark_uncertain(&self) {
        self.uncertain.set(true);
    }

    pub fn is_uncertain(&self) -> bool {
        self.uncertain.get()
    }
}

/// Matches on exact type names, and matches anything when the object has no `__typename`.
///
/// This can't resolve fragments on interfaces or unions: a `... on Character` fragment never
/// matches a `Droid`. Use an [`IntrospectionFragmentMatcher`] for schemas that rely on them.
#[derive(Debug, Default)]
pub struct HeuristicFragmentMatcher {
    warned: AtomicBool,
}

impl HeuristicFragmentMatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FragmentMatcher for HeuristicFragmentMatcher {
    fn match_fragment(
        &self,
        node_id: &NodeId,
        type_condition: &str,
        context: &MatchContext<'_>,
    ) -> Result<bool, CacheError> {
        if let Some(typename) = context.typename(node_id) {
            return Ok(typename == type_condition);
        }

        if context.object(node_id).is_none() {
            return Ok(false);
        }

        if !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                %node_id,
                type_condition,
                "matching a fragment against an object without __typename, assuming it matches. \
                 This is unsound when several fragments apply to different types: request \
                 __typename or configure possible types"
            );
        }

        context.mark_uncertain();
        Ok(true)
    }
}

/// The concrete types of every interface and union of a schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PossibleTypes {
    types: HashMap<String, HashSet<String>>,
}

impl PossibleTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, supertype: impl Into<String>, subtypes: impl IntoIterator<Item = impl Into<String>>) {
        self.types
            .entry(supertype.into())
            .or_default()
            .extend(subtypes.into_iter().map(Into::into));
    }

    pub fn is_subtype(&self, supertype: &str, typename: &str) -> bool {
        self.types
            .get(supertype)
            .is_some_and(|subtypes| subtypes.contains(typename))
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Reads the result of an introspection query selecting
    /// `__schema { types { kind name possibleTypes { name } } }`. The result may be the whole
    /// response or only its `data`.
    pub fn from_introspection(result: &serde_json::Value) -> Result<Self, CacheError> {
        let result = result.get("data").unwrap_or(result);

        let introspection = IntrospectionResult::deserialize(result)
            .map_err(|error| CacheError::InvalidIntrospection(error.to_string()))?;

        let mut possible_types = PossibleTypes::new();

        for ty in introspection.schema.types {
            if !matches!(ty.kind.as_str(), "INTERFACE" | "UNION") {
                continue;
            }

            possible_types.insert(
                ty.name,
                ty.possible_types.into_iter().flatten().map(|subtype| subtype.name),
            );
        }

        Ok(possible_types)
    }
}

impl From<&cynic_introspection::Schema> for PossibleTypes {
    fn from(schema: &cynic_introspection::Schema) -> Self {
        let mut possible_types = PossibleTypes::new();

        for ty in &schema.types {
            match ty {
                cynic_introspection::Type::Interface(interface) => {
                    possible_types.insert(interface.name.clone(), interface.possible_types.iter().cloned());
                }
                cynic_introspection::Type::Union(union) => {
                    possible_types.insert(union.name.clone(), union.possible_types.iter().cloned());
                }
                _ => (),
            }
        }

        possible_types
    }
}

#[derive(Deserialize)]
struct IntrospectionResult {
    #[serde(rename = "__schema")]
    schema: IntrospectionSchema,
}

#[derive(Deserialize)]
struct IntrospectionSchema {
    types: Vec<IntrospectionType>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionType {
    kind: String,
    name: String,
    #[serde(default)]
    possible_types: Option<Vec<NamedType>>,
}

#[derive(Deserialize)]
struct NamedType {
    name: String,
}

/// Matches using the possible types of interfaces and unions.
///
/// Can be created before the schema is known and seeded later, but matching before it was
/// seeded is an error.
#[derive(Debug, Default)]
pub struct IntrospectionFragmentMatcher {
    possible_types: OnceLock<PossibleTypes>,
}

impl IntrospectionFragmentMatcher {
    pub fn new(possible_types: PossibleTypes) -> Self {
        IntrospectionFragmentMatcher {
            possible_types: OnceLock::from(possible_types),
        }
    }

    pub fn unseeded() -> Self {
        Self::default()
    }

    /// Provides the possible types. Returns false if the matcher was already seeded, in which
    /// case the new types are ignored.
    pub fn seed(&self, possible_types: PossibleTypes) -> bool {
        self.possible_types.set(possible_types).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.possible_types.get().is_some()
    }
}

impl FragmentMatcher for IntrospectionFragmentMatcher {
    fn match_fragment(
        &self,
        node_id: &NodeId,
        type_condition: &str,
        context: &MatchContext<'_>,
    ) -> Result<bool, CacheError> {
        let possible_types = self.possible_types.get().ok_or(CacheError::NotReady)?;

        let Some(typename) = context.typename(node_id) else {
            tracing::debug!(%node_id, type_condition, "cannot match a fragment on an object without __typename");
            return Ok(false);
        };

        Ok(typename == type_condition || possible_types.is_subtype(type_condition, typename))
    }
}
