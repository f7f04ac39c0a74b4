//! The flat store: a table of objects keyed by node id.
//!
//! References between objects are plain node ids, so the store has no ownership cycles
//! even when the data graph does. Objects are kept behind an `Arc`: a write that doesn't
//! change an object leaves the allocation alone, which is what lets readers and optimistic
//! layers detect untouched entries cheaply.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use internment::ArcIntern;
use serde::{Deserialize, Serialize};

mod value;

pub use value::{Reference, StoreValue};

pub const ROOT_QUERY: &str = "ROOT_QUERY";
pub const ROOT_MUTATION: &str = "ROOT_MUTATION";
pub const ROOT_SUBSCRIPTION: &str = "ROOT_SUBSCRIPTION";

pub const TYPENAME: &str = "__typename";

/// Identifies one normalized object in the store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(ArcIntern<String>);

impl NodeId {
    pub fn new(id: &str) -> Self {
        NodeId(ArcIntern::from_ref(id))
    }

    pub fn root_query() -> Self {
        NodeId::new(ROOT_QUERY)
    }

    pub fn root_mutation() -> Self {
        NodeId::new(ROOT_MUTATION)
    }

    pub fn root_subscription() -> Self {
        NodeId::new(ROOT_SUBSCRIPTION)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_root(&self) -> bool {
        self.root_typename().is_some()
    }

    /// The type name root objects are implicitly typed as.
    pub fn root_typename(&self) -> Option<&'static str> {
        match self.as_str() {
            ROOT_QUERY => Some("Query"),
            ROOT_MUTATION => Some("Mutation"),
            ROOT_SUBSCRIPTION => Some("Subscription"),
            _ => None,
        }
    }

    /// Builds the id of an object that has no identity of its own, from its position under
    /// this node: `$<parent>.<segment>`.
    pub(crate) fn generated_child(&self, segment: impl fmt::Display) -> NodeId {
        let parent = self.as_str();
        if parent.starts_with('$') {
            NodeId(ArcIntern::new(format!("{parent}.{segment}")))
        } else {
            NodeId(ArcIntern::new(format!("${parent}.{segment}")))
        }
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        NodeId(ArcIntern::new(value))
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// The fields of one normalized object, keyed by storage key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreObject {
    fields: IndexMap<String, StoreValue>,
}

impl StoreObject {
    pub fn get(&self, key: &str) -> Option<&StoreValue> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: StoreValue) -> Option<StoreValue> {
        self.fields.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &StoreValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `__typename` of this object, if it was ever written.
    pub fn typename(&self) -> Option<&str> {
        match self.fields.get(TYPENAME)? {
            StoreValue::String(typename) => Some(typename),
            _ => None,
        }
    }

    fn is_superset_of(&self, other: &StoreObject) -> bool {
        other
            .fields
            .iter()
            .all(|(key, value)| self.fields.get(key) == Some(value))
    }
}

impl<K: Into<String>> FromIterator<(K, StoreValue)> for StoreObject {
    fn from_iter<T: IntoIterator<Item = (K, StoreValue)>>(iter: T) -> Self {
        StoreObject {
            fields: iter.into_iter().map(|(key, value)| (key.into(), value)).collect(),
        }
    }
}

/// A flat table of every normalized object.
///
/// This is also the serialization format of the cache: a store can be dumped with serde and
/// loaded back as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store {
    objects: IndexMap<NodeId, Arc<StoreObject>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<&StoreObject> {
        self.objects.get(id).map(AsRef::as_ref)
    }

    /// Like `get` but returns the shared allocation, for identity checks.
    pub fn get_shared(&self, id: &NodeId) -> Option<&Arc<StoreObject>> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&NodeId, &StoreObject)> {
        self.objects.iter().map(|(id, object)| (id, object.as_ref()))
    }

    pub fn node_ids(&self) -> impl ExactSizeIterator<Item = &NodeId> {
        self.objects.keys()
    }

    /// Replaces an object wholesale.
    pub fn insert(&mut self, id: NodeId, object: StoreObject) {
        self.objects.insert(id, Arc::new(object));
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<StoreObject> {
        self.objects
            .shift_remove(id)
            .map(|object| Arc::try_unwrap(object).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    /// Shallow-merges `fields` into the object stored at `id`, creating it if needed.
    ///
    /// Returns whether the store changed. An object that already holds all of `fields` keeps
    /// its allocation.
    pub fn merge_object(&mut self, id: &NodeId, fields: &StoreObject) -> bool {
        match self.objects.get_mut(id) {
            Some(existing) if existing.is_superset_of(fields) => false,
            Some(existing) => {
                let existing = Arc::make_mut(existing);
                for (key, value) in &fields.fields {
                    existing.fields.insert(key.clone(), value.clone());
                }
                true
            }
            None => {
                self.objects.insert(id.clone(), Arc::new(fields.clone()));
                true
            }
        }
    }

    /// Merges every object of `delta` into this store, field by field.
    pub fn merge(&mut self, delta: &Store) -> usize {
        delta
            .iter()
            .filter(|(id, fields)| self.merge_object(id, fields))
            .count()
    }

    /// Sets a single field, used while building write deltas.
    pub(crate) fn set_field(&mut self, id: &NodeId, key: impl Into<String>, value: StoreValue) {
        Arc::make_mut(self.objects.entry(id.clone()).or_default()).insert(key, value);
    }

    /// Makes sure an (possibly empty) object exists for `id`.
    pub(crate) fn touch(&mut self, id: &NodeId) {
        self.objects.entry(id.clone()).or_default();
    }
}

impl FromIterator<(NodeId, StoreObject)> for Store {
    fn from_iter<T: IntoIterator<Item = (NodeId, StoreObject)>>(iter: T) -> Self {
        Store {
            objects: iter.into_iter().map(|(id, object)| (id, Arc::new(object))).collect(),
        }
    }
}

impl TryFrom<serde_json::Value> for Store {
    type Error = crate::CacheError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value).map_err(|error| crate::CacheError::InvalidStoreValue(error.to_string()))
    }
}
