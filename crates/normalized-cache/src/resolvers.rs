use std::{collections::HashMap, fmt, sync::Arc};

use serde_json::{Map, Value};

use crate::{
    document::Variables,
    store::{NodeId, StoreObject},
    BoxError,
};

/// What a `@client` field resolver is called with.
#[derive(Clone, Copy)]
pub struct ResolverContext<'a> {
    /// The object owning the field, `None` if it isn't in the store.
    pub parent: Option<&'a StoreObject>,
    pub node_id: &'a NodeId,
    pub arguments: &'a Map<String, Value>,
    pub variables: &'a Variables,
}

/// Computes the value of a `@client` field. Objects and lists it returns are read through the
/// field's selections; a `{"type": "id", "id": ...}` value points at an object of the store.
pub type ResolverFn = Arc<dyn Fn(ResolverContext<'_>) -> Result<Value, BoxError> + Send + Sync>;

/// Points a field missing from the store at an object that is already there, given the
/// field's arguments.
pub type CacheRedirectFn = Arc<dyn Fn(&Map<String, Value>) -> Option<NodeId> + Send + Sync>;

/// Field resolvers and cache redirects, by type name and field name.
#[derive(Clone, Default)]
pub struct Resolvers {
    fields: HashMap<String, HashMap<String, ResolverFn>>,
    redirects: HashMap<String, HashMap<String, CacheRedirectFn>>,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field<F>(&mut self, typename: impl Into<String>, field: impl Into<String>, resolver: F)
    where
        F: Fn(ResolverContext<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.fields
            .entry(typename.into())
            .or_default()
            .insert(field.into(), Arc::new(resolver));
    }

    pub fn add_redirect<F>(&mut self, typename: impl Into<String>, field: impl Into<String>, redirect: F)
    where
        F: Fn(&Map<String, Value>) -> Option<NodeId> + Send + Sync + 'static,
    {
        self.redirects
            .entry(typename.into())
            .or_default()
            .insert(field.into(), Arc::new(redirect));
    }

    pub fn field(&self, typename: &str, field: &str) -> Option<&ResolverFn> {
        self.fields.get(typename)?.get(field)
    }

    pub fn redirect(&self, typename: &str, field: &str) -> Option<&CacheRedirectFn> {
        self.redirects.get(typename)?.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.redirects.is_empty()
    }
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T>(map: &HashMap<String, HashMap<String, T>>) -> Vec<String> {
            let mut names = map
                .iter()
                .flat_map(|(typename, fields)| fields.keys().map(move |field| format!("{typename}.{field}")))
                .collect::<Vec<_>>();
            names.sort();
            names
        }

        f.debug_struct("Resolvers")
            .field("fields", &names(&self.fields))
            .field("redirects", &names(&self.redirects))
            .finish()
    }
}
