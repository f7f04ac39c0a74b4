use std::{
    borrow::Cow,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use cynic_parser::ExecutableDocument;
use serde_json::{Map, Value};

use crate::{
    config::CacheConfig,
    data::Data,
    document::{SelectionRoot, Variables},
    fragment_matcher::{FragmentMatcher, HeuristicFragmentMatcher, IntrospectionFragmentMatcher},
    keys::IdentifyFn,
    optimistic::{OptimisticLayer, OptimisticLayers},
    reader::{self, Diff, ReadOptions},
    resolvers::{ResolverContext, Resolvers},
    response::GraphqlResponse,
    store::{NodeId, Store},
    writer::{self, WriteOptions},
    BoxError, CacheError,
};

/// An operation to read from or write to the cache.
#[derive(Clone)]
pub struct Query<'a> {
    document: &'a ExecutableDocument,
    operation_name: Option<&'a str>,
    variables: Variables,
    root_id: Option<NodeId>,
}

impl<'a> Query<'a> {
    /// The first operation of `document`, without variables.
    pub fn new(document: &'a ExecutableDocument) -> Self {
        Query {
            document,
            operation_name: None,
            variables: Variables::new(),
            root_id: None,
        }
    }

    pub fn operation_name(mut self, operation_name: &'a str) -> Self {
        self.operation_name = Some(operation_name);
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Reads or writes the operation's selections at another node than its root.
    pub fn root_id(mut self, root_id: impl Into<NodeId>) -> Self {
        self.root_id = Some(root_id.into());
        self
    }

    fn selection_root(&self) -> Result<SelectionRoot<'a>, CacheError> {
        let root = SelectionRoot::operation(self.document, self.operation_name, &self.variables)?;
        Ok(root.with_node_id(self.root_id.clone()))
    }
}

/// A fragment applied to one object of the cache.
#[derive(Clone)]
pub struct Fragment<'a> {
    id: NodeId,
    document: &'a ExecutableDocument,
    fragment_name: Option<&'a str>,
    variables: Variables,
}

impl<'a> Fragment<'a> {
    /// The only fragment of `document`, applied to the object `id`.
    pub fn new(id: impl Into<NodeId>, document: &'a ExecutableDocument) -> Self {
        Fragment {
            id: id.into(),
            document,
            fragment_name: None,
            variables: Variables::new(),
        }
    }

    /// Picks a fragment, required when the document has several.
    pub fn fragment_name(mut self, fragment_name: &'a str) -> Self {
        self.fragment_name = Some(fragment_name);
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    fn selection_root(&self) -> Result<SelectionRoot<'a>, CacheError> {
        SelectionRoot::fragment(self.document, self.fragment_name, &self.variables, self.id.clone())
    }
}

#[derive(Default)]
struct CacheState {
    store: Arc<Store>,
    optimistic: OptimisticLayers,
}

/// A normalized GraphQL cache.
///
/// Writes normalize and merge under a single write lock, one at a time. Reads only hold the
/// lock long enough to grab a snapshot, so resolvers may call back into the cache.
pub struct Cache {
    state: RwLock<CacheState>,
    config: CacheConfig,
    identify: Option<IdentifyFn>,
    matcher: Arc<dyn FragmentMatcher>,
    resolvers: Resolvers,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new(CacheConfig::default())
    }
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        CacheBuilder::new().config(config).build()
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Normalizes the result of an operation into the store.
    pub fn write(&self, query: &Query<'_>, data: &Value) -> Result<(), CacheError> {
        let root = query.selection_root()?;

        let mut state = self.write_state();
        let delta = self.normalize(&root, data, &state.store)?;
        let changed = Arc::make_mut(&mut state.store).merge(&delta);
        tracing::debug!(node_id = %root.node_id, changed, "wrote result to the cache");

        Ok(())
    }

    /// Writes the data of a response. Its errors are not cached.
    pub fn write_response(&self, query: &Query<'_>, response: &GraphqlResponse) -> Result<(), CacheError> {
        if !response.errors.is_empty() {
            tracing::debug!(errors = response.errors.len(), "ignoring response errors");
        }

        match &response.data {
            Some(data) if !data.is_null() => self.write(query, data),
            _ => Ok(()),
        }
    }

    /// Reads an operation, failing on missing fields if the cache is strict.
    pub fn read(&self, query: &Query<'_>, previous: Option<&Data>) -> Result<Diff, CacheError> {
        self.read_with(query, previous, self.config.strict)
    }

    /// Reads an operation, reporting missing fields instead of failing.
    pub fn diff(&self, query: &Query<'_>, previous: Option<&Data>) -> Result<Diff, CacheError> {
        self.read_with(query, previous, false)
    }

    /// Reads a fragment on one object. `None` when the cache knows nothing about the object.
    pub fn read_fragment(&self, fragment: &Fragment<'_>) -> Result<Option<Data>, CacheError> {
        let root = fragment.selection_root()?;
        let store = self.snapshot();

        if !store.contains(&root.node_id) {
            return Ok(None);
        }

        let diff = reader::diff(&root, &store, None, &self.read_options(self.config.strict))?;

        Ok(Some(diff.result))
    }

    pub fn write_fragment(&self, fragment: &Fragment<'_>, data: &Value) -> Result<(), CacheError> {
        let root = fragment.selection_root()?;

        let mut state = self.write_state();
        let delta = self.normalize(&root, data, &state.store)?;
        let changed = Arc::make_mut(&mut state.store).merge(&delta);
        tracing::debug!(node_id = %root.node_id, changed, "wrote fragment to the cache");

        Ok(())
    }

    /// Normalizes the optimistic response of a mutation into a layer over the store.
    pub fn write_optimistic(
        &self,
        mutation_id: impl Into<String>,
        query: &Query<'_>,
        data: &Value,
    ) -> Result<(), CacheError> {
        let root = query.selection_root()?;

        let mut state = self.write_state();
        let delta = self.normalize(&root, data, &state.store)?;
        state.optimistic.push(OptimisticLayer {
            mutation_id: mutation_id.into(),
            delta,
            variables: query.variables.clone(),
        });

        Ok(())
    }

    pub fn apply_optimistic(&self, layer: OptimisticLayer) {
        self.write_state().optimistic.push(layer);
    }

    /// Writes the real result of a mutation and drops its optimistic layer, in one step.
    pub fn commit_mutation(&self, mutation_id: &str, query: &Query<'_>, data: &Value) -> Result<(), CacheError> {
        let root = query.selection_root()?;

        let mut state = self.write_state();
        let delta = self.normalize(&root, data, &state.store)?;
        Arc::make_mut(&mut state.store).merge(&delta);
        state.optimistic.commit(mutation_id);

        Ok(())
    }

    /// Drops the layer of a mutation whose real result was already written.
    pub fn commit(&self, mutation_id: &str) -> bool {
        self.write_state().optimistic.commit(mutation_id)
    }

    pub fn rollback(&self, mutation_id: &str) -> bool {
        self.write_state().optimistic.rollback(mutation_id)
    }

    /// The committed store with every optimistic layer merged over it.
    pub fn merged_view(&self) -> Arc<Store> {
        self.snapshot()
    }

    /// Copies the store out, with or without the optimistic layers.
    pub fn extract(&self, optimistic: bool) -> Store {
        let store = if optimistic {
            self.snapshot()
        } else {
            Arc::clone(&self.read_state().store)
        };

        Arc::unwrap_or_clone(store)
    }

    /// Replaces the committed store. Optimistic layers are kept.
    pub fn restore(&self, store: Store) {
        tracing::debug!(objects = store.len(), "restoring the cache");
        self.write_state().store = Arc::new(store);
    }

    pub fn reset(&self) {
        *self.write_state() = CacheState::default();
    }

    /// Runs under the write lock, so that fragments are matched against the store the delta is
    /// merged into.
    fn normalize(&self, root: &SelectionRoot<'_>, data: &Value, base: &Store) -> Result<Store, CacheError> {
        let options = WriteOptions {
            identify: self.identify.as_ref(),
            matcher: self.matcher.as_ref(),
            add_typename: self.config.add_typename,
        };

        writer::normalize(root, data, &options, base)
    }

    fn read_with(&self, query: &Query<'_>, previous: Option<&Data>, strict: bool) -> Result<Diff, CacheError> {
        let root = query.selection_root()?;
        let store = self.snapshot();

        reader::diff(&root, &store, previous, &self.read_options(strict))
    }

    fn read_options(&self, strict: bool) -> ReadOptions<'_> {
        ReadOptions {
            matcher: self.matcher.as_ref(),
            resolvers: &self.resolvers,
            strict,
        }
    }

    fn snapshot(&self) -> Arc<Store> {
        let state = self.read_state();

        match state.optimistic.merged_view(&state.store) {
            Cow::Borrowed(_) => Arc::clone(&state.store),
            Cow::Owned(view) => Arc::new(view),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds a [`Cache`] with the parts that can't come from configuration.
#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
    identify: Option<IdentifyFn>,
    matcher: Option<Arc<dyn FragmentMatcher>>,
    resolvers: Resolvers,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default `<__typename>:<id>` identity of objects.
    pub fn identify<F>(mut self, identify: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Option<String> + Send + Sync + 'static,
    {
        self.identify = Some(Arc::new(identify));
        self
    }

    /// Takes precedence over the possible types of the configuration.
    pub fn fragment_matcher(mut self, matcher: Arc<dyn FragmentMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Registers the resolver of a `@client` field.
    pub fn resolver<F>(mut self, typename: impl Into<String>, field: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(ResolverContext<'_>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.resolvers.add_field(typename, field, resolver);
        self
    }

    pub fn cache_redirect<F>(mut self, typename: impl Into<String>, field: impl Into<String>, redirect: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Option<NodeId> + Send + Sync + 'static,
    {
        self.resolvers.add_redirect(typename, field, redirect);
        self
    }

    pub fn build(self) -> Cache {
        let matcher: Arc<dyn FragmentMatcher> = match (self.matcher, &self.config.possible_types) {
            (Some(matcher), _) => matcher,
            (None, Some(possible_types)) => Arc::new(IntrospectionFragmentMatcher::new(possible_types.clone())),
            (None, None) => Arc::new(HeuristicFragmentMatcher::new()),
        };

        Cache {
            state: RwLock::default(),
            config: self.config,
            identify: self.identify,
            matcher,
            resolvers: self.resolvers,
        }
    }
}
