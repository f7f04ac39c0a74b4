//! Normalizes a result tree into a flat store.
//!
//! The writer co-walks the selections of a document and the result they produced. Everything
//! it writes goes to a fresh delta store, which the caller merges into the real one once the
//! whole result was processed. A write that fails half way through leaves nothing behind.

use cynic_parser::executable::{FieldSelection, Iter, Selection};
use serde_json::{Map, Value};

use crate::{
    document::{should_include, FieldExt, SelectionRoot},
    fragment_matcher::{FragmentMatcher, MatchContext},
    keys::{self, IdentifyFn},
    store::{NodeId, Reference, Store, StoreObject, StoreValue, TYPENAME},
    CacheError,
};

pub(crate) struct WriteOptions<'a> {
    pub identify: Option<&'a IdentifyFn>,
    pub matcher: &'a dyn FragmentMatcher,
    pub add_typename: bool,
}

/// Normalizes `data` into a delta store, starting at the node of `root`.
///
/// `base` is the store the delta will be merged into. It is only consulted, to type objects
/// whose result lacks a `__typename` and to notice references switching between generated
/// and derived ids.
pub(crate) fn normalize(
    root: &SelectionRoot<'_>,
    data: &Value,
    options: &WriteOptions<'_>,
    base: &Store,
) -> Result<Store, CacheError> {
    let Value::Object(object) = data else {
        return Err(CacheError::NonObjectRoot(root.node_id.clone()));
    };

    let _span = tracing::info_span!("normalize", node_id = %root.node_id).entered();

    let mut writer = Writer {
        root,
        options,
        base,
        delta: Store::new(),
    };

    writer.write_object(&root.node_id, object, root.selection_set())?;

    tracing::debug!(objects = writer.delta.len(), "normalized result");

    Ok(writer.delta)
}

struct Writer<'a, 'doc> {
    root: &'a SelectionRoot<'doc>,
    options: &'a WriteOptions<'a>,
    base: &'a Store,
    delta: Store,
}

impl<'a, 'doc> Writer<'a, 'doc> {
    fn write_object(
        &mut self,
        node_id: &NodeId,
        object: &Map<String, Value>,
        selections: Iter<'doc, Selection<'doc>>,
    ) -> Result<(), CacheError> {
        self.delta.touch(node_id);

        if self.options.add_typename {
            if let Some(Value::String(typename)) = object.get(TYPENAME) {
                self.delta
                    .set_field(node_id, TYPENAME, StoreValue::String(typename.clone()));
            }
        }

        self.write_selection_set(node_id, object, selections)
    }

    fn write_selection_set(
        &mut self,
        node_id: &NodeId,
        object: &Map<String, Value>,
        selections: Iter<'doc, Selection<'doc>>,
    ) -> Result<(), CacheError> {
        let root = self.root;

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !should_include(field.directives(), &root.variables)? {
                        continue;
                    }

                    // Absent is not null: the field keeps whatever the store had.
                    let Some(value) = object.get(field.response_key()) else {
                        tracing::debug!(%node_id, field = field.response_key(), "field missing from the result");
                        continue;
                    };

                    let key = keys::storage_key(field, &root.variables)?;
                    let value = self.write_field_value(node_id, &key, field, value)?;

                    self.log_repointing(node_id, &key, &value);
                    self.delta.set_field(node_id, key, value);
                }
                Selection::InlineFragment(fragment) => {
                    if !should_include(fragment.directives(), &root.variables)? {
                        continue;
                    }

                    if let Some(type_condition) = fragment.type_condition() {
                        if !self.matches(node_id, object, type_condition)? {
                            continue;
                        }
                    }

                    self.write_selection_set(node_id, object, fragment.selection_set())?;
                }
                Selection::FragmentSpread(spread) => {
                    if !should_include(spread.directives(), &root.variables)? {
                        continue;
                    }

                    let fragment = root.fragments.get(spread.fragment_name())?;

                    if self.matches(node_id, object, fragment.type_condition())? {
                        self.write_selection_set(node_id, object, fragment.selection_set())?;
                    }
                }
            }
        }

        Ok(())
    }

    fn write_field_value(
        &mut self,
        parent: &NodeId,
        key: &str,
        field: FieldSelection<'doc>,
        value: &Value,
    ) -> Result<StoreValue, CacheError> {
        if field.is_leaf() {
            return Ok(StoreValue::from_leaf(value));
        }

        match value {
            Value::Array(items) => self.write_list(&parent.generated_child(key), items, field),
            Value::Object(object) => self.write_child(parent.generated_child(key), object, field),
            other => Ok(StoreValue::from_leaf(other)),
        }
    }

    fn write_list(
        &mut self,
        list_id: &NodeId,
        items: &[Value],
        field: FieldSelection<'doc>,
    ) -> Result<StoreValue, CacheError> {
        let mut values = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let value = match item {
                Value::Array(nested) => self.write_list(&list_id.generated_child(index), nested, field)?,
                Value::Object(object) => self.write_child(list_id.generated_child(index), object, field)?,
                other => StoreValue::from_leaf(other),
            };

            values.push(value);
        }

        Ok(StoreValue::List(values))
    }

    fn write_child(
        &mut self,
        generated_id: NodeId,
        object: &Map<String, Value>,
        field: FieldSelection<'doc>,
    ) -> Result<StoreValue, CacheError> {
        let (id, generated) = match keys::identify(object, self.options.identify) {
            Some(id) => (id, false),
            None => (generated_id, true),
        };

        self.write_object(&id, object, field.selection_set())?;

        Ok(StoreValue::Reference(Reference { id, generated }))
    }

    /// Matches a fragment against the object being written. The store doesn't know about the
    /// object yet, so the matcher sees a scratch store holding only its `__typename`.
    fn matches(&self, node_id: &NodeId, object: &Map<String, Value>, type_condition: &str) -> Result<bool, CacheError> {
        let typename = object
            .get(TYPENAME)
            .and_then(Value::as_str)
            .or_else(|| self.base.get(node_id)?.typename());

        let mut scratch = StoreObject::default();
        if let Some(typename) = typename {
            scratch.insert(TYPENAME, StoreValue::from(typename));
        }

        let store = Store::from_iter([(node_id.clone(), scratch)]);

        self.options
            .matcher
            .match_fragment(node_id, type_condition, &MatchContext::new(&store))
    }

    fn log_repointing(&self, node_id: &NodeId, key: &str, value: &StoreValue) {
        let Some(next) = value.as_reference() else {
            return;
        };

        let previous = self
            .delta
            .get(node_id)
            .and_then(|object| object.get(key))
            .or_else(|| self.base.get(node_id)?.get(key))
            .and_then(StoreValue::as_reference);

        if let Some(previous) = previous {
            if previous.id != next.id && previous.generated != next.generated {
                tracing::debug!(
                    %node_id,
                    key,
                    previous = %previous.id,
                    next = %next.id,
                    "reference moved between a generated and a derived id, the previous object is left in the store"
                );
            }
        }
    }
}
