//! Rebuilds results from the store.
//!
//! Reads walk the selections of a document against the store, following references. Missing
//! fields either fail the read or are reported on the [`Diff`], depending on strictness.
//!
//! When a read is handed the previous result of the same selections, any part of the new
//! result equal to the previous one is replaced by the previous allocation, bottom-up. An
//! unchanged query result is then the very same `Arc` as before.

use std::{collections::HashMap, sync::Arc};

use cynic_parser::executable::{FieldSelection, Iter, Selection};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{
    data::Data,
    document::{find_directive, should_include, FieldExt, SelectionRoot},
    fragment_matcher::{FragmentMatcher, MatchContext},
    keys,
    resolvers::{ResolverContext, Resolvers},
    store::{NodeId, Reference, Store, StoreObject, StoreValue, TYPENAME},
    CacheError,
};

/// The outcome of a read.
#[derive(Clone, Debug, PartialEq)]
pub struct Diff {
    pub result: Data,
    /// Whether some requested field wasn't in the store.
    pub is_missing: bool,
    /// The name of the first missing field.
    pub missing_field: Option<String>,
}

impl Diff {
    pub fn is_complete(&self) -> bool {
        !self.is_missing
    }
}

pub(crate) struct ReadOptions<'a> {
    pub matcher: &'a dyn FragmentMatcher,
    pub resolvers: &'a Resolvers,
    pub strict: bool,
}

pub(crate) fn diff(
    root: &SelectionRoot<'_>,
    store: &Store,
    previous: Option<&Data>,
    options: &ReadOptions<'_>,
) -> Result<Diff, CacheError> {
    let mut reader = Reader {
        root,
        store,
        options,
        lenient_depth: 0,
        is_missing: false,
        missing_field: None,
    };

    let result = reader.read_object(&root.node_id, root.selection_set(), previous)?;

    if reader.is_missing {
        tracing::debug!(
            node_id = %root.node_id,
            missing_field = reader.missing_field.as_deref(),
            "read returned partial data"
        );
    }

    Ok(Diff {
        result,
        is_missing: reader.is_missing,
        missing_field: reader.missing_field,
    })
}

struct Reader<'a, 'doc> {
    root: &'a SelectionRoot<'doc>,
    store: &'a Store,
    options: &'a ReadOptions<'a>,
    /// Greater than zero while reading inside fragments the matcher only guessed.
    lenient_depth: usize,
    is_missing: bool,
    missing_field: Option<String>,
}

impl<'a, 'doc> Reader<'a, 'doc> {
    fn read_object(
        &mut self,
        node_id: &NodeId,
        selections: Iter<'doc, Selection<'doc>>,
        previous: Option<&Data>,
    ) -> Result<Data, CacheError> {
        let object = self.store.get(node_id);
        if object.is_none() {
            tracing::debug!(%node_id, "reading an object that is not in the store");
        }

        let mut fields = IndexMap::new();
        self.read_selection_set(node_id, object, selections, &mut fields, previous)?;

        Ok(reuse_object(Some(node_id), fields, previous))
    }

    fn read_selection_set(
        &mut self,
        node_id: &NodeId,
        object: Option<&'a StoreObject>,
        selections: Iter<'doc, Selection<'doc>>,
        fields: &mut IndexMap<String, Data>,
        previous: Option<&Data>,
    ) -> Result<(), CacheError> {
        let root = self.root;

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !should_include(field.directives(), &root.variables)? {
                        continue;
                    }

                    let response_key = field.response_key();
                    let previous = previous.and_then(|previous| previous.get(response_key));

                    if let Some(value) = self.read_field(node_id, object, field, previous)? {
                        merge_field(fields, response_key, value, previous);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if !should_include(fragment.directives(), &root.variables)? {
                        continue;
                    }

                    match fragment.type_condition() {
                        Some(type_condition) => self.read_fragment(
                            node_id,
                            object,
                            type_condition,
                            fragment.selection_set(),
                            fields,
                            previous,
                        )?,
                        None => self.read_selection_set(node_id, object, fragment.selection_set(), fields, previous)?,
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !should_include(spread.directives(), &root.variables)? {
                        continue;
                    }

                    let fragment = root.fragments.get(spread.fragment_name())?;

                    self.read_fragment(
                        node_id,
                        object,
                        fragment.type_condition(),
                        fragment.selection_set(),
                        fields,
                        previous,
                    )?;
                }
            }
        }

        Ok(())
    }

    fn read_fragment(
        &mut self,
        node_id: &NodeId,
        object: Option<&'a StoreObject>,
        type_condition: &str,
        selections: Iter<'doc, Selection<'doc>>,
        fields: &mut IndexMap<String, Data>,
        previous: Option<&Data>,
    ) -> Result<(), CacheError> {
        let context = MatchContext::new(self.store);

        if !self.options.matcher.match_fragment(node_id, type_condition, &context)? {
            return Ok(());
        }

        if !context.is_uncertain() {
            return self.read_selection_set(node_id, object, selections, fields, previous);
        }

        self.lenient_depth += 1;
        let result = self.read_selection_set(node_id, object, selections, fields, previous);
        self.lenient_depth -= 1;

        result
    }

    /// Reads one field. `None` stands for a missing field in a non-strict read.
    fn read_field(
        &mut self,
        node_id: &NodeId,
        object: Option<&'a StoreObject>,
        field: FieldSelection<'doc>,
        previous: Option<&Data>,
    ) -> Result<Option<Data>, CacheError> {
        let (root, options) = (self.root, self.options);
        let variables = &root.variables;
        let owning_type = object
            .and_then(StoreObject::typename)
            .or_else(|| node_id.root_typename());

        if find_directive(field.directives(), "client").is_some() {
            let resolver = owning_type.and_then(|typename| options.resolvers.field(typename, field.name()));

            if let Some(resolver) = resolver {
                let arguments = keys::field_arguments(field, variables)?;
                let value = resolver(ResolverContext {
                    parent: object,
                    node_id,
                    arguments: &arguments,
                    variables: variables.values(),
                })
                .map_err(CacheError::Resolver)?;

                return self.read_resolved(node_id, &value, field, previous).map(Some);
            }
        }

        let key = keys::storage_key(field, variables)?;

        if let Some(value) = object.and_then(|object| object.get(&key)) {
            return self.read_value(value, field, previous).map(Some);
        }

        let redirect = owning_type.and_then(|typename| options.resolvers.redirect(typename, field.name()));

        if let Some(redirect) = redirect {
            let arguments = keys::field_arguments(field, variables)?;

            if let Some(id) = redirect(&arguments) {
                tracing::debug!(%node_id, key = %key, redirect = %id, "field redirected to another object");
                let value = StoreValue::Reference(Reference { id, generated: false });
                return self.read_value(&value, field, previous).map(Some);
            }
        }

        tracing::debug!(%node_id, key = %key, "field is not in the store");
        self.missing(node_id, field.name())?;

        Ok(None)
    }

    fn read_value(
        &mut self,
        value: &StoreValue,
        field: FieldSelection<'doc>,
        previous: Option<&Data>,
    ) -> Result<Data, CacheError> {
        match value {
            StoreValue::Reference(reference) => self.read_object(&reference.id, field.selection_set(), previous),
            StoreValue::List(items) => self.read_list(items, field, previous),
            StoreValue::Json(json) => Ok(reuse(Data::from(json), previous)),
            StoreValue::Null => Ok(Data::Null),
            StoreValue::Boolean(value) => Ok(Data::Boolean(*value)),
            StoreValue::Number(value) => Ok(Data::Number(value.clone())),
            StoreValue::String(value) => Ok(Data::String(value.clone())),
        }
    }

    fn read_list(
        &mut self,
        items: &[StoreValue],
        field: FieldSelection<'doc>,
        previous: Option<&Data>,
    ) -> Result<Data, CacheError> {
        let previous_items = PreviousItems::new(previous);
        let mut values = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            // Objects with an identity of their own are found in the previous list wherever
            // they were, everything else is compared positionally.
            let previous_item = match item {
                StoreValue::Reference(Reference { id, generated: false }) => previous_items.by_node_id(id),
                _ => previous_items.at(index),
            };

            values.push(self.read_value(item, field, previous_item)?);
        }

        Ok(reuse_list(values, previous))
    }

    /// Reads the value returned by a `@client` resolver through the selections of its field.
    fn read_resolved(
        &mut self,
        node_id: &NodeId,
        value: &Value,
        field: FieldSelection<'doc>,
        previous: Option<&Data>,
    ) -> Result<Data, CacheError> {
        if field.is_leaf() {
            return Ok(reuse(Data::from(value), previous));
        }

        match value {
            Value::Array(items) => {
                let previous_items = previous.and_then(Data::as_list);
                let mut values = Vec::with_capacity(items.len());

                for (index, item) in items.iter().enumerate() {
                    let previous_item = previous_items.and_then(|items| items.get(index));
                    values.push(self.read_resolved(node_id, item, field, previous_item)?);
                }

                Ok(reuse_list(values, previous))
            }
            Value::Object(object) => {
                // Resolvers may point at an object of the store instead of building one.
                if let Ok(StoreValue::Reference(reference)) = StoreValue::try_from(value.clone()) {
                    return self.read_object(&reference.id, field.selection_set(), previous);
                }

                let mut fields = IndexMap::new();
                self.project_selection_set(node_id, object, field.selection_set(), &mut fields, previous)?;

                Ok(reuse_object(None, fields, previous))
            }
            other => Ok(Data::from(other)),
        }
    }

    fn project_selection_set(
        &mut self,
        node_id: &NodeId,
        object: &Map<String, Value>,
        selections: Iter<'doc, Selection<'doc>>,
        fields: &mut IndexMap<String, Data>,
        previous: Option<&Data>,
    ) -> Result<(), CacheError> {
        let root = self.root;
        let typename = object.get(TYPENAME).and_then(Value::as_str);

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if !should_include(field.directives(), &root.variables)? {
                        continue;
                    }

                    let response_key = field.response_key();
                    let previous = previous.and_then(|previous| previous.get(response_key));

                    match object.get(response_key).or_else(|| object.get(field.name())) {
                        Some(value) => {
                            let value = self.read_resolved(node_id, value, field, previous)?;
                            merge_field(fields, response_key, value, previous);
                        }
                        None => self.missing(node_id, field.name())?,
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if !should_include(fragment.directives(), &root.variables)? {
                        continue;
                    }

                    if applies_to(fragment.type_condition(), typename) {
                        self.project_selection_set(node_id, object, fragment.selection_set(), fields, previous)?;
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !should_include(spread.directives(), &root.variables)? {
                        continue;
                    }

                    let fragment = root.fragments.get(spread.fragment_name())?;

                    if applies_to(Some(fragment.type_condition()), typename) {
                        self.project_selection_set(node_id, object, fragment.selection_set(), fields, previous)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn missing(&mut self, node_id: &NodeId, field_name: &str) -> Result<(), CacheError> {
        if self.options.strict && self.lenient_depth == 0 {
            return Err(CacheError::missing_field(node_id, field_name));
        }

        self.is_missing = true;
        self.missing_field.get_or_insert_with(|| field_name.to_string());

        Ok(())
    }
}

/// Type conditions on resolver results can only be checked against their own `__typename`.
fn applies_to(type_condition: Option<&str>, typename: Option<&str>) -> bool {
    match (type_condition, typename) {
        (Some(type_condition), Some(typename)) => type_condition == typename,
        _ => true,
    }
}

/// Adds a field to an object being built. A response key selected more than once, directly
/// and through fragments, gets the union of every selection.
fn merge_field(fields: &mut IndexMap<String, Data>, key: &str, value: Data, previous: Option<&Data>) {
    match fields.get_mut(key) {
        Some(existing) => {
            *existing = merge_data(existing, value, previous);
        }
        None => {
            fields.insert(key.to_string(), value);
        }
    }
}

/// Both sides were read against `previous`, so the merged value reuses it wherever nothing
/// changed.
fn merge_data(existing: &Data, incoming: Data, previous: Option<&Data>) -> Data {
    match (existing, &incoming) {
        (Data::Object(left), Data::Object(right)) if !Arc::ptr_eq(left, right) => {
            let mut fields = left.fields().clone();
            for (key, value) in right.iter() {
                merge_field(&mut fields, key, value.clone(), previous.and_then(|previous| previous.get(key)));
            }
            reuse_object(left.node_id(), fields, previous)
        }
        (Data::List(left), Data::List(right)) if left.len() == right.len() && !Arc::ptr_eq(left, right) => {
            let previous_items = PreviousItems::new(previous);
            let values = left
                .iter()
                .zip(right.iter())
                .enumerate()
                .map(|(index, (left, right))| {
                    let previous_item = match left.node_id() {
                        Some(node_id) => previous_items.by_node_id(node_id),
                        None => previous_items.at(index),
                    };
                    merge_data(left, right.clone(), previous_item)
                })
                .collect();
            reuse_list(values, previous)
        }
        _ => incoming,
    }
}

/// The items of a previous list, with the objects among them indexed by node.
struct PreviousItems<'p> {
    items: &'p [Data],
    by_node_id: HashMap<&'p NodeId, &'p Data>,
}

impl<'p> PreviousItems<'p> {
    fn new(previous: Option<&'p Data>) -> Self {
        let items = previous.and_then(Data::as_list).unwrap_or_default();
        let by_node_id = items
            .iter()
            .filter_map(|item| Some((item.node_id()?, item)))
            .collect();

        PreviousItems { items, by_node_id }
    }

    fn at(&self, index: usize) -> Option<&'p Data> {
        self.items.get(index)
    }

    fn by_node_id(&self, node_id: &NodeId) -> Option<&'p Data> {
        self.by_node_id.get(node_id).copied()
    }
}

fn reuse(value: Data, previous: Option<&Data>) -> Data {
    match previous {
        Some(previous) if previous.is_same(&value) || (previous.node_id() == value.node_id() && *previous == value) => {
            previous.clone()
        }
        _ => value,
    }
}

fn reuse_object(node_id: Option<&NodeId>, fields: IndexMap<String, Data>, previous: Option<&Data>) -> Data {
    if let Some(Data::Object(previous_object)) = previous {
        let unchanged = previous_object.node_id() == node_id
            && previous_object.len() == fields.len()
            && fields
                .iter()
                .all(|(key, value)| previous_object.get(key).is_some_and(|previous| previous.is_same(value)));

        if unchanged {
            return Data::Object(Arc::clone(previous_object));
        }
    }

    Data::object(node_id.cloned(), fields)
}

fn reuse_list(values: Vec<Data>, previous: Option<&Data>) -> Data {
    if let Some(Data::List(previous_items)) = previous {
        let unchanged = previous_items.len() == values.len()
            && previous_items
                .iter()
                .zip(&values)
                .all(|(previous, value)| previous.is_same(value));

        if unchanged {
            return Data::List(Arc::clone(previous_items));
        }
    }

    Data::list(values)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::{
        document::{parse_document, Variables},
        fragment_matcher::{HeuristicFragmentMatcher, IntrospectionFragmentMatcher, PossibleTypes},
    };

    fn store(value: Value) -> Store {
        Store::try_from(value).unwrap()
    }

    fn read_with(
        query: &str,
        store: &Store,
        previous: Option<&Data>,
        options: &ReadOptions<'_>,
    ) -> Result<Diff, CacheError> {
        let document = parse_document(query).unwrap();
        let root = SelectionRoot::operation(&document, None, &Variables::new())?;
        diff(&root, store, previous, options)
    }

    fn read(query: &str, store: &Store, previous: Option<&Data>, strict: bool) -> Result<Diff, CacheError> {
        let matcher = HeuristicFragmentMatcher::new();
        let resolvers = Resolvers::new();
        let options = ReadOptions {
            matcher: &matcher,
            resolvers: &resolvers,
            strict,
        };
        read_with(query, store, previous, &options)
    }

    fn people() -> Store {
        store(json!({
            "ROOT_QUERY": {
                "people": [
                    { "type": "id", "id": "Person:1", "generated": false },
                    { "type": "id", "id": "Person:2", "generated": false }
                ],
                "stats": { "type": "id", "id": "$ROOT_QUERY.stats", "generated": true }
            },
            "Person:1": { "__typename": "Person", "id": "1", "name": "Ada" },
            "Person:2": { "__typename": "Person", "id": "2", "name": "Grace" },
            "$ROOT_QUERY.stats": { "count": 2 }
        }))
    }

    #[test]
    fn follows_references() {
        let diff = read("{ people { name } stats { count } }", &people(), None, true).unwrap();

        assert!(diff.is_complete());
        insta::assert_json_snapshot!(diff.result, @r###"
        {
          "people": [
            {
              "name": "Ada"
            },
            {
              "name": "Grace"
            }
          ],
          "stats": {
            "count": 2
          }
        }
        "###);
    }

    #[test]
    fn missing_fields() {
        let store = people();

        let error = read("{ stats { count total } }", &store, None, true).unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"can't find field `total` on object `$ROOT_QUERY.stats`");

        let diff = read("{ stats { count total } missing }", &store, None, false).unwrap();
        assert!(diff.is_missing);
        assert_eq!(diff.missing_field.as_deref(), Some("total"));
        assert_eq!(diff.result, json!({ "stats": { "count": 2 } }));
    }

    #[test]
    fn dangling_references_read_as_empty_objects() {
        let store = store(json!({
            "ROOT_QUERY": { "user": { "type": "id", "id": "User:1", "generated": false } }
        }));

        let diff = read("{ user { name } }", &store, None, false).unwrap();
        assert!(diff.is_missing);
        assert_eq!(diff.result, json!({ "user": {} }));
    }

    #[test]
    fn unchanged_results_keep_their_identity() {
        let store = people();
        let query = "{ people { name } stats { count } }";

        let first = read(query, &store, None, true).unwrap().result;
        let second = read(query, &store, Some(&first), true).unwrap().result;
        assert!(second.is_same(&first));

        let mut changed = store.clone();
        changed.merge_object(
            &NodeId::new("Person:2"),
            &StoreObject::from_iter([("name", StoreValue::from("Grace Hopper"))]),
        );

        let third = read(query, &changed, Some(&second), true).unwrap().result;
        assert!(!third.is_same(&second));

        let (people, previous_people) = (third.get("people").unwrap(), second.get("people").unwrap());
        assert!(!people.is_same(previous_people));
        assert!(people.as_list().unwrap()[0].is_same(&previous_people.as_list().unwrap()[0]));
        assert!(!people.as_list().unwrap()[1].is_same(&previous_people.as_list().unwrap()[1]));
        assert!(third.get("stats").unwrap().is_same(second.get("stats").unwrap()));
    }

    #[test]
    fn reordered_lists_reuse_items_by_identity() {
        let store = people();
        let query = "{ people { name } }";
        let first = read(query, &store, None, true).unwrap().result;

        let mut reordered = store.clone();
        reordered.merge_object(
            &NodeId::root_query(),
            &StoreObject::from_iter([(
                "people",
                StoreValue::List(vec![
                    Reference {
                        id: NodeId::new("Person:2"),
                        generated: false,
                    }
                    .into(),
                    Reference {
                        id: NodeId::new("Person:1"),
                        generated: false,
                    }
                    .into(),
                ]),
            )]),
        );

        let second = read(query, &reordered, Some(&first), true).unwrap().result;
        let (before, after) = (
            first.get("people").unwrap().as_list().unwrap(),
            second.get("people").unwrap().as_list().unwrap(),
        );

        assert!(!second.is_same(&first));
        assert!(after[0].is_same(&before[1]));
        assert!(after[1].is_same(&before[0]));
    }

    #[test]
    fn repeated_response_keys_are_merged() {
        let query = indoc! {r#"
            {
              people { name }
              ... on Query { people { id } }
            }
        "#};

        let diff = read(query, &people(), None, true).unwrap();
        assert_eq!(
            diff.result,
            json!({ "people": [{ "name": "Ada", "id": "1" }, { "name": "Grace", "id": "2" }] })
        );

        let again = read(query, &people(), Some(&diff.result), true).unwrap();
        assert!(again.result.is_same(&diff.result));
    }

    #[test]
    fn guessed_fragments_never_fail_strict_reads() {
        let store = store(json!({
            "ROOT_QUERY": { "hero": { "type": "id", "id": "$ROOT_QUERY.hero", "generated": true } },
            "$ROOT_QUERY.hero": { "name": "R2-D2" }
        }));

        let query = indoc! {r#"
            {
              hero {
                name
                ... on Droid { primaryFunction }
              }
            }
        "#};

        let diff = read(query, &store, None, true).unwrap();
        assert!(diff.is_missing);
        assert_eq!(diff.result, json!({ "hero": { "name": "R2-D2" } }));
    }

    #[test]
    fn interface_fragments_with_possible_types() {
        let store = store(json!({
            "ROOT_QUERY": { "hero": { "type": "id", "id": "Droid:1", "generated": false } },
            "Droid:1": { "__typename": "Droid", "name": "R2-D2", "primaryFunction": "Astromech" }
        }));

        let query = indoc! {r#"
            {
              hero {
                ... on Character { name }
                ... on Droid { primaryFunction }
                ... on Human { height }
              }
            }
        "#};

        let mut possible_types = PossibleTypes::new();
        possible_types.insert("Character", ["Droid", "Human"]);
        let matcher = IntrospectionFragmentMatcher::new(possible_types);
        let resolvers = Resolvers::new();
        let options = ReadOptions {
            matcher: &matcher,
            resolvers: &resolvers,
            strict: true,
        };

        let diff = read_with(query, &store, None, &options).unwrap();
        assert!(diff.is_complete());
        assert_eq!(diff.result, json!({ "hero": { "name": "R2-D2", "primaryFunction": "Astromech" } }));
    }

    #[test]
    fn client_fields_use_resolvers() {
        let store = people();
        let mut resolvers = Resolvers::new();
        resolvers.add_field("Person", "initials", |context: ResolverContext<'_>| {
            let name = context.parent.and_then(|parent| match parent.get("name") {
                Some(StoreValue::String(name)) => Some(name.clone()),
                _ => None,
            });
            Ok(json!(name.unwrap_or_default().chars().take(1).collect::<String>()))
        });
        resolvers.add_field("Query", "settings", |_: ResolverContext<'_>| {
            Ok(json!({ "theme": "dark", "debug": false }))
        });

        let matcher = HeuristicFragmentMatcher::new();
        let options = ReadOptions {
            matcher: &matcher,
            resolvers: &resolvers,
            strict: true,
        };

        let query = "{ people { initials @client } settings @client { theme } }";
        let diff = read_with(query, &store, None, &options).unwrap();

        assert_eq!(
            diff.result,
            json!({ "people": [{ "initials": "A" }, { "initials": "G" }], "settings": { "theme": "dark" } })
        );
    }

    #[test]
    fn resolver_errors_propagate() {
        let mut resolvers = Resolvers::new();
        resolvers.add_field("Query", "broken", |_: ResolverContext<'_>| Err("boom".into()));

        let matcher = HeuristicFragmentMatcher::new();
        let options = ReadOptions {
            matcher: &matcher,
            resolvers: &resolvers,
            strict: false,
        };

        let error = read_with("{ broken @client }", &Store::new(), None, &options).unwrap_err();
        assert!(matches!(error, CacheError::Resolver(_)));
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn cache_redirects() {
        let store = people();
        let mut resolvers = Resolvers::new();
        resolvers.add_redirect("Query", "person", |arguments: &Map<String, Value>| {
            let id = arguments.get("id")?.as_str()?;
            Some(NodeId::from(format!("Person:{id}")))
        });

        let matcher = HeuristicFragmentMatcher::new();
        let options = ReadOptions {
            matcher: &matcher,
            resolvers: &resolvers,
            strict: true,
        };

        let diff = read_with(r#"{ person(id: "2") { name } }"#, &store, None, &options).unwrap();
        assert_eq!(diff.result, json!({ "person": { "name": "Grace" } }));
    }
}
