#![allow(unused_crate_dependencies)]

use std::sync::Arc;

use indoc::indoc;
use normalized_cache::{
    parse_document, Cache, CacheConfig, CacheError, Fragment, GraphqlResponse, NodeId, PossibleTypes, Query,
    Reference, Store, StoreValue, Variables,
};
use serde_json::{json, Value};

fn variables(value: Value) -> Variables {
    match value {
        Value::Object(variables) => variables,
        _ => unreachable!(),
    }
}

#[test]
fn nested_objects_without_identity() {
    let cache = Cache::default();
    let document = parse_document("{ a d { e } }").unwrap();

    cache
        .write(&Query::new(&document), &json!({ "a": 1, "d": { "e": 4 } }))
        .unwrap();

    insta::assert_json_snapshot!(cache.extract(false), @r###"
    {
      "ROOT_QUERY": {
        "a": 1,
        "d": {
          "type": "id",
          "id": "$ROOT_QUERY.d",
          "generated": true
        }
      },
      "$ROOT_QUERY.d": {
        "e": 4
      }
    }
    "###);
}

#[test]
fn identity_function() {
    let cache = Cache::builder()
        .identify(|object| object.get("id")?.as_str().map(str::to_string))
        .build();
    let document = parse_document("{ foo { id e } }").unwrap();

    cache
        .write(&Query::new(&document), &json!({ "foo": { "id": "bar", "e": 5 } }))
        .unwrap();

    let store = cache.extract(false);
    assert_eq!(
        store.get(&NodeId::root_query()).unwrap().get("foo"),
        Some(&StoreValue::Reference(Reference {
            id: NodeId::new("bar"),
            generated: false,
        }))
    );
    assert_eq!(store.get(&NodeId::new("bar")).unwrap().get("e"), Some(&StoreValue::from(5_i64)));
    assert!(!store.contains(&NodeId::new("$ROOT_QUERY.foo")));
}

#[test]
fn results_read_back_as_written() {
    let cache = Cache::default();
    let document = parse_document(indoc! {r#"
        query Feed($first: Int!) {
          feed(first: $first) {
            __typename
            id
            title
            author { __typename id name }
            tags
            metadata
          }
          viewer: me { name }
        }
    "#})
    .unwrap();

    let data = json!({
        "feed": [
            {
                "__typename": "Post",
                "id": "1",
                "title": "Hello",
                "author": { "__typename": "User", "id": "7", "name": "Ada" },
                "tags": ["a", "b"],
                "metadata": { "views": 3, "nested": { "ok": true } }
            },
            null,
            {
                "__typename": "Post",
                "id": "2",
                "title": "World",
                "author": { "__typename": "User", "id": "7", "name": "Ada" },
                "tags": [],
                "metadata": null
            }
        ],
        "viewer": { "name": "Grace" }
    });

    let query = Query::new(&document).variables(variables(json!({ "first": 3 })));
    cache.write(&query, &data).unwrap();

    let diff = cache.read(&query, None).unwrap();
    assert!(diff.is_complete());
    assert_eq!(diff.result, data);

    // The author is stored once and shared by both posts.
    let store = cache.extract(false);
    assert!(store.contains(&NodeId::new("User:7")));
    assert!(store
        .get(&NodeId::root_query())
        .unwrap()
        .contains_key(r#"feed({"first":3})"#));
    assert!(store.get(&NodeId::root_query()).unwrap().contains_key("viewer"));
}

#[test]
fn writing_twice_changes_nothing() {
    let cache = Cache::default();
    let document = parse_document("{ user { __typename id name friends { __typename id } } }").unwrap();
    let data = json!({
        "user": {
            "__typename": "User",
            "id": "1",
            "name": "Ada",
            "friends": [{ "__typename": "User", "id": "2" }]
        }
    });

    cache.write(&Query::new(&document), &data).unwrap();
    let once = cache.extract(false);
    let shared = Arc::clone(cache.merged_view().get_shared(&NodeId::new("User:1")).unwrap());

    cache.write(&Query::new(&document), &data).unwrap();
    assert_eq!(cache.extract(false), once);
    assert!(Arc::ptr_eq(
        &shared,
        cache.merged_view().get_shared(&NodeId::new("User:1")).unwrap()
    ));
}

#[test]
fn entities_are_shared_between_queries() {
    let cache = Cache::default();
    let list = parse_document("{ users { __typename id name } }").unwrap();
    let single = parse_document(r#"{ user(id: "1") { __typename id name } }"#).unwrap();

    cache
        .write(
            &Query::new(&list),
            &json!({ "users": [{ "__typename": "User", "id": "1", "name": "Ada" }] }),
        )
        .unwrap();
    cache
        .write(
            &Query::new(&single),
            &json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }),
        )
        .unwrap();

    let diff = cache.read(&Query::new(&list), None).unwrap();
    assert_eq!(
        diff.result,
        json!({ "users": [{ "__typename": "User", "id": "1", "name": "Ada Lovelace" }] })
    );
}

#[test]
fn untouched_subtrees_keep_their_identity() {
    let cache = Cache::default();
    let document = parse_document("{ user { __typename id name } settings { theme } }").unwrap();
    let query = Query::new(&document);

    cache
        .write(
            &query,
            &json!({
                "user": { "__typename": "User", "id": "1", "name": "Ada" },
                "settings": { "theme": "dark" }
            }),
        )
        .unwrap();
    let first = cache.read(&query, None).unwrap().result;

    let rename = parse_document("{ user { __typename id name } }").unwrap();
    cache
        .write(
            &Query::new(&rename),
            &json!({ "user": { "__typename": "User", "id": "1", "name": "Grace" } }),
        )
        .unwrap();
    let second = cache.read(&query, Some(&first)).unwrap().result;

    assert!(!second.is_same(&first));
    assert!(!second.get("user").unwrap().is_same(first.get("user").unwrap()));
    assert!(second.get("settings").unwrap().is_same(first.get("settings").unwrap()));

    let third = cache.read(&query, Some(&second)).unwrap().result;
    assert!(third.is_same(&second));
}

#[test]
fn reordered_lists_keep_item_identity() {
    let cache = Cache::default();
    let document = parse_document("{ todos { __typename id text } }").unwrap();
    let query = Query::new(&document);

    let todo = |id: &str| json!({ "__typename": "Todo", "id": id, "text": format!("todo {id}") });

    cache
        .write(&query, &json!({ "todos": [todo("1"), todo("2"), todo("3")] }))
        .unwrap();
    let first = cache.read(&query, None).unwrap().result;

    cache
        .write(&query, &json!({ "todos": [todo("3"), todo("1"), todo("2")] }))
        .unwrap();
    let second = cache.read(&query, Some(&first)).unwrap().result;

    let before = first.get("todos").unwrap().as_list().unwrap();
    let after = second.get("todos").unwrap().as_list().unwrap();

    assert!(after[0].is_same(&before[2]));
    assert!(after[1].is_same(&before[0]));
    assert!(after[2].is_same(&before[1]));
    assert!(!second.get("todos").unwrap().is_same(first.get("todos").unwrap()));
}

#[test]
fn fields_selected_through_fragments_keep_their_identity() {
    let document = parse_document(indoc! {r#"
        query {
          people { __typename id name }
          ...Extra
        }

        fragment Extra on Query {
          people { id }
        }
    "#})
    .unwrap();
    let query = Query::new(&document);

    let cache = Cache::default();
    cache
        .write(
            &query,
            &json!({ "people": [
                { "__typename": "Person", "id": "1", "name": "Ada" },
                { "__typename": "Person", "id": "2", "name": "Grace" }
            ] }),
        )
        .unwrap();

    let first = cache.read(&query, None).unwrap().result;
    let unchanged = cache.read(&query, Some(&first)).unwrap().result;
    assert!(unchanged.is_same(&first));

    cache
        .write(
            &query,
            &json!({ "people": [
                { "__typename": "Person", "id": "1", "name": "Ada" },
                { "__typename": "Person", "id": "2", "name": "Hopper" }
            ] }),
        )
        .unwrap();

    let second = cache.read(&query, Some(&first)).unwrap().result;
    let before = first.get("people").unwrap().as_list().unwrap();
    let after = second.get("people").unwrap().as_list().unwrap();

    assert!(after[0].is_same(&before[0]));
    assert!(!after[1].is_same(&before[1]));
    assert_eq!(after[1].get("name").and_then(|name| name.as_str()), Some("Hopper"));
    assert!(!second.is_same(&first));
}

#[test]
fn missing_fields_are_reported_by_name() {
    let document = parse_document(r#"{ user(id: "1") { __typename id } }"#).unwrap();
    let query = Query::new(&document);

    let cache = Cache::default();
    let diff = cache.read(&query, None).unwrap();
    assert!(diff.is_missing);
    assert_eq!(diff.missing_field.as_deref(), Some("user"));

    let strict = Cache::new(CacheConfig {
        strict: true,
        ..CacheConfig::default()
    });
    let error = strict.read(&query, None).unwrap_err();
    insta::assert_snapshot!(error.to_string(), @"can't find field `user` on object `ROOT_QUERY`");
}

#[test]
fn partial_data() {
    let document = parse_document("{ user { __typename id name email } }").unwrap();
    let query = Query::new(&document);
    let data = json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } });

    let cache = Cache::default();
    cache.write(&query, &data).unwrap();

    let diff = cache.read(&query, None).unwrap();
    assert!(diff.is_missing);
    assert_eq!(diff.missing_field.as_deref(), Some("email"));
    assert_eq!(diff.result, data);

    let strict = Cache::new(CacheConfig {
        strict: true,
        ..CacheConfig::default()
    });
    strict.write(&query, &data).unwrap();

    let error = strict.read(&query, None).unwrap_err();
    insta::assert_snapshot!(error.to_string(), @"can't find field `email` on object `User:1`");
}

#[test]
fn missing_variables_abort_the_write() {
    let cache = Cache::default();
    let document = parse_document("query($id: ID!) { a user(id: $id) { name } }").unwrap();

    let error = cache
        .write(&Query::new(&document), &json!({ "a": 1, "user": { "name": "Ada" } }))
        .unwrap_err();

    assert!(matches!(error, CacheError::MissingVariable { ref name } if name == "id"));
    assert!(cache.extract(false).is_empty());
}

#[test]
fn fragments_on_objects() {
    let cache = Cache::default();
    let fragments = parse_document(indoc! {r#"
        fragment Name on User { __typename id name }
        fragment Email on User { __typename id email }
    "#})
    .unwrap();

    cache
        .write_fragment(
            &Fragment::new("User:1", &fragments).fragment_name("Name"),
            &json!({ "__typename": "User", "id": "1", "name": "Ada" }),
        )
        .unwrap();

    let name = cache
        .read_fragment(&Fragment::new("User:1", &fragments).fragment_name("Name"))
        .unwrap();
    assert_eq!(name.unwrap(), json!({ "__typename": "User", "id": "1", "name": "Ada" }));

    let unknown = cache
        .read_fragment(&Fragment::new("User:2", &fragments).fragment_name("Name"))
        .unwrap();
    assert!(unknown.is_none());

    let error = cache
        .read_fragment(&Fragment::new("User:1", &fragments))
        .unwrap_err();
    insta::assert_snapshot!(error.to_string(), @"found 2 fragments in the document, a fragment name must be provided");

    // Fragments can then be read as part of any query that reaches the object.
    let query = parse_document(r#"{ user(id: "1") { ...Name } } fragment Name on User { __typename id name }"#).unwrap();
    cache
        .write(
            &Query::new(&query),
            &json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }),
        )
        .unwrap();

    let name = cache
        .read_fragment(&Fragment::new("User:1", &fragments).fragment_name("Name"))
        .unwrap()
        .unwrap();
    assert_eq!(name.get("name").unwrap().as_str(), Some("Ada Lovelace"));
}

#[test]
fn interfaces_with_possible_types() {
    let mut possible_types = PossibleTypes::new();
    possible_types.insert("Character", ["Droid", "Human"]);

    let cache = Cache::new(CacheConfig {
        possible_types: Some(possible_types),
        ..CacheConfig::default()
    });

    let document = parse_document(indoc! {r#"
        {
          characters {
            __typename
            id
            ... on Character { name }
            ... on Droid { primaryFunction }
            ... on Human { height }
          }
        }
    "#})
    .unwrap();
    let query = Query::new(&document);

    let data = json!({
        "characters": [
            { "__typename": "Droid", "id": "2001", "name": "R2-D2", "primaryFunction": "Astromech" },
            { "__typename": "Human", "id": "1000", "name": "Luke", "height": 1.72 }
        ]
    });

    cache.write(&query, &data).unwrap();

    let diff = cache.read(&query, None).unwrap();
    assert!(diff.is_complete());
    assert_eq!(diff.result, data);
}

#[test]
fn store_dumps_can_be_restored() {
    let cache = Cache::default();
    let document = parse_document("{ user { __typename id name } blob }").unwrap();
    let query = Query::new(&document);
    let data = json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" }, "blob": { "free": "form" } });

    cache.write(&query, &data).unwrap();
    let dump = serde_json::to_value(cache.extract(false)).unwrap();

    let restored = Cache::default();
    restored.restore(Store::try_from(dump).unwrap());

    assert_eq!(restored.read(&query, None).unwrap().result, data);
}

#[test]
fn responses_are_written_without_their_errors() {
    let cache = Cache::default();
    let document = parse_document("{ a b }").unwrap();
    let query = Query::new(&document);

    let response: GraphqlResponse = serde_json::from_value(json!({
        "data": { "a": 1, "b": null },
        "errors": [{ "message": "b failed", "path": ["b"] }]
    }))
    .unwrap();

    cache.write_response(&query, &response).unwrap();
    assert_eq!(cache.read(&query, None).unwrap().result, json!({ "a": 1, "b": null }));

    let empty: GraphqlResponse = serde_json::from_value(json!({ "errors": [{ "message": "down" }] })).unwrap();
    cache.write_response(&query, &empty).unwrap();
    assert_eq!(cache.extract(false).len(), 1);
}

#[test]
fn client_fields_and_redirects() {
    let cache = Cache::builder()
        .resolver("User", "displayName", |context| {
            let name = match context.parent.and_then(|parent| parent.get("name")) {
                Some(StoreValue::String(name)) => name.clone(),
                _ => return Err("user without a name".into()),
            };
            Ok(json!(format!("@{}", name.to_lowercase())))
        })
        .cache_redirect("Query", "user", |arguments| {
            let id = arguments.get("id")?.as_str()?;
            Some(NodeId::from(format!("User:{id}")))
        })
        .build();

    let list = parse_document("{ users { __typename id name } }").unwrap();
    cache
        .write(
            &Query::new(&list),
            &json!({ "users": [{ "__typename": "User", "id": "1", "name": "Ada" }] }),
        )
        .unwrap();

    let single = parse_document(r#"{ user(id: "1") { name displayName @client } }"#).unwrap();
    let diff = cache.read(&Query::new(&single), None).unwrap();

    assert!(diff.is_complete());
    assert_eq!(diff.result, json!({ "user": { "name": "Ada", "displayName": "@ada" } }));
}

#[test]
fn concurrent_writers_and_readers() {
    let cache = Arc::new(Cache::default());
    let document = parse_document("query($id: ID!) { counter(id: $id) }").unwrap();

    std::thread::scope(|scope| {
        for id in 0..4 {
            let cache = Arc::clone(&cache);
            let document = &document;
            scope.spawn(move || {
                let query = Query::new(document).variables(variables(json!({ "id": id })));
                cache.write(&query, &json!({ "counter": id })).unwrap();
                let diff = cache.read(&query, None).unwrap();
                assert_eq!(diff.result, json!({ "counter": id }));
            });
        }
    });

    assert_eq!(cache.extract(false).get(&NodeId::root_query()).unwrap().len(), 4);
}
