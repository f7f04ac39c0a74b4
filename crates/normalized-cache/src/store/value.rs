use serde_json::{Map, Number, Value};

use super::NodeId;
use crate::CacheError;

/// A single field value of a [`super::StoreObject`].
///
/// Serialized as plain JSON for scalars and lists, `{"type": "id", ...}` for references and
/// `{"type": "json", "json": ...}` for opaque values.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum StoreValue {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    /// Points at another object of the store.
    Reference(Reference),
    List(Vec<StoreValue>),
    /// A subtree that is kept as-is, e.g. the value of a JSON scalar.
    Json(Value),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    pub id: NodeId,
    /// Whether the id was derived from the object's position rather than its identity.
    pub generated: bool,
}

impl StoreValue {
    /// Converts the value of a field without a sub-selection.
    pub(crate) fn from_leaf(value: &Value) -> StoreValue {
        match value {
            Value::Null => StoreValue::Null,
            Value::Bool(value) => StoreValue::Boolean(*value),
            Value::Number(value) => StoreValue::Number(value.clone()),
            Value::String(value) => StoreValue::String(value.clone()),
            Value::Array(items) => StoreValue::List(items.iter().map(StoreValue::from_leaf).collect()),
            Value::Object(_) => StoreValue::Json(value.clone()),
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            StoreValue::Reference(reference) => Some(reference),
            _ => None,
        }
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::String(value.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::String(value)
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        StoreValue::Boolean(value)
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Number(value.into())
    }
}

impl From<Reference> for StoreValue {
    fn from(value: Reference) -> Self {
        StoreValue::Reference(value)
    }
}

impl TryFrom<Value> for StoreValue {
    type Error = CacheError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => StoreValue::Null,
            Value::Bool(value) => StoreValue::Boolean(value),
            Value::Number(value) => StoreValue::Number(value),
            Value::String(value) => StoreValue::String(value),
            Value::Array(items) => StoreValue::List(
                items
                    .into_iter()
                    .map(StoreValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(mut object) => match object.get("type").and_then(Value::as_str) {
                Some("id") => {
                    let Some(Value::String(id)) = object.remove("id") else {
                        return Err(CacheError::InvalidStoreValue("a reference must have a string `id`".into()));
                    };
                    let generated = object.get("generated").and_then(Value::as_bool).unwrap_or(false);

                    StoreValue::Reference(Reference {
                        id: NodeId::from(id),
                        generated,
                    })
                }
                Some("json") => StoreValue::Json(object.remove("json").unwrap_or(Value::Null)),
                other => {
                    return Err(CacheError::InvalidStoreValue(format!(
                        "expected a tagged `id` or `json` object, found type {other:?}"
                    )))
                }
            },
        })
    }
}

impl From<StoreValue> for Value {
    fn from(value: StoreValue) -> Self {
        match value {
            StoreValue::Null => Value::Null,
            StoreValue::Boolean(value) => Value::Bool(value),
            StoreValue::Number(value) => Value::Number(value),
            StoreValue::String(value) => Value::String(value),
            StoreValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            StoreValue::Reference(Reference { id, generated }) => {
                let mut object = Map::new();
                object.insert("type".into(), "id".into());
                object.insert("id".into(), id.as_str().into());
                object.insert("generated".into(), generated.into());
                Value::Object(object)
            }
            StoreValue::Json(json) => {
                let mut object = Map::new();
                object.insert("type".into(), "json".into());
                object.insert("json".into(), json);
                Value::Object(object)
            }
        }
    }
}
