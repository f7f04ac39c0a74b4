use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Number, Value};

use crate::store::NodeId;

/// A result read back from the cache.
///
/// Lists and objects are reference counted. When a read is given the previous result of the
/// same query, every part of the new result that didn't change is the previous `Arc`, so
/// consumers can compare with [`Data::is_same`] instead of walking the whole tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Data {
    #[default]
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    List(Arc<Vec<Data>>),
    Object(Arc<DataObject>),
}

/// The fields of an object in a [`Data`] tree.
///
/// Remembers which store node it was read from, so that list items can be matched against a
/// previous result by identity. The node id is not part of equality nor of the serialized form.
#[derive(Clone, Debug, Default)]
pub struct DataObject {
    node_id: Option<NodeId>,
    fields: IndexMap<String, Data>,
}

impl PartialEq for DataObject {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl DataObject {
    pub(crate) fn new(node_id: Option<NodeId>, fields: IndexMap<String, Data>) -> Self {
        DataObject { node_id, fields }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Data> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, &Data)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn fields(&self) -> &IndexMap<String, Data> {
        &self.fields
    }
}

impl Data {
    pub(crate) fn object(node_id: Option<NodeId>, fields: IndexMap<String, Data>) -> Data {
        Data::Object(Arc::new(DataObject::new(node_id, fields)))
    }

    pub(crate) fn list(items: Vec<Data>) -> Data {
        Data::List(Arc::new(items))
    }

    /// Whether both values are the same allocation, or equal scalars.
    pub fn is_same(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::List(left), Data::List(right)) => Arc::ptr_eq(left, right),
            (Data::Object(left), Data::Object(right)) => Arc::ptr_eq(left, right),
            (Data::List(_) | Data::Object(_), _) | (_, Data::List(_) | Data::Object(_)) => false,
            (left, right) => left == right,
        }
    }

    pub fn as_object(&self) -> Option<&DataObject> {
        match self {
            Data::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(value) => Some(value),
            _ => None,
        }
    }

    /// Field lookup, `None` for anything that isn't an object.
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.as_object()?.get(key)
    }

    /// The node an object was read from.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.as_object()?.node_id()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    pub fn to_json(&self) -> Value {
        match self {
            Data::Null => Value::Null,
            Data::Boolean(value) => Value::Bool(*value),
            Data::Number(value) => Value::Number(value.clone()),
            Data::String(value) => Value::String(value.clone()),
            Data::List(items) => Value::Array(items.iter().map(Data::to_json).collect()),
            Data::Object(object) => Value::Object(
                object
                    .fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Data::Null,
            Value::Bool(value) => Data::Boolean(value),
            Value::Number(value) => Data::Number(value),
            Value::String(value) => Data::String(value),
            Value::Array(items) => Data::list(items.into_iter().map(Data::from).collect()),
            Value::Object(fields) => Data::object(
                None,
                fields.into_iter().map(|(key, value)| (key, Data::from(value))).collect(),
            ),
        }
    }
}

impl From<&Value> for Data {
    fn from(value: &Value) -> Self {
        Data::from(value.clone())
    }
}

impl PartialEq<Value> for Data {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Data::Null, Value::Null) => true,
            (Data::Boolean(left), Value::Bool(right)) => left == right,
            (Data::Number(left), Value::Number(right)) => left == right,
            (Data::String(left), Value::String(right)) => left == right,
            (Data::List(left), Value::Array(right)) => {
                left.len() == right.len() && left.iter().zip(right).all(|(left, right)| left == right)
            }
            (Data::Object(left), Value::Object(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .all(|(key, value)| right.get(key).is_some_and(|other| value == other))
            }
            _ => false,
        }
    }
}

impl Serialize for Data {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Data::Null => serializer.serialize_unit(),
            Data::Boolean(value) => serializer.serialize_bool(*value),
            Data::Number(value) => value.serialize(serializer),
            Data::String(value) => serializer.serialize_str(value),
            Data::List(items) => serializer.collect_seq(items.iter()),
            Data::Object(object) => {
                let mut map = serializer.serialize_map(Some(object.len()))?;
                for (key, value) in object.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
