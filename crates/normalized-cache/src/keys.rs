//! Storage keys for fields and node ids for objects.

use std::sync::Arc;

use cynic_parser::{executable::FieldSelection, Value as AstValue};
use serde_json::{Map, Number, Value};

use crate::{
    document::{find_directive, FieldExt, VariableScope},
    store::NodeId,
    CacheError,
};

/// Derives the identity of a result object. Returning `None` makes the cache fall back to an
/// id generated from the object's position.
pub type IdentifyFn = Arc<dyn Fn(&Map<String, Value>) -> Option<String> + Send + Sync>;

/// Identity used when none is configured: `<__typename>:<id>`, falling back on `_id`.
pub fn default_identify(object: &Map<String, Value>) -> Option<String> {
    let typename = object.get("__typename")?.as_str()?;

    let id = match object.get("id").filter(|id| !id.is_null()) {
        Some(id) => id,
        None => object.get("_id").filter(|id| !id.is_null())?,
    };

    match id {
        Value::String(id) => Some(format!("{typename}:{id}")),
        Value::Number(id) => Some(format!("{typename}:{id}")),
        _ => None,
    }
}

pub(crate) fn identify(object: &Map<String, Value>, custom: Option<&IdentifyFn>) -> Option<NodeId> {
    let id = match custom {
        Some(identify) => identify(object),
        None => default_identify(object),
    };

    id.map(NodeId::from)
}

/// Builds the storage key of a field: its response key, followed by its arguments as
/// canonical JSON if it has any.
pub(crate) fn storage_key(field: FieldSelection<'_>, variables: &VariableScope) -> Result<String, CacheError> {
    if let Some(connection) = find_directive(field.directives(), "connection") {
        let key = connection
            .arguments()
            .find(|argument| argument.name() == "key")
            .map(|argument| resolve_value(argument.value(), variables))
            .transpose()?
            .flatten();

        if let Some(Value::String(key)) = key {
            let filter = connection
                .arguments()
                .find(|argument| argument.name() == "filter")
                .map(|argument| resolve_value(argument.value(), variables))
                .transpose()?
                .flatten();

            let Some(Value::Array(filter)) = filter else {
                return Ok(key);
            };

            let mut arguments = field_arguments(field, variables)?;
            arguments.retain(|name, _| filter.iter().any(|kept| kept.as_str() == Some(name.as_str())));

            return Ok(storage_key_from_arguments(&key, Some(&arguments)));
        }
    }

    if field.arguments().len() == 0 {
        return Ok(field.response_key().to_string());
    }

    let arguments = field_arguments(field, variables)?;

    Ok(storage_key_from_arguments(field.response_key(), Some(&arguments)))
}

/// `name` alone without arguments, `name({"a":1,"b":2})` with them. Object keys are sorted at
/// every depth, so the order arguments were written in doesn't matter.
pub fn storage_key_from_arguments(name: &str, arguments: Option<&Map<String, Value>>) -> String {
    match arguments {
        Some(arguments) => format!("{name}({})", canonical_json(&Value::Object(arguments.clone()))),
        None => name.to_string(),
    }
}

/// The arguments of a field with variables substituted in. Arguments bound to an optional
/// variable that wasn't provided are left out.
pub(crate) fn field_arguments(
    field: FieldSelection<'_>,
    variables: &VariableScope,
) -> Result<Map<String, Value>, CacheError> {
    let mut arguments = Map::new();

    for argument in field.arguments() {
        if let Some(value) = resolve_value(argument.value(), variables)? {
            arguments.insert(argument.name().to_string(), value);
        }
    }

    Ok(arguments)
}

/// Converts an argument literal into JSON. `Ok(None)` stands for an optional variable that
/// wasn't provided.
pub(crate) fn resolve_value(value: AstValue<'_>, variables: &VariableScope) -> Result<Option<Value>, CacheError> {
    let value = match value {
        AstValue::Variable(variable) => return Ok(variables.get(variable.name())?.cloned()),
        AstValue::Null(_) => Value::Null,
        AstValue::Boolean(value) => Value::Bool(value.value()),
        AstValue::Int(value) => Value::Number(value.as_i64().into()),
        AstValue::Float(value) => Number::from_f64(value.value()).map(Value::Number).unwrap_or(Value::Null),
        AstValue::String(value) => Value::String(value.as_str().to_string()),
        AstValue::Enum(value) => Value::String(value.name().to_string()),
        AstValue::List(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                list.push(resolve_value(item, variables)?.unwrap_or(Value::Null));
            }
            Value::Array(list)
        }
        AstValue::Object(object) => {
            let mut fields = Map::new();
            for field in object.fields() {
                if let Some(value) = resolve_value(field.value(), variables)? {
                    fields.insert(field.name().to_string(), value);
                }
            }
            Value::Object(fields)
        }
    };

    Ok(Some(value))
}

fn canonical_json(value: &Value) -> String {
    // serde_json::Value always serializes
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut entries = fields.iter().collect::<Vec<_>>();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sorted(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
