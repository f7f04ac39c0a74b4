//! Helpers on top of the `cynic-parser` executable AST.

use std::collections::{HashMap, HashSet};

use cynic_parser::{
    common::OperationType,
    executable::{Directive, FieldSelection, FragmentDefinition, Iter, OperationDefinition, Selection},
    ExecutableDocument,
};
use serde_json::Value;

use crate::{keys, store::NodeId, CacheError};

/// Variables of an operation, as sent alongside it.
pub type Variables = serde_json::Map<String, Value>;

/// Parses an executable document: operations and fragments.
pub fn parse_document(source: &str) -> Result<ExecutableDocument, CacheError> {
    cynic_parser::parse_executable_document(source).map_err(|error| CacheError::Parse(error.to_string()))
}

pub(crate) trait FieldExt<'a> {
    fn response_key(&self) -> &'a str;

    fn is_leaf(&self) -> bool;
}

impl<'a> FieldExt<'a> for FieldSelection<'a> {
    fn response_key(&self) -> &'a str {
        self.alias().unwrap_or(self.name())
    }

    fn is_leaf(&self) -> bool {
        self.selection_set().len() == 0
    }
}

pub(crate) fn find_directive<'a>(mut directives: Iter<'a, Directive<'a>>, name: &str) -> Option<Directive<'a>> {
    directives.find(|directive| directive.name() == name)
}

/// Evaluates `@skip(if:)` and `@include(if:)`.
pub(crate) fn should_include<'a>(directives: Iter<'a, Directive<'a>>, variables: &VariableScope) -> Result<bool, CacheError> {
    for directive in directives {
        let include_when = match directive.name() {
            "skip" => false,
            "include" => true,
            _ => continue,
        };

        let condition = match directive.arguments().find(|argument| argument.name() == "if") {
            Some(argument) => keys::resolve_value(argument.value(), variables)?,
            None => None,
        };

        if matches!(condition, Some(Value::Bool(true))) != include_when {
            return Ok(false);
        }
    }

    Ok(true)
}

/// The variables an operation runs with, plus what the operation declares about them.
#[derive(Debug, Default)]
pub(crate) struct VariableScope {
    values: Variables,
    /// Variables declared with a nullable type: leaving them out is not an error.
    optional: HashSet<String>,
}

impl VariableScope {
    /// A scope with no declarations, where every referenced variable must be provided.
    pub fn new(values: Variables) -> Self {
        VariableScope {
            values,
            optional: HashSet::new(),
        }
    }

    pub fn for_operation(operation: OperationDefinition<'_>, provided: &Variables) -> Self {
        let mut values = provided.clone();
        let mut optional = HashSet::new();

        for definition in operation.variable_definitions() {
            let name = definition.name();

            if !values.contains_key(name) {
                if let Some(default) = definition.default_value() {
                    let default = keys::resolve_value(default.into(), &VariableScope::default())
                        .ok()
                        .flatten()
                        .unwrap_or(Value::Null);
                    values.insert(name.to_string(), default);
                }
            }

            if !definition.ty().to_string().ends_with('!') {
                optional.insert(name.to_string());
            }
        }

        VariableScope { values, optional }
    }

    /// Looks a variable up. `Ok(None)` means an optional variable was left out.
    pub fn get(&self, name: &str) -> Result<Option<&Value>, CacheError> {
        match self.values.get(name) {
            Some(value) => Ok(Some(value)),
            None if self.optional.contains(name) => Ok(None),
            None => Err(CacheError::MissingVariable { name: name.to_string() }),
        }
    }

    pub fn values(&self) -> &Variables {
        &self.values
    }
}

/// The fragment definitions of a document, by name.
pub(crate) struct Fragments<'a> {
    definitions: HashMap<&'a str, FragmentDefinition<'a>>,
}

impl<'a> Fragments<'a> {
    pub fn new(document: &'a ExecutableDocument) -> Self {
        Fragments {
            definitions: document.fragments().map(|fragment| (fragment.name(), fragment)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<FragmentDefinition<'a>, CacheError> {
        self.definitions
            .get(name)
            .copied()
            .ok_or_else(|| CacheError::MissingFragment(name.to_string()))
    }
}

/// Where the selections of a read or write start from.
#[derive(Clone, Copy)]
enum Root<'a> {
    Operation(OperationDefinition<'a>),
    Fragment(FragmentDefinition<'a>),
}

/// A document narrowed down to the selection set a read or write walks, with everything
/// needed to walk it.
pub(crate) struct SelectionRoot<'a> {
    root: Root<'a>,
    pub fragments: Fragments<'a>,
    pub variables: VariableScope,
    /// The node the selection set applies to, unless the caller picks another one.
    pub node_id: NodeId,
}

impl<'a> SelectionRoot<'a> {
    pub fn operation(
        document: &'a ExecutableDocument,
        operation_name: Option<&str>,
        variables: &Variables,
    ) -> Result<Self, CacheError> {
        let operation = match operation_name {
            Some(name) => document.operations().find(|operation| operation.name() == Some(name)),
            None => document.operations().next(),
        };

        let Some(operation) = operation else {
            return Err(CacheError::MissingOperation(operation_name.map(str::to_string)));
        };

        let node_id = match operation.operation_type() {
            OperationType::Query => NodeId::root_query(),
            OperationType::Mutation => NodeId::root_mutation(),
            OperationType::Subscription => NodeId::root_subscription(),
        };

        Ok(SelectionRoot {
            root: Root::Operation(operation),
            fragments: Fragments::new(document),
            variables: VariableScope::for_operation(operation, variables),
            node_id,
        })
    }

    /// Uses a fragment definition as the root. Without a name the document must contain
    /// exactly one fragment.
    pub fn fragment(
        document: &'a ExecutableDocument,
        fragment_name: Option<&str>,
        variables: &Variables,
        node_id: NodeId,
    ) -> Result<Self, CacheError> {
        let fragments = Fragments::new(document);

        let fragment = match fragment_name {
            Some(name) => fragments.get(name)?,
            None => {
                let mut all = document.fragments();
                match (all.next(), all.count()) {
                    (Some(fragment), 0) => fragment,
                    (None, _) => return Err(CacheError::NoFragment),
                    (Some(_), rest) => return Err(CacheError::FragmentNameRequired(rest + 1)),
                }
            }
        };

        Ok(SelectionRoot {
            root: Root::Fragment(fragment),
            fragments,
            variables: VariableScope::new(variables.clone()),
            node_id,
        })
    }

    pub fn with_node_id(mut self, node_id: Option<NodeId>) -> Self {
        if let Some(node_id) = node_id {
            self.node_id = node_id;
        }
        self
    }

    pub fn selection_set(&self) -> Iter<'a, Selection<'a>> {
        match self.root {
            Root::Operation(operation) => operation.selection_set(),
            Root::Fragment(fragment) => fragment.selection_set(),
        }
    }
}
