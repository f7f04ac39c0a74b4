use crate::store::NodeId;

/// Error type returned by a `@client` field resolver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("the variable `${name}` is required by an argument but was not provided")]
    MissingVariable { name: String },

    #[error("no fragment named `{0}`")]
    MissingFragment(String),

    #[error("can't find field `{field}` on object `{object}`")]
    MissingField { object: NodeId, field: String },

    #[error("the fragment matcher has not been seeded with possible types yet")]
    NotReady,

    #[error(transparent)]
    Resolver(BoxError),

    #[error("could not parse the GraphQL document: {0}")]
    Parse(String),

    #[error("the document does not contain an operation{}", .0.as_deref().map(|name| format!(" named `{name}`")).unwrap_or_default())]
    MissingOperation(Option<String>),

    #[error("the document does not contain any fragment")]
    NoFragment,

    #[error("found {0} fragments in the document, a fragment name must be provided")]
    FragmentNameRequired(usize),

    #[error("the data written to `{0}` must be an object")]
    NonObjectRoot(NodeId),

    #[error("invalid introspection result: {0}")]
    InvalidIntrospection(String),

    #[error("invalid store value: {0}")]
    InvalidStoreValue(String),
}

impl CacheError {
    pub(crate) fn missing_field(object: &NodeId, field: &str) -> Self {
        CacheError::MissingField {
            object: object.clone(),
            field: field.to_string(),
        }
    }
}
