use crate::fragment_matcher::PossibleTypes;

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether reads fail on missing fields instead of returning partial data.
    /// False by default.
    pub strict: bool,
    /// Whether the `__typename` of written objects is stored even when it wasn't selected.
    /// True by default.
    pub add_typename: bool,
    /// The possible types of every interface and union. When set, fragments are matched with
    /// an introspection matcher seeded with them.
    pub possible_types: Option<PossibleTypes>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strict: false,
            add_typename: true,
            possible_types: None,
        }
    }
}
