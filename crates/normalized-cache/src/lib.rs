//! An in-memory normalized cache for GraphQL results.
//!
//! Query results are tree shaped, but the same entity tends to show up in many of them. This
//! crate flattens results into a [`Store`] keyed by node id, so that every entity is stored
//! exactly once and every query that touches it sees the same data.
//!
//! The moving parts, from the bottom up:
//!
//! 1. The key encoder ([`keys`]) turns a field and its arguments into a storage key, and an
//!    object into a node id.
//! 2. A [`FragmentMatcher`] decides whether a fragment on an interface or union applies to a
//!    given object.
//! 3. The writer normalizes a result into the store.
//! 4. The reader rebuilds a result from the store, reporting missing fields and reusing
//!    unchanged parts of a previous result so consumers can cheaply detect what changed.
//! 5. [`OptimisticLayers`] hold speculative mutation results on top of the committed store.
//!
//! [`Cache`] ties all of these together behind a single lock.
//!
//! Documents are parsed with `cynic-parser`; this crate never validates them against a
//! schema, it only walks the selections.

mod cache;
mod config;
mod data;
mod document;
mod error;
mod fragment_matcher;
pub mod keys;
mod optimistic;
mod reader;
mod resolvers;
mod response;
mod store;
mod writer;

pub use self::{
    cache::{Cache, CacheBuilder, Fragment, Query},
    config::CacheConfig,
    data::{Data, DataObject},
    document::{parse_document, Variables},
    error::{BoxError, CacheError},
    fragment_matcher::{
        FragmentMatcher, HeuristicFragmentMatcher, IntrospectionFragmentMatcher, MatchContext, PossibleTypes,
    },
    keys::IdentifyFn,
    optimistic::{OptimisticLayer, OptimisticLayers},
    reader::Diff,
    resolvers::{CacheRedirectFn, ResolverContext, ResolverFn, Resolvers},
    response::{GraphqlError, GraphqlResponse},
    store::{NodeId, Reference, Store, StoreObject, StoreValue, ROOT_MUTATION, ROOT_QUERY, ROOT_SUBSCRIPTION},
};
