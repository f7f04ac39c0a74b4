//! Speculative writes stacked on top of the committed store.
//!
//! Each layer holds what an optimistic mutation response would write. Reads see the committed
//! store with every layer merged over it, oldest first. Layers never touch the committed store
//! and can be dropped in any order once their mutation settles.

use std::borrow::Cow;

use crate::{document::Variables, store::Store};

#[derive(Clone, Debug, PartialEq)]
pub struct OptimisticLayer {
    pub mutation_id: String,
    pub delta: Store,
    pub variables: Variables,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptimisticLayers {
    layers: Vec<OptimisticLayer>,
}

impl OptimisticLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer on top. A layer already pushed for the same mutation is replaced where it
    /// stands.
    pub fn push(&mut self, layer: OptimisticLayer) {
        match self
            .layers
            .iter_mut()
            .find(|existing| existing.mutation_id == layer.mutation_id)
        {
            Some(existing) => {
                tracing::debug!(mutation_id = %layer.mutation_id, "replacing optimistic layer");
                *existing = layer;
            }
            None => {
                tracing::debug!(mutation_id = %layer.mutation_id, "pushing optimistic layer");
                self.layers.push(layer);
            }
        }
    }

    pub fn remove(&mut self, mutation_id: &str) -> Option<OptimisticLayer> {
        let position = self.layers.iter().position(|layer| layer.mutation_id == mutation_id)?;
        Some(self.layers.remove(position))
    }

    /// Drops the layer of a mutation whose real result was written to the committed store.
    pub fn commit(&mut self, mutation_id: &str) -> bool {
        let removed = self.remove(mutation_id).is_some();
        tracing::debug!(mutation_id, removed, "committed optimistic layer");
        removed
    }

    /// Drops the layer of a mutation that failed.
    pub fn rollback(&mut self, mutation_id: &str) -> bool {
        let removed = self.remove(mutation_id).is_some();
        tracing::debug!(mutation_id, removed, "rolled back optimistic layer");
        removed
    }

    pub fn merged_view<'a>(&self, base: &'a Store) -> Cow<'a, Store> {
        if self.layers.is_empty() {
            return Cow::Borrowed(base);
        }

        let mut view = base.clone();
        for layer in &self.layers {
            view.merge(&layer.delta);
        }

        Cow::Owned(view)
    }

    pub fn get(&self, mutation_id: &str) -> Option<&OptimisticLayer> {
        self.layers.iter().find(|layer| layer.mutation_id == mutation_id)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &OptimisticLayer> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }
}
