use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;

/// Which layers currently filter against which materialized views.
///
/// One instance is shared by every filter operation of a process. A view may
/// be dropped only once its reference set is empty.
#[derive(Debug, Default)]
pub struct MvReferenceTracker {
    references: Mutex<HashMap<String, HashSet<String>>>,
}

impl MvReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of layers referencing the view afterwards.
    pub fn add_reference(&self, mv_name: &str, layer_id: &str) -> usize {
        let mut references = self.references.lock();
        let layers = references.entry(mv_name.to_string()).or_default();
        layers.insert(layer_id.to_string());
        tracing::debug!(mv_name, layer_id, count = layers.len(), "mv reference added");
        layers.len()
    }

    /// Returns `true` when no layer references the view anymore.
    pub fn remove_reference(&self, mv_name: &str, layer_id: &str) -> bool {
        let mut references = self.references.lock();
        let Some(layers) = references.get_mut(mv_name) else {
            return true;
        };
        layers.remove(layer_id);
        if layers.is_empty() {
            references.remove(mv_name);
            tracing::debug!(mv_name, layer_id, "last mv reference removed");
            true
        } else {
            false
        }
    }

    /// Drops every reference held by `layer_id`; returns the views that became
    /// unreferenced.
    pub fn remove_all_references_for_layer(&self, layer_id: &str) -> BTreeSet<String> {
        let mut references = self.references.lock();
        let mut droppable = BTreeSet::new();
        references.retain(|mv_name, layers| {
            if layers.remove(layer_id) && layers.is_empty() {
                droppable.insert(mv_name.clone());
                return false;
            }
            true
        });
        if !droppable.is_empty() {
            tracing::debug!(layer_id, views = droppable.len(), "layer released mv references");
        }
        droppable
    }

    pub fn is_referenced(&self, mv_name: &str) -> bool {
        self.references
            .lock()
            .get(mv_name)
            .is_some_and(|layers| !layers.is_empty())
    }

    pub fn references_for(&self, mv_name: &str) -> BTreeSet<String> {
        self.references
            .lock()
            .get(mv_name)
            .map(|layers| layers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Views `layer_id` currently references.
    pub fn views_for_layer(&self, layer_id: &str) -> BTreeSet<String> {
        self.references
            .lock()
            .iter()
            .filter(|(_, layers)| layers.contains(layer_id))
            .map(|(mv_name, _)| mv_name.clone())
            .collect()
    }

    pub fn tracked_views(&self) -> BTreeSet<String> {
        self.references.lock().keys().cloned().collect()
    }

    /// Forgets everything; returns every view that was tracked.
    pub fn clear_all(&self) -> BTreeSet<String> {
        let mut references = self.references.lock();
        references.drain().map(|(mv_name, _)| mv_name).collect()
    }
}
