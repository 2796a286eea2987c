//! Serving Context Registry
//!
//! In-memory index of the currently active serving contexts, one per
//! dataset id, reconciled against catalog mutations: a context starts on
//! dataset creation, stops on removal, and is stopped-and-recreated when
//! visibility toggles (public and private datasets live under disjoint
//! routing subtrees, so subtree membership is structural, not a flag).
//!
//! The registry never raises. Failures to start or stop a context are
//! logged and leave the registry in a best-effort state, favoring
//! availability of the rest of the catalog over strict consistency of
//! the live routing tree. Within a request the catalog store is written
//! before any registry effect is attempted, so a crash between the two
//! leaves the durable record ahead of the live view; [`ContextRegistry::rebuild`]
//! reconciles at process start.

use crate::serving::{ContextFactory, ServingContext};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use voxserve_core::Dataset;

/// A registered context plus the dataset snapshot it serves.
///
/// The snapshot is owned by the registry. Metadata edits replace it via
/// [`ContextRegistry::refresh`]; there is no aliasing with rows held by
/// the store or by callers.
pub struct RegisteredContext {
    pub dataset: Dataset,
    pub handle: Arc<dyn ServingContext>,
}

/// Point-in-time view of one registered context, for the admin console.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub description: String,
    pub path: String,
    pub tags: String,
    pub active: bool,
    pub context_path: String,
    pub size_bytes: u64,
    #[serde(rename = "public")]
    pub is_public: bool,
}

/// The id-indexed registry of live serving contexts.
pub struct ContextRegistry {
    contexts: DashMap<i64, RegisteredContext>,
    factory: Arc<dyn ContextFactory>,
    // Lifecycle operations (create, remove, visibility, activation) are
    // critical sections: a concurrent add+remove for one id must not end
    // with two contexts or none after a net-zero sequence.
    lifecycle: Mutex<()>,
}

impl ContextRegistry {
    pub fn new(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            contexts: DashMap::new(),
            factory,
            lifecycle: Mutex::new(()),
        }
    }

    /// Register and start a context for a freshly created dataset.
    ///
    /// Returns whether the context is actively serving. On start failure
    /// the context stays registered but inactive.
    pub fn on_create(&self, dataset: Dataset) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.create_locked(dataset)
    }

    /// Stop and unregister the context for a removed dataset.
    ///
    /// Returns whether a context was found.
    pub fn on_remove(&self, id: i64) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove_locked(id)
    }

    /// React to a visibility toggle: stop-and-recreate under the other
    /// routing subtree.
    ///
    /// `dataset` must already carry the new visibility. If recreation
    /// fails the dataset is left with no active context even though the
    /// store row already reflects the new visibility; this window is
    /// deliberate and logged.
    pub fn on_visibility_change(&self, dataset: Dataset) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let id = dataset.id;
        let had_context = self.remove_locked(id);
        let started = self.create_locked(dataset);
        if had_context && !started {
            tracing::warn!(
                dataset_id = id,
                "Visibility change left dataset without an active context"
            );
        }
        started
    }

    /// Replace the registry's dataset snapshot after a metadata or tag
    /// change. Routing is unaffected, so the context keeps running.
    pub fn refresh(&self, dataset: Dataset) {
        if let Some(mut entry) = self.contexts.get_mut(&dataset.id) {
            entry.dataset = dataset;
        }
    }

    /// Toggle a context's activity without unregistering it.
    ///
    /// Returns whether a context with this id exists.
    pub fn set_active(&self, id: i64, active: bool) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match self.contexts.get(&id) {
            Some(entry) => {
                if active {
                    if let Err(e) = entry.handle.start() {
                        tracing::warn!(dataset_id = id, error = %e, "Failed to activate serving context");
                    }
                } else {
                    entry.handle.stop();
                }
                true
            }
            None => false,
        }
    }

    /// Whether the context for `id` is actively serving. `None` when no
    /// context is registered.
    pub fn is_active(&self, id: i64) -> Option<bool> {
        self.contexts.get(&id).map(|e| e.handle.is_active())
    }

    /// Point-in-time view of one context.
    pub fn get(&self, id: i64) -> Option<ContextSnapshot> {
        self.contexts.get(&id).map(|e| snapshot_of(&e))
    }

    /// Point-in-time view of all contexts, ordered by dataset id.
    pub fn snapshot(&self) -> Vec<ContextSnapshot> {
        let mut all: Vec<ContextSnapshot> =
            self.contexts.iter().map(|e| snapshot_of(&e)).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Number of registered contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Aggregate content size over all registered contexts.
    pub fn total_size(&self) -> u64 {
        self.contexts
            .iter()
            .map(|e| e.handle.dataset_size())
            .sum()
    }

    /// Startup reconciliation: rebuild one context per stored dataset.
    pub fn rebuild(&self, datasets: Vec<Dataset>) {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut started = 0usize;
        let total = datasets.len();
        for dataset in datasets {
            if self.create_locked(dataset) {
                started += 1;
            }
        }
        tracing::info!(total, started, "Rebuilt serving contexts from the catalog");
    }

    fn create_locked(&self, dataset: Dataset) -> bool {
        let id = dataset.id;
        let context_path = dataset.context_path();

        let handle = match self.factory.build(&dataset) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(dataset_id = id, error = %e, "Failed to build serving context");
                return false;
            }
        };

        if let Some(previous) = self
            .contexts
            .insert(id, RegisteredContext { dataset, handle })
        {
            // A context for this id should not exist; stop the stale one.
            previous.handle.stop();
            tracing::warn!(dataset_id = id, "Replaced a stale serving context");
        }

        let entry = match self.contexts.get(&id) {
            Some(entry) => entry,
            None => return false,
        };

        match entry.handle.start() {
            Ok(()) => {
                tracing::info!(dataset_id = id, context = %context_path, "Added serving context");
                true
            }
            Err(e) => {
                tracing::warn!(
                    dataset_id = id,
                    context = %context_path,
                    error = %e,
                    "Failed to start serving context; it stays registered but inactive"
                );
                false
            }
        }
    }

    fn remove_locked(&self, id: i64) -> bool {
        match self.contexts.remove(&id) {
            Some((_, removed)) => {
                removed.handle.stop();
                tracing::info!(dataset_id = id, "Removed serving context");
                true
            }
            None => false,
        }
    }
}

fn snapshot_of(entry: &RegisteredContext) -> ContextSnapshot {
    let tags: Vec<&str> = entry.dataset.tags.iter().map(String::as_str).collect();
    ContextSnapshot {
        id: entry.dataset.id,
        name: entry.dataset.name.clone(),
        owner: entry.dataset.owner_id.clone(),
        description: entry.dataset.description.clone(),
        path: entry.dataset.path.clone(),
        tags: tags.join(","),
        active: entry.handle.is_active(),
        context_path: entry.dataset.context_path(),
        size_bytes: entry.handle.dataset_size(),
        is_public: entry.dataset.is_public,
    }
}
