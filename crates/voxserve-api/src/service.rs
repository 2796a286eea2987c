//! Catalog Service
//!
//! Orchestrates the catalog store, the access policy, and the serving
//! context registry. Every public operation validates its inputs, applies
//! policy, writes the store, and only then touches the registry - so a
//! crash mid-request always leaves the durable record ahead of the live
//! view.
//!
//! Registry effects never fail the operation: the store write is the
//! source of truth, and a context that failed to start is a logged,
//! recoverable condition (the startup rebuild reconciles).

use crate::registry::ContextRegistry;
use std::sync::Arc;
use voxserve_core::{policy, validation, CatalogError, Dataset, Identity, Result, User};
use voxserve_storage::CatalogStore;

/// A dataset registration request.
#[derive(Debug, Clone)]
pub struct NewDataset {
    /// Owner of the new record; `None` means the acting user.
    pub owner: Option<String>,
    pub name: String,
    pub description: String,
    pub path: String,
    /// Comma-separated category string; each token becomes a tag.
    pub categories: Option<String>,
    pub is_public: bool,
}

/// The orchestration layer over store + policy + registry.
///
/// Constructed once at startup and handed to every handler by reference;
/// there is no global mutable state.
pub struct CatalogService {
    store: Arc<CatalogStore>,
    registry: Arc<ContextRegistry>,
}

impl CatalogService {
    pub fn new(store: Arc<CatalogStore>, registry: Arc<ContextRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    // ========================================================================
    // Datasets
    // ========================================================================

    /// Register a dataset, tag it from its category string, and bring a
    /// serving context up for it.
    pub fn add_dataset(&self, actor: &Identity, req: NewDataset) -> Result<Dataset> {
        let owner = match req.owner.as_deref() {
            Some(owner) if owner != actor.id => {
                // Only managers deploy on behalf of other users
                policy::ensure_manager(actor)?;
                owner
            }
            Some(owner) => owner,
            None => actor.id.as_str(),
        };

        validation::validate_user_id(owner)?;
        validation::validate_dataset_name(&req.name)?;
        validation::validate_content_path(&req.path)?;

        let id = self.store.create_dataset(
            owner,
            req.name.trim(),
            &req.description,
            &req.path,
            req.is_public,
        )?;

        if let Some(categories) = req.categories.as_deref() {
            for tag in validation::split_categories(categories) {
                // Tokens that fail validation are tolerated, not fatal
                if let Err(e) = validation::validate_tag(&tag) {
                    tracing::warn!(dataset_id = id, tag = %tag, error = %e, "Skipping invalid tag");
                    continue;
                }
                if let Err(e) = self.store.add_tag(id, &tag) {
                    tracing::error!(dataset_id = id, tag = %tag, error = %e, "Failed to add tag");
                }
            }
        }

        let dataset = self.store.get_dataset(id)?;
        self.registry.on_create(dataset.clone());
        tracing::info!(dataset_id = id, owner = %owner, name = %dataset.name, "Dataset added");
        Ok(dataset)
    }

    /// Remove a dataset: cascade-delete its store records, then stop and
    /// unregister its serving context.
    pub fn remove_dataset(&self, actor: &Identity, id: i64) -> Result<()> {
        let dataset = self.store.get_dataset(id)?;
        policy::ensure_can_mutate_dataset(actor, &dataset)?;

        self.store.remove_dataset(id)?;
        if !self.registry.on_remove(id) {
            tracing::warn!(dataset_id = id, "No serving context was registered for removed dataset");
        }
        tracing::info!(dataset_id = id, "Dataset removed");
        Ok(())
    }

    /// Change a dataset's name and/or description.
    ///
    /// The store is updated first; the registry then gets a fresh
    /// snapshot (no restart - metadata does not affect routing).
    pub fn update_metadata(
        &self,
        actor: &Identity,
        id: i64,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Dataset> {
        let mut dataset = self.store.get_dataset(id)?;
        policy::ensure_can_mutate_dataset(actor, &dataset)?;

        if let Some(name) = name {
            validation::validate_dataset_name(&name)?;
            dataset.name = name.trim().to_string();
        }
        if let Some(description) = description {
            dataset.description = description;
        }

        self.store.update_dataset(&dataset)?;

        let latest = self.store.get_dataset(id)?;
        self.registry.refresh(latest.clone());
        Ok(latest)
    }

    /// Toggle a dataset's visibility.
    ///
    /// The serving context is stopped and recreated under the other
    /// routing subtree, carrying tags and metadata across the toggle.
    pub fn set_visibility(&self, actor: &Identity, id: i64, is_public: bool) -> Result<Dataset> {
        let mut dataset = self.store.get_dataset(id)?;
        policy::ensure_can_mutate_dataset(actor, &dataset)?;

        if dataset.is_public == is_public {
            return Ok(dataset);
        }

        dataset.is_public = is_public;
        self.store.update_dataset(&dataset)?;

        let latest = self.store.get_dataset(id)?;
        self.registry.on_visibility_change(latest.clone());
        tracing::info!(dataset_id = id, public = is_public, "Dataset visibility changed");
        Ok(latest)
    }

    /// Associate a tag with a dataset.
    pub fn add_tag(&self, actor: &Identity, id: i64, tag: &str) -> Result<Dataset> {
        let dataset = self.store.get_dataset(id)?;
        policy::ensure_can_mutate_dataset(actor, &dataset)?;
        validation::validate_tag(tag)?;

        self.store.add_tag(id, tag)?;

        let latest = self.store.get_dataset(id)?;
        self.registry.refresh(latest.clone());
        Ok(latest)
    }

    /// Remove a tag from a dataset.
    pub fn remove_tag(&self, actor: &Identity, id: i64, tag: &str) -> Result<Dataset> {
        let dataset = self.store.get_dataset(id)?;
        policy::ensure_can_mutate_dataset(actor, &dataset)?;

        self.store.remove_tag(id, tag)?;

        let latest = self.store.get_dataset(id)?;
        self.registry.refresh(latest.clone());
        Ok(latest)
    }

    /// Grant (or refresh) a share on a dataset.
    pub fn grant_share(
        &self,
        actor: &Identity,
        id: i64,
        user_id: &str,
        can_read: bool,
        can_write: bool,
    ) -> Result<()> {
        validation::validate_user_id(user_id)?;
        let dataset = self.store.get_dataset(id)?;
        policy::ensure_share_allowed(actor, &dataset, user_id)?;

        self.store.grant_share(id, user_id, can_read, can_write)?;

        let latest = self.store.get_dataset(id)?;
        self.registry.refresh(latest);
        tracing::info!(dataset_id = id, user = %user_id, "Share granted");
        Ok(())
    }

    /// Revoke a share.
    pub fn revoke_share(&self, actor: &Identity, id: i64, user_id: &str) -> Result<()> {
        validation::validate_user_id(user_id)?;
        let dataset = self.store.get_dataset(id)?;
        policy::ensure_share_allowed(actor, &dataset, user_id)?;

        self.store.revoke_share(id, user_id)?;

        let latest = self.store.get_dataset(id)?;
        self.registry.refresh(latest);
        tracing::info!(dataset_id = id, user = %user_id, "Share revoked");
        Ok(())
    }

    /// Fetch a dataset the actor is allowed to read.
    pub fn get_dataset_for(&self, actor: &Identity, id: i64) -> Result<Dataset> {
        let dataset = self.store.get_dataset(id)?;
        policy::ensure_can_read_dataset(actor, &dataset)?;
        Ok(dataset)
    }

    /// Datasets the actor owns.
    pub fn list_owned(&self, actor: &Identity) -> Result<Vec<Dataset>> {
        self.store.list_owned(&actor.id)
    }

    /// Datasets shared with the actor.
    pub fn list_shared(&self, actor: &Identity) -> Result<Vec<Dataset>> {
        self.store.list_shared(&actor.id)
    }

    /// All public datasets.
    pub fn list_public(&self) -> Result<Vec<Dataset>> {
        self.store.list_public()
    }

    /// Public datasets carrying the given tag.
    pub fn list_public_by_tag(&self, tag: &str) -> Result<Vec<Dataset>> {
        self.store.list_public_by_tag(tag)
    }

    /// All private datasets (manager view).
    pub fn list_private(&self, actor: &Identity) -> Result<Vec<Dataset>> {
        policy::ensure_manager(actor)?;
        self.store.list_private()
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Create (or refresh) a user. Manager only.
    pub fn create_user(
        &self,
        actor: &Identity,
        id: &str,
        name: &str,
        credential_hash: &str,
        is_manager: bool,
    ) -> Result<()> {
        policy::ensure_manager(actor)?;
        validation::validate_user_id(id)?;
        if name.trim().is_empty() {
            return Err(CatalogError::InvalidInput("user name is empty".to_string()));
        }
        if credential_hash.is_empty() {
            return Err(CatalogError::InvalidInput("credential is empty".to_string()));
        }

        self.store.create_user(id, name, credential_hash, is_manager)?;
        tracing::info!(user = %id, is_manager, "User created");
        Ok(())
    }

    /// Remove a user. Manager only; managers themselves cannot be removed.
    pub fn remove_user(&self, actor: &Identity, id: &str) -> Result<()> {
        policy::ensure_manager(actor)?;
        self.store.remove_user(id)?;
        tracing::info!(user = %id, "User removed");
        Ok(())
    }

    /// Rename a user. Manager only.
    pub fn rename_user(&self, actor: &Identity, id: &str, name: &str) -> Result<()> {
        policy::ensure_manager(actor)?;
        if name.trim().is_empty() {
            return Err(CatalogError::InvalidInput("user name is empty".to_string()));
        }
        self.store.update_user_name(id, name)
    }

    /// Change a user's manager flag. Manager only.
    pub fn set_user_manager(&self, actor: &Identity, id: &str, is_manager: bool) -> Result<()> {
        policy::ensure_manager(actor)?;
        self.store.set_user_manager(id, is_manager)
    }

    /// Replace a user's credential. Self-service, or manager override.
    pub fn update_password(
        &self,
        actor: &Identity,
        target_id: &str,
        credential_hash: &str,
    ) -> Result<()> {
        if actor.id != target_id {
            policy::ensure_manager(actor)?;
        }
        if credential_hash.is_empty() {
            return Err(CatalogError::InvalidInput("credential is empty".to_string()));
        }
        self.store.update_user_password(target_id, credential_hash)
    }

    /// All users. Manager only.
    pub fn list_users(&self, actor: &Identity) -> Result<Vec<User>> {
        policy::ensure_manager(actor)?;
        self.store.list_users()
    }
}
