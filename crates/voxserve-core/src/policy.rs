//! Access decisions for catalog reads and mutations.
//!
//! Pure functions over (acting identity, target record). The HTTP layer
//! resolves credentials into an [`Identity`]; nothing framework-specific
//! survives past that boundary.

use crate::{CatalogError, Dataset, Result};
use serde::{Deserialize, Serialize};

/// The capability view of an authenticated caller.
///
/// The policy only ever consumes "is this id a manager" and "is this id
/// equal to X".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub is_manager: bool,
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_manager: false,
        }
    }

    pub fn manager(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_manager: true,
        }
    }
}

/// Whether the actor may mutate the dataset (update, remove, share).
///
/// Managers bypass the ownership check.
pub fn can_mutate_dataset(actor: &Identity, dataset: &Dataset) -> bool {
    actor.is_manager || actor.id == dataset.owner_id
}

/// Fail with `Forbidden` unless the actor may mutate the dataset.
pub fn ensure_can_mutate_dataset(actor: &Identity, dataset: &Dataset) -> Result<()> {
    if can_mutate_dataset(actor, dataset) {
        Ok(())
    } else {
        Err(CatalogError::Forbidden(format!(
            "user {} may not modify dataset {} owned by {}",
            actor.id, dataset.id, dataset.owner_id
        )))
    }
}

/// Whether the actor may read the dataset.
///
/// Open to the owner, to the public, and to any grant holder. The
/// per-grant read flag is recorded but not consulted here, matching the
/// listing behavior.
pub fn can_read_dataset(actor: &Identity, dataset: &Dataset) -> bool {
    dataset.is_public
        || actor.id == dataset.owner_id
        || dataset.shared_users.contains(&actor.id)
}

/// Fail with `Forbidden` unless the actor may read the dataset.
pub fn ensure_can_read_dataset(actor: &Identity, dataset: &Dataset) -> Result<()> {
    if can_read_dataset(actor, dataset) {
        Ok(())
    } else {
        Err(CatalogError::Forbidden(format!(
            "user {} may not read dataset {}",
            actor.id, dataset.id
        )))
    }
}

/// Fail with `Forbidden` unless the actor holds the manager role.
///
/// User management (create, remove, role changes) is manager-only.
pub fn ensure_manager(actor: &Identity) -> Result<()> {
    if actor.is_manager {
        Ok(())
    } else {
        Err(CatalogError::Forbidden(format!(
            "user {} lacks the manager role",
            actor.id
        )))
    }
}

/// Fail unless the actor may grant or revoke a share on the dataset for
/// the target user.
///
/// A self-share (the owner as grant target) is rejected regardless of
/// role.
pub fn ensure_share_allowed(actor: &Identity, dataset: &Dataset, target_user: &str) -> Result<()> {
    ensure_can_mutate_dataset(actor, dataset)?;

    if target_user == dataset.owner_id {
        return Err(CatalogError::Forbidden(format!(
            "owner {} cannot hold a share on their own dataset",
            dataset.owner_id
        )));
    }

    Ok(())
}
