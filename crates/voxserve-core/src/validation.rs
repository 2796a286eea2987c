//! Input validation for the voxserve catalog
//!
//! Validation happens before any store call; an `InvalidInput` failure
//! means no mutation was attempted.

use crate::{CatalogError, Result};

/// Maximum length for user ids
pub const MAX_USER_ID_LEN: usize = 32;

/// Maximum length for dataset names and tag titles
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length for content paths and descriptions
pub const MAX_PATH_LEN: usize = 4096;

/// Validate a user id
///
/// Requirements:
/// - Not empty
/// - <= 32 characters
/// - Alphanumeric, underscore, hyphen, dot only
pub fn validate_user_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CatalogError::InvalidInput(
            "user id cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_USER_ID_LEN {
        return Err(CatalogError::InvalidInput(format!(
            "user id too long: {} > {} characters",
            id.len(),
            MAX_USER_ID_LEN
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(CatalogError::InvalidInput(
            "user id contains invalid characters (allowed: alphanumeric, _, -, .)".to_string(),
        ));
    }

    Ok(())
}

/// Validate a dataset name
///
/// Names may contain spaces and most printable characters; only control
/// characters and over-long names are rejected.
pub fn validate_dataset_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CatalogError::InvalidInput(
            "dataset name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(CatalogError::InvalidInput(format!(
            "dataset name too long: {} > {} characters",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(CatalogError::InvalidInput(
            "dataset name contains control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a tag title
///
/// Commas are excluded because they separate tags in category strings.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(CatalogError::InvalidInput(
            "tag cannot be empty".to_string(),
        ));
    }

    if tag.len() > MAX_NAME_LEN {
        return Err(CatalogError::InvalidInput(format!(
            "tag too long: {} > {} characters",
            tag.len(),
            MAX_NAME_LEN
        )));
    }

    if tag.contains(',') || tag.chars().any(|c| c.is_control()) {
        return Err(CatalogError::InvalidInput(
            "tag contains invalid characters (commas and control characters are not allowed)"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate a dataset content path
///
/// Prevents:
/// - Empty paths
/// - Excessively long paths
/// - `..` traversal components
/// - Null bytes
pub fn validate_content_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(CatalogError::InvalidInput(
            "content path cannot be empty".to_string(),
        ));
    }

    if path.len() > MAX_PATH_LEN {
        return Err(CatalogError::InvalidInput(format!(
            "content path too long: {} > {} characters",
            path.len(),
            MAX_PATH_LEN
        )));
    }

    if path.contains("..") {
        return Err(CatalogError::InvalidInput(
            "content path contains traversal pattern (..)".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(CatalogError::InvalidInput(
            "content path contains null byte".to_string(),
        ));
    }

    Ok(())
}

/// Split a comma-separated category string into tag titles.
///
/// Tokens are trimmed; blank tokens are dropped so `"a,,b, "` yields two
/// tags, not four.
pub fn split_categories(categories: &str) -> Vec<String> {
    categories
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
