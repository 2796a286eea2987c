//! Authentication collaborator.
//!
//! Resolves HTTP basic credentials into the capability view the access
//! policy consumes: `{ id, is_manager }`. Nothing framework-specific
//! survives past this module. bcrypt verification runs on the blocking
//! pool.

use crate::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use std::sync::Arc;
use voxserve_core::{CatalogError, Identity, Result};
use voxserve_storage::CatalogStore;

const DEFAULT_BCRYPT_COST: u32 = 12;

/// Verifies credentials against the catalog's stored hashes.
pub struct Authenticator {
    store: Arc<CatalogStore>,
    bcrypt_cost: u32,
}

impl Authenticator {
    /// Reads `VOXSERVE_BCRYPT_COST` (default: 12).
    pub fn new(store: Arc<CatalogStore>) -> Self {
        let bcrypt_cost = std::env::var("VOXSERVE_BCRYPT_COST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BCRYPT_COST);
        Self { store, bcrypt_cost }
    }

    /// Hash a plaintext credential for storage.
    pub async fn hash_credential(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| CatalogError::Other(format!("task join error: {}", e)))?
            .map_err(|e| CatalogError::Other(format!("credential hashing failed: {}", e)))
    }

    /// Verify credentials and produce the caller's identity.
    ///
    /// Unknown users and wrong passwords are indistinguishable to the
    /// caller.
    pub async fn authenticate(&self, id: &str, password: &str) -> Result<Identity> {
        if id.is_empty() || password.is_empty() {
            return Err(CatalogError::Forbidden("missing credentials".to_string()));
        }

        let hash = match self.store.credential_hash(id) {
            Ok(hash) => hash,
            Err(CatalogError::NotFound(_)) => {
                return Err(CatalogError::Forbidden("invalid credentials".to_string()))
            }
            Err(e) => return Err(e),
        };

        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| CatalogError::Other(format!("task join error: {}", e)))?
            .map_err(|e| CatalogError::Other(format!("credential check failed: {}", e)))?;

        if !verified {
            return Err(CatalogError::Forbidden("invalid credentials".to_string()));
        }

        let user = self.store.get_user(id)?;
        Ok(Identity {
            id: user.id,
            is_manager: user.is_manager,
        })
    }
}

/// Decode an `Authorization: Basic ...` header into (id, password).
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, password) = decoded.split_once(':')?;
    Some((id.to_string(), password.to_string()))
}

async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity> {
    let (id, password) = basic_credentials(headers)
        .ok_or_else(|| CatalogError::Forbidden("missing credentials".to_string()))?;
    state.auth.authenticate(&id, &password).await
}

/// Middleware for the private domain: any authenticated user.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match resolve_identity(&state, req.headers()).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected unauthenticated request");
            unauthorized()
        }
    }
}

/// Middleware for the manager context: manager role required.
pub async fn require_manager(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match resolve_identity(&state, req.headers()).await {
        Ok(identity) if identity.is_manager => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Ok(identity) => {
            tracing::warn!(user = %identity.id, "Denied manager context to non-manager");
            forbidden()
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected unauthenticated manager request");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"voxserve\"")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"error":"authentication required"}"#))
        .expect("static response")
}

fn forbidden() -> Response {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"error":"manager role required"}"#))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    fn store_with_user(password: &str, is_manager: bool) -> (TempDir, Arc<CatalogStore>) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(CatalogStore::open(temp.path().join("catalog.db")).unwrap());
        // Low cost keeps the test fast
        let hash = bcrypt::hash(password, 4).unwrap();
        store.create_user("u1", "User One", &hash, is_manager).unwrap();
        (temp, store)
    }

    #[test]
    fn decodes_basic_credentials() {
        let mut headers = HeaderMap::new();
        // "u1:secret"
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dTE6c2VjcmV0"),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("u1".to_string(), "secret".to_string()))
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        assert_eq!(basic_credentials(&headers), None);
    }

    #[tokio::test]
    async fn authenticate_accepts_valid_credentials() {
        let (_t, store) = store_with_user("secret", true);
        let auth = Authenticator::new(store);

        let identity = auth.authenticate("u1", "secret").await.unwrap();
        assert_eq!(identity.id, "u1");
        assert!(identity.is_manager);
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_password_and_unknown_user() {
        let (_t, store) = store_with_user("secret", false);
        let auth = Authenticator::new(store);

        assert!(matches!(
            auth.authenticate("u1", "wrong").await,
            Err(CatalogError::Forbidden(_))
        ));
        assert!(matches!(
            auth.authenticate("ghost", "secret").await,
            Err(CatalogError::Forbidden(_))
        ));
        assert!(matches!(
            auth.authenticate("", "").await,
            Err(CatalogError::Forbidden(_))
        ));
    }
}
