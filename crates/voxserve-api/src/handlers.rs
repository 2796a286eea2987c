//! HTTP surface of the catalog.
//!
//! Three route groups, mirroring the routing subtrees:
//! - `/public/*` - anonymous listings and descriptors of public datasets
//! - `/private/*` - per-user catalog operations, basic auth required
//! - `/manager/*` - admin console, manager role required
//!
//! Handlers stay thin: decode, call the catalog service, encode. All
//! policy and ordering lives in the service layer.

use crate::service::NewDataset;
use crate::{auth, health, sampler, AppState};
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use voxserve_core::{context, CatalogError, Dataset, Identity, User};

// ============================================================================
// Wire types
// ============================================================================

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Dataset response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub path: String,
    pub owner: String,
    pub public: bool,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_users: Option<Vec<String>>,
    pub url: String,
    pub updated_at: String,
}

impl DatasetResponse {
    fn from_dataset(ds: &Dataset, with_shares: bool) -> Self {
        Self {
            id: ds.id,
            name: ds.name.clone(),
            description: ds.description.clone(),
            path: ds.path.clone(),
            owner: ds.owner_id.clone(),
            public: ds.is_public,
            tags: ds.tags.iter().cloned().collect(),
            shared_users: with_shares.then(|| ds.shared_users.iter().cloned().collect()),
            url: ds.serving_url(),
            updated_at: ds.updated_at.to_rfc3339(),
        }
    }
}

/// Descriptor served at a dataset's context path.
#[derive(Debug, Serialize, Deserialize)]
pub struct DescriptorResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub tags: String,
    pub size_bytes: u64,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub manager: bool,
    pub timestamp: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            manager: user.is_manager,
            timestamp: user.updated_at.to_rfc3339(),
        }
    }
}

/// Listing wrapper consumed by the console tables.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct UserDatasetsResponse {
    pub owned: Vec<DatasetResponse>,
    pub shared: Vec<DatasetResponse>,
}

#[derive(Debug, Deserialize)]
pub struct AddDatasetRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Location of the dataset content
    pub file: String,
    /// Comma-separated category string
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub public: bool,
    /// Deploy on behalf of this user (manager only)
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDatasetRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub public: bool,
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub user_id: String,
    #[serde(default = "default_true")]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    pub id: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub manager: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub manager: Option<bool>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct TrafficQuery {
    /// Window length in minutes, clamped to the buffer capacity.
    pub minutes: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ServerInfoResponse {
    pub bytes_sent: String,
    pub bytes_sent_raw: u64,
    pub open_connections: i64,
    pub peak_connections: i64,
    pub requests_total: u64,
    pub dataset_count: usize,
    pub datasets_size: String,
    pub datasets_size_raw: u64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error_response(err: CatalogError) -> ApiError {
    let status = match &err {
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::Forbidden(_) => StatusCode::FORBIDDEN,
        CatalogError::Conflict(_) => StatusCode::CONFLICT,
        CatalogError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CatalogError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        CatalogError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn not_found(message: String) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse { error: message }),
    )
}

// ============================================================================
// Router
// ============================================================================

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let manager = Router::new()
        .route(
            "/datasets",
            get(manager_datasets).post(manager_add_dataset),
        )
        .route("/datasets/private", get(manager_private_datasets))
        .route(
            "/datasets/:id",
            delete(manager_remove_dataset).patch(manager_update_dataset),
        )
        .route("/datasets/:id/active", put(manager_set_active))
        .route("/traffic", get(manager_traffic))
        .route("/users", get(manager_users).post(manager_add_user))
        .route(
            "/users/:id",
            delete(manager_remove_user).patch(manager_update_user),
        )
        .route("/info", get(manager_info))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_manager,
        ));

    let private = Router::new()
        .route("/user/datasets", get(my_datasets).post(user_add_dataset))
        .route(
            "/user/datasets/:id",
            delete(user_remove_dataset).patch(user_update_dataset),
        )
        .route("/user/datasets/:id/visibility", put(user_set_visibility))
        .route("/user/datasets/:id/tags", axum::routing::post(user_add_tag))
        .route("/user/datasets/:id/tags/:tag", delete(user_remove_tag))
        .route(
            "/user/datasets/:id/shares",
            axum::routing::post(user_grant_share),
        )
        .route(
            "/user/datasets/:id/shares/:user_id",
            delete(user_revoke_share),
        )
        .route("/user/password", put(user_change_password))
        .route("/dataset/id/:id", get(private_descriptor))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_user,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/public/datasets", get(list_public))
        .route(
            &format!("/{}/:tag", context::PUBLIC_TAG_CONTEXT),
            get(list_public_by_tag),
        )
        .route(
            &format!("/{}/id/:id", context::PUBLIC_DATASET_CONTEXT),
            get(public_descriptor),
        )
        .nest(&format!("/{}", context::MANAGER_CONTEXT), manager)
        .nest(&format!("/{}", context::PRIVATE_DOMAIN), private)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_traffic,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Feed the byte counter and connection statistics.
///
/// Body sizes come from Content-Length; streaming responses without a
/// declared length are not counted.
async fn track_traffic(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.stats.request_started();
    let response = next.run(req).await;
    if let Some(len) = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        state.counter.add(len);
    }
    state.stats.request_finished();
    response
}

// ============================================================================
// Public handlers
// ============================================================================

async fn list_public(State(state): State<AppState>) -> ApiResult<Vec<DatasetResponse>> {
    let datasets = state.service.list_public().map_err(error_response)?;
    Ok(Json(
        datasets
            .iter()
            .map(|d| DatasetResponse::from_dataset(d, false))
            .collect(),
    ))
}

async fn list_public_by_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> ApiResult<Vec<DatasetResponse>> {
    let datasets = state
        .service
        .list_public_by_tag(&tag)
        .map_err(error_response)?;
    Ok(Json(
        datasets
            .iter()
            .map(|d| DatasetResponse::from_dataset(d, false))
            .collect(),
    ))
}

async fn public_descriptor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<DescriptorResponse> {
    let snapshot = state
        .service
        .registry()
        .get(id)
        .filter(|s| s.is_public && s.active)
        .ok_or_else(|| not_found(format!("no active public dataset {}", id)))?;

    Ok(Json(DescriptorResponse {
        id: snapshot.id,
        name: snapshot.name,
        description: snapshot.description,
        owner: snapshot.owner,
        tags: snapshot.tags,
        size_bytes: snapshot.size_bytes,
        url: snapshot.context_path.trim_end_matches('/').to_string(),
    }))
}

// ============================================================================
// Private (per-user) handlers
// ============================================================================

async fn my_datasets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<UserDatasetsResponse> {
    let owned = state
        .service
        .list_owned(&identity)
        .map_err(error_response)?;
    let shared = state
        .service
        .list_shared(&identity)
        .map_err(error_response)?;

    Ok(Json(UserDatasetsResponse {
        owned: owned
            .iter()
            .map(|d| DatasetResponse::from_dataset(d, true))
            .collect(),
        shared: shared
            .iter()
            .map(|d| DatasetResponse::from_dataset(d, false))
            .collect(),
    }))
}

async fn user_add_dataset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddDatasetRequest>,
) -> Result<(StatusCode, Json<DatasetResponse>), ApiError> {
    let dataset = state
        .service
        .add_dataset(
            &identity,
            NewDataset {
                owner: req.owner,
                name: req.name,
                description: req.description,
                path: req.file,
                categories: req.tags,
                is_public: req.public,
            },
        )
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(DatasetResponse::from_dataset(&dataset, true)),
    ))
}

async fn user_remove_dataset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .remove_dataset(&identity, id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn user_update_dataset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateDatasetRequest>,
) -> ApiResult<DatasetResponse> {
    let dataset = state
        .service
        .update_metadata(&identity, id, req.name, req.description)
        .map_err(error_response)?;
    Ok(Json(DatasetResponse::from_dataset(&dataset, true)))
}

async fn user_set_visibility(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<VisibilityRequest>,
) -> ApiResult<DatasetResponse> {
    let dataset = state
        .service
        .set_visibility(&identity, id, req.public)
        .map_err(error_response)?;
    Ok(Json(DatasetResponse::from_dataset(&dataset, true)))
}

async fn user_add_tag(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<TagRequest>,
) -> ApiResult<DatasetResponse> {
    let dataset = state
        .service
        .add_tag(&identity, id, &req.tag)
        .map_err(error_response)?;
    Ok(Json(DatasetResponse::from_dataset(&dataset, true)))
}

async fn user_remove_tag(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((id, tag)): Path<(i64, String)>,
) -> ApiResult<DatasetResponse> {
    let dataset = state
        .service
        .remove_tag(&identity, id, &tag)
        .map_err(error_response)?;
    Ok(Json(DatasetResponse::from_dataset(&dataset, true)))
}

async fn user_grant_share(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<ShareRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .grant_share(&identity, id, &req.user_id, req.can_read, req.can_write)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn user_revoke_share(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((id, user_id)): Path<(i64, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .revoke_share(&identity, id, &user_id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn user_change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<PasswordRequest>,
) -> Result<StatusCode, ApiError> {
    if req.password.is_empty() {
        return Err(error_response(CatalogError::InvalidInput(
            "password is empty".to_string(),
        )));
    }
    let hash = state
        .auth
        .hash_credential(&req.password)
        .await
        .map_err(error_response)?;
    state
        .service
        .update_password(&identity, &identity.id, &hash)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn private_descriptor(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<DescriptorResponse> {
    // Read policy first, context activity second
    state
        .service
        .get_dataset_for(&identity, id)
        .map_err(error_response)?;

    let snapshot = state
        .service
        .registry()
        .get(id)
        .filter(|s| s.active)
        .ok_or_else(|| not_found(format!("no active dataset {}", id)))?;

    Ok(Json(DescriptorResponse {
        id: snapshot.id,
        name: snapshot.name,
        description: snapshot.description,
        owner: snapshot.owner,
        tags: snapshot.tags,
        size_bytes: snapshot.size_bytes,
        url: snapshot.context_path.trim_end_matches('/').to_string(),
    }))
}

// ============================================================================
// Manager handlers
// ============================================================================

async fn manager_datasets(
    State(state): State<AppState>,
) -> Json<DataEnvelope<crate::registry::ContextSnapshot>> {
    Json(DataEnvelope {
        data: state.service.registry().snapshot(),
    })
}

async fn manager_private_datasets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Vec<DatasetResponse>> {
    let datasets = state
        .service
        .list_private(&identity)
        .map_err(error_response)?;
    Ok(Json(
        datasets
            .iter()
            .map(|d| DatasetResponse::from_dataset(d, false))
            .collect(),
    ))
}

async fn manager_add_dataset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddDatasetRequest>,
) -> Result<(StatusCode, Json<DatasetResponse>), ApiError> {
    user_add_dataset(State(state), Extension(identity), Json(req)).await
}

async fn manager_remove_dataset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .remove_dataset(&identity, id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn manager_update_dataset(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateDatasetRequest>,
) -> ApiResult<DatasetResponse> {
    let dataset = state
        .service
        .update_metadata(&identity, id, req.name, req.description)
        .map_err(error_response)?;
    Ok(Json(DatasetResponse::from_dataset(&dataset, true)))
}

async fn manager_set_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ActivateRequest>,
) -> Result<StatusCode, ApiError> {
    if state.service.registry().set_active(id, req.active) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no serving context for dataset {}", id)))
    }
}

async fn manager_traffic(
    State(state): State<AppState>,
    Query(query): Query<TrafficQuery>,
) -> Json<Vec<u64>> {
    let minutes = query.minutes.unwrap_or(60);
    Json(state.sampler.window_minutes(minutes))
}

async fn manager_users(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<DataEnvelope<UserResponse>> {
    let users = state.service.list_users(&identity).map_err(error_response)?;
    Ok(Json(DataEnvelope {
        data: users.iter().map(UserResponse::from).collect(),
    }))
}

async fn manager_add_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddUserRequest>,
) -> Result<StatusCode, ApiError> {
    if req.password.is_empty() {
        return Err(error_response(CatalogError::InvalidInput(
            "password is empty".to_string(),
        )));
    }
    let hash = state
        .auth
        .hash_credential(&req.password)
        .await
        .map_err(error_response)?;
    state
        .service
        .create_user(&identity, &req.id, &req.name, &hash, req.manager)
        .map_err(error_response)?;
    Ok(StatusCode::CREATED)
}

async fn manager_remove_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .remove_user(&identity, &id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn manager_update_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<StatusCode, ApiError> {
    if let Some(name) = req.name.as_deref() {
        state
            .service
            .rename_user(&identity, &id, name)
            .map_err(error_response)?;
    }
    if let Some(manager) = req.manager {
        state
            .service
            .set_user_manager(&identity, &id, manager)
            .map_err(error_response)?;
    }
    if let Some(password) = req.password.as_deref() {
        if password.is_empty() {
            return Err(error_response(CatalogError::InvalidInput(
                "password is empty".to_string(),
            )));
        }
        let hash = state
            .auth
            .hash_credential(password)
            .await
            .map_err(error_response)?;
        state
            .service
            .update_password(&identity, &id, &hash)
            .map_err(error_response)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn manager_info(State(state): State<AppState>) -> ApiResult<ServerInfoResponse> {
    let total_bytes = state.sampler.total_bytes();
    // Count from the catalog, size from the live contexts
    let dataset_count = state
        .service
        .store()
        .count_datasets()
        .map_err(error_response)?;
    let total_size = state.service.registry().total_size();

    Ok(Json(ServerInfoResponse {
        bytes_sent: sampler::format_bytes(total_bytes),
        bytes_sent_raw: total_bytes,
        open_connections: state.stats.open_connections(),
        peak_connections: state.stats.peak_connections(),
        requests_total: state.stats.requests_total(),
        dataset_count: dataset_count as usize,
        datasets_size: sampler::format_bytes(total_size),
        datasets_size_raw: total_size,
    }))
}
