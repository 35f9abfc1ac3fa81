//! Proxy definition CRUD

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use sb_config::{ProxyDefinition, ServerDefinition};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProxyRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub servers: Vec<ServerDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProxyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub servers: Option<Vec<ServerDefinition>>,
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<ProxyDefinition>> {
    Json(state.store.list())
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateProxyRequest>,
) -> Result<(StatusCode, Json<ProxyDefinition>), ApiError> {
    let definition = state
        .store
        .create(request.name, request.description, request.servers)
        .await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProxyDefinition>, ApiError> {
    Ok(Json(state.store.get_definition(&id)?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateProxyRequest>,
) -> Result<Json<ProxyDefinition>, ApiError> {
    let definition = state
        .store
        .update(&id, request.name, request.description, request.servers)
        .await?;
    Ok(Json(definition))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
