//! Folder API endpoints.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{Document, Folder};
use crate::error::ServiceResult;

use super::documents::read_upload;
use super::{Actor, AppState};

/// Body for creating or renaming a folder
#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    pub name: String,
}

pub async fn list_folders_handler(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<Vec<Folder>>> {
    Ok(Json(state.service.list_folders()?))
}

pub async fn create_folder_handler(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(request): Json<FolderRequest>,
) -> ServiceResult<(StatusCode, Json<Folder>)> {
    let folder = state.service.create_folder(&request.name, &actor)?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn get_folder_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Folder>> {
    Ok(Json(state.service.get_folder(&id)?))
}

pub async fn rename_folder_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<FolderRequest>,
) -> ServiceResult<Json<Folder>> {
    Ok(Json(state.service.rename_folder(&id, &request.name)?))
}

/// Delete an empty folder
pub async fn delete_folder_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<StatusCode> {
    state.service.delete_folder(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Complete documents in a folder, newest first
pub async fn folder_documents_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<Document>>> {
    Ok(Json(state.service.folder_documents(&id)?))
}

/// Upload a document straight into a folder
pub async fn upload_to_folder_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    actor: Option<Actor>,
    multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<Document>)> {
    // Refuse before reading the file
    state.service.get_folder(&id)?;

    let mut upload = read_upload(&state, actor, multipart).await?;
    upload.folder_id = Some(id);

    let doc = state.service.ingest(upload).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}
