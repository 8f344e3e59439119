//! Document API endpoints.
//!
//! Handlers for upload, listing, metadata updates, deletion, artifact
//! access, and the activity log.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{ActivityEvent, Document, ImageInfo, MetadataUpdate};
use crate::error::{ServiceError, ServiceResult};
use crate::ingestion::{DocumentFormat, TextBlock};
use crate::service::UploadRequest;

use super::{Actor, AppState};

/// Activity query parameters
#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<usize>,
}

fn invalid_request(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRequest {
        message: e.to_string(),
    }
}

/// Split a comma separated tag field
fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Make a filename safe to embed in a quoted header parameter
fn header_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// List complete documents, newest first
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<Vec<Document>>> {
    Ok(Json(state.service.list_documents()?))
}

/// Upload a new document
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    actor: Option<Actor>,
    multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<Document>)> {
    let upload = read_upload(&state, actor, multipart).await?;
    let doc = state.service.ingest(upload).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// Collect the multipart upload form into an [`UploadRequest`]
pub(super) async fn read_upload(
    state: &AppState,
    actor: Option<Actor>,
    mut multipart: Multipart,
) -> ServiceResult<UploadRequest> {
    let max = state
        .service
        .runtime_config
        .dynamic()
        .limits
        .max_document_size_bytes;

    let mut file_data: Option<(Bytes, String)> = None;
    let mut title: Option<String> = None;
    let mut tags: Vec<String> = Vec::new();
    let mut uploaded_by: Option<String> = None;
    let mut format: Option<String> = None;
    let mut folder_id: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(invalid_request)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let declared = field.content_type().map(str::to_string);

                let mut buf = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(invalid_request)? {
                    let size = (buf.len() + chunk.len()) as u64;
                    if size > max {
                        return Err(ServiceError::PayloadTooLarge { size, max });
                    }
                    buf.extend_from_slice(&chunk);
                }

                // Generic part types fall back to the filename extension
                if format.is_none() {
                    format = declared.filter(|ct| DocumentFormat::parse(ct).is_ok());
                }
                file_data = Some((buf.freeze(), filename));
            }
            "title" => {
                let text = field.text().await.map_err(invalid_request)?;
                if !text.trim().is_empty() {
                    title = Some(text);
                }
            }
            "tags" => {
                tags = parse_tags(&field.text().await.map_err(invalid_request)?);
            }
            "uploaded_by" => {
                let text = field.text().await.map_err(invalid_request)?;
                if !text.trim().is_empty() {
                    uploaded_by = Some(text.trim().to_string());
                }
            }
            "format" => {
                let text = field.text().await.map_err(invalid_request)?;
                if !text.trim().is_empty() {
                    format = Some(text.trim().to_string());
                }
            }
            "folder_id" => {
                let text = field.text().await.map_err(invalid_request)?;
                if !text.trim().is_empty() {
                    folder_id = Some(text.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let (bytes, filename) = file_data.ok_or_else(|| invalid_request("missing file field"))?;
    let uploaded_by = uploaded_by
        .or(actor.map(|Actor(id)| id))
        .ok_or_else(|| invalid_request("missing uploaded_by field"))?;

    Ok(UploadRequest {
        bytes,
        filename,
        format,
        title,
        tags,
        uploaded_by,
        folder_id,
    })
}

/// Get a document's metadata
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Document>> {
    Ok(Json(state.service.get_document(&id)?))
}

/// Update a document's title and/or tags
pub async fn update_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
    Json(update): Json<MetadataUpdate>,
) -> ServiceResult<Json<Document>> {
    if update.is_empty() {
        return Err(invalid_request("nothing to update"));
    }
    Ok(Json(state.service.update_metadata(&id, &actor, update).await?))
}

/// Delete a document
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
) -> ServiceResult<StatusCode> {
    state.service.delete_document(&id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The raw uploaded file
pub async fn download_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<impl IntoResponse> {
    let (doc, bytes) = state.service.download(&id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_filename(&doc.filename)
    );

    Ok((
        [
            (header::CONTENT_TYPE, doc.format.mime_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// Canonical text blocks in document order
pub async fn text_blocks_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<TextBlock>>> {
    Ok(Json(state.service.text_blocks(&id)?))
}

/// Metadata for a document's extracted images
pub async fn list_images_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<ImageInfo>>> {
    Ok(Json(state.service.list_images(&id)?))
}

/// Bytes of one extracted image
pub async fn get_image_handler(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, usize)>,
) -> ServiceResult<impl IntoResponse> {
    let (info, data) = state.service.get_image(&id, index)?;
    Ok(([(header::CONTENT_TYPE, info.mime_type)], data))
}

/// Activity for one document, newest first
pub async fn document_activity_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActivityParams>,
) -> ServiceResult<Json<Vec<ActivityEvent>>> {
    Ok(Json(state.service.activity(Some(&id), params.limit)?))
}

/// Activity across all documents, newest first
pub async fn list_activity_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivityParams>,
) -> ServiceResult<Json<Vec<ActivityEvent>>> {
    Ok(Json(state.service.activity(None, params.limit)?))
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::api::ACTOR_HEADER;
    use crate::api::tests::{app, body_json};
    use crate::ingestion::docx::tests::{make_docx, paragraph};

    pub(crate) const BOUNDARY: &str = "docuflow-test-boundary";

    /// Encode a multipart body of text fields plus an optional file part
    pub(crate) fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, content_type, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::post("/api/documents")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    pub(crate) fn docx_bytes(text: &str) -> Vec<u8> {
        make_docx(&paragraph(text), &[], &[])
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_header_filename() {
        assert_eq!(header_filename("my \"file\".pdf"), "my _file_.pdf");
        assert_eq!(header_filename("résumé.docx"), "r_sum_.docx");
    }

    #[tokio::test]
    async fn test_upload_then_fetch() {
        let (app, _h) = app();
        let body = multipart_body(
            &[
                ("title", "Quarterly report"),
                ("tags", "finance, q3"),
                ("uploaded_by", "alice"),
            ],
            Some((
                "report.docx",
                "application/octet-stream",
                &docx_bytes("Revenue grew"),
            )),
        );

        let response = app.clone().oneshot(upload_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let doc = body_json(response).await;
        assert_eq!(doc["title"], "Quarterly report");
        assert_eq!(doc["tags"], serde_json::json!(["finance", "q3"]));
        assert_eq!(doc["uploaded_by"], "alice");
        assert_eq!(doc["status"], "complete");
        assert!(doc.get("file_path").is_none());

        let id = doc["id"].as_str().unwrap().to_string();
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/documents/{id}/text"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let blocks = body_json(response).await;
        assert_eq!(blocks[0]["text"], "Revenue grew");

        let response = app
            .oneshot(
                Request::get(format!("/api/documents/{id}/download"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.docx\""
        );
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let (app, _h) = app();
        let body = multipart_body(&[("uploaded_by", "alice")], None);

        let response = app.oneshot(upload_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "invalid_request");
    }

    #[tokio::test]
    async fn test_upload_takes_actor_header_as_uploader() {
        let (app, _h) = app();
        let body = multipart_body(
            &[],
            Some(("notes.docx", "application/octet-stream", &docx_bytes("Hi"))),
        );
        let mut request = upload_request(body);
        request
            .headers_mut()
            .insert(ACTOR_HEADER, "dave".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["uploaded_by"], "dave");
    }

    #[tokio::test]
    async fn test_unsupported_upload_reports_stage() {
        let (app, _h) = app();
        let body = multipart_body(
            &[("uploaded_by", "alice")],
            Some(("notes.txt", "text/plain", b"plain text")),
        );

        let response = app.oneshot(upload_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = body_json(response).await;
        assert_eq!(body["code"], "unsupported_format");
        assert_eq!(body["stage"], "received");
    }

    #[tokio::test]
    async fn test_update_and_delete_record_actor() {
        let (app, h) = app();
        let doc = h
            .service
            .ingest(crate::service::tests::docx_upload("Body", "alice"))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::put(format!("/api/documents/{}", doc.id))
                    .header(ACTOR_HEADER, "erin")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title":"Renamed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["title"], "Renamed");

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/documents/{}", doc.id))
                    .header(ACTOR_HEADER, "erin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::get(format!("/api/documents/{}/activity", doc.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let events = body_json(response).await;
        assert_eq!(events[0]["kind"], "deleted");
        assert_eq!(events[0]["actor_id"], "erin");
        assert_eq!(events[1]["kind"], "metadata_updated");
    }

    #[tokio::test]
    async fn test_upload_with_unknown_folder_is_not_found() {
        let (app, _h) = app();
        let body = multipart_body(
            &[("uploaded_by", "alice"), ("folder_id", "ghost")],
            Some(("notes.docx", "application/octet-stream", &docx_bytes("Hi"))),
        );

        let response = app.oneshot(upload_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], "folder_not_found");
        assert_eq!(body["stage"], "received");
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let (app, _h) = app();
        let response = app
            .oneshot(
                Request::get("/api/documents/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "document_not_found");
    }
}
