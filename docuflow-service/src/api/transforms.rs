//! Transform API endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ServiceResult;
use crate::service::TransformRequest;
use crate::transform::TransformResult;

use super::{Actor, AppState};

#[derive(Serialize)]
pub struct CancelResponse {
    pub request_id: String,
    /// False when no transform with this id was running
    pub cancelled: bool,
}

/// Run a transform against a document
pub async fn transform_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Actor(actor): Actor,
    Json(request): Json<TransformRequest>,
) -> ServiceResult<Json<TransformResult>> {
    Ok(Json(
        state
            .service
            .transform_document(&id, &actor, request)
            .await?,
    ))
}

/// Cancel an in-flight transform by its caller-chosen request id
pub async fn cancel_transform_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.service.cancel_transform(&request_id);
    Json(CancelResponse {
        request_id,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use crate::api::ACTOR_HEADER;
    use crate::api::tests::{app, body_json};
    use crate::service::tests::docx_upload;

    fn transform_request(doc_id: &str, body: &str) -> Request<Body> {
        Request::post(format!("/api/documents/{doc_id}/transform"))
            .header(header::CONTENT_TYPE, "application/json")
            .header(ACTOR_HEADER, "frank")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_summarize_over_http() {
        let (app, h) = app();
        let doc = h
            .service
            .ingest(docx_upload("A long story", "alice"))
            .await
            .unwrap();

        let response = app
            .oneshot(transform_request(&doc.id, r#"{"operation":"summarize"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["document_id"], doc.id.as_str());
        assert_eq!(body["operation"], "summarize");
        assert_eq!(body["output"]["text"], "ok");
    }

    #[tokio::test]
    async fn test_missing_parameter_names_operation() {
        let (app, h) = app();
        let doc = h.service.ingest(docx_upload("Body", "alice")).await.unwrap();

        let response = app
            .oneshot(transform_request(&doc.id, r#"{"operation":"translate"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "invalid_parameters");
        assert_eq!(body["operation"], "translate");
    }

    #[tokio::test]
    async fn test_transform_on_unknown_document_conflicts() {
        let (app, _h) = app();
        let response = app
            .oneshot(transform_request(
                "ghost",
                r#"{"operation":"answer","question":"Why?"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "document_not_ready");
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let (app, _h) = app();
        let response = app
            .oneshot(
                Request::delete("/api/transforms/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cancelled"], false);
    }
}
