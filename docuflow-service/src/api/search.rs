//! Search API endpoints.
//!
//! Metadata search over complete documents.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Document;
use crate::error::ServiceResult;
use crate::search::{SearchFilters, TitleMatch};

use super::AppState;

/// Search query parameters
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Keyword matched against title, tags, uploader, and id
    pub q: Option<String>,
    pub title: Option<String>,
    /// Match `title` exactly instead of as a substring
    #[serde(default)]
    pub title_exact: bool,
    pub tag: Option<String>,
    pub uploader: Option<String>,
    /// Folder id
    pub folder: Option<String>,
}

impl SearchParams {
    fn into_filters(self) -> SearchFilters {
        let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let title_exact = self.title_exact;

        SearchFilters {
            title: non_blank(self.title).map(|title| {
                if title_exact {
                    TitleMatch::Exact(title)
                } else {
                    TitleMatch::Contains(title)
                }
            }),
            tag: non_blank(self.tag),
            uploader: non_blank(self.uploader),
            keyword: non_blank(self.q),
            folder: non_blank(self.folder),
        }
    }
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<Document>,
}

/// Find documents matching every supplied filter
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ServiceResult<Json<SearchResponse>> {
    let results = state.service.search(&params.into_filters())?;
    Ok(Json(SearchResponse {
        total: results.len(),
        results,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::api::tests::{app, body_json};
    use crate::service::tests::docx_upload;

    #[test]
    fn test_params_to_filters() {
        let filters = SearchParams {
            q: Some("  ".to_string()),
            title: Some("Report".to_string()),
            title_exact: true,
            tag: Some("finance".to_string()),
            uploader: None,
            folder: Some(" ".to_string()),
        }
        .into_filters();

        assert_eq!(filters.keyword, None);
        assert_eq!(filters.title, Some(TitleMatch::Exact("Report".to_string())));
        assert_eq!(filters.tag.as_deref(), Some("finance"));
        assert_eq!(filters.folder, None);

        let filters = SearchParams {
            title: Some("Rep".to_string()),
            ..Default::default()
        }
        .into_filters();
        assert_eq!(filters.title, Some(TitleMatch::Contains("Rep".to_string())));
    }

    #[tokio::test]
    async fn test_search_by_tag_over_http() {
        let (app, h) = app();
        let mut upload = docx_upload("Tagged", "alice");
        upload.tags = vec!["Legal".to_string()];
        let tagged = h.service.ingest(upload).await.unwrap();
        h.service.ingest(docx_upload("Untagged", "alice")).await.unwrap();

        let response = app
            .oneshot(
                Request::get("/api/search?tag=legal")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["results"][0]["id"], tagged.id.as_str());
    }

    #[tokio::test]
    async fn test_empty_query_lists_everything() {
        let (app, h) = app();
        h.service.ingest(docx_upload("One", "alice")).await.unwrap();
        h.service.ingest(docx_upload("Two", "bob")).await.unwrap();

        let response = app
            .oneshot(Request::get("/api/search").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["total"], 2);
    }
}
