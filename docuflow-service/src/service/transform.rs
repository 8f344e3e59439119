//! On-demand transforms of ingested documents.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::{ActivityEvent, ActivityKind, DocumentStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::service::DocumentService;
use crate::transform::{Operation, TransformParams, TransformResult};

/// A transform as requested by a caller
#[derive(Debug, Clone, Deserialize)]
pub struct TransformRequest {
    pub operation: Operation,
    #[serde(flatten)]
    pub params: TransformParams,
    /// Caller-chosen id that can later be used to cancel this transform
    #[serde(default)]
    pub request_id: Option<String>,
}

impl DocumentService {
    /// Run a transform against a completely ingested document.
    ///
    /// Transform failures never modify the document or its artifacts.
    pub async fn transform_document(
        &self,
        document_id: &str,
        actor: &str,
        request: TransformRequest,
    ) -> ServiceResult<TransformResult> {
        let ready = self
            .store
            .get(document_id)?
            .is_some_and(|doc| doc.status == DocumentStatus::Complete);
        if !ready {
            return Err(ServiceError::DocumentNotReady {
                document_id: document_id.to_string(),
            });
        }

        let blocks = self.store.text_blocks(document_id)?;

        // Held until the transform ends or this future is dropped
        let registration = match &request.request_id {
            Some(request_id) => Some(self.register_transform_token(request_id)?),
            None => None,
        };
        let token = registration
            .as_ref()
            .map_or_else(CancellationToken::new, |r| r.token().clone());

        self.record(
            ActivityEvent::new(ActivityKind::TransformInvoked, document_id, actor)
                .with_detail(request.operation.as_str()),
        );

        let settings = self.runtime_config.dynamic().transform.clone();
        let result = self
            .router
            .transform(
                document_id,
                &blocks,
                request.operation,
                &request.params,
                &settings,
                &token,
            )
            .await;

        drop(registration);

        match result {
            Ok(result) => {
                info!(
                    doc_id = %document_id,
                    operation = %request.operation,
                    chunks = result.chunk_count,
                    "Transform complete"
                );
                Ok(result)
            }
            Err(source) => {
                error!(
                    doc_id = %document_id,
                    operation = %request.operation,
                    error = %source,
                    "Transform failed"
                );
                Err(ServiceError::Transform {
                    operation: request.operation,
                    document_id: document_id.to_string(),
                    source,
                })
            }
        }
    }
}
