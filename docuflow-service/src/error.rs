use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::service::IngestionStage;
use crate::transform::Operation;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Document {document_id} has not finished ingestion")]
    DocumentNotReady { document_id: String },

    #[error("Image {index} not found for document {document_id}")]
    ImageNotFound { document_id: String, index: usize },

    #[error("Folder not found: {folder_id}")]
    FolderNotFound { folder_id: String },

    #[error("A folder named {name} already exists")]
    FolderExists { name: String },

    #[error("Folder {folder_id} still holds {documents} documents")]
    FolderNotEmpty { folder_id: String, documents: usize },

    #[error("Ingestion stopped after reaching {stopped_at}: {source}")]
    Ingestion {
        stopped_at: IngestionStage,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("{operation} failed for document {document_id}: {source}")]
    Transform {
        operation: Operation,
        document_id: String,
        #[source]
        source: TransformError,
    },

    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search index error: {0}")]
    Index(#[from] IndexError),

    #[error("File too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Extractor errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Corrupt document: {message}")]
    CorruptDocument { message: String },

    #[error("Document contains no extractable text or images")]
    EmptyDocument,
}

/// AI gateway errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("AI service unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error("AI service rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from AI service: {message}")]
    InvalidResponse { message: String },
}

/// Transform router errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error("Transform cancelled")]
    Cancelled,
}

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("File storage failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Search index errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Index update failed for {document_id}: {message}")]
    Update {
        document_id: String,
        message: String,
    },

    #[error("Index unavailable: {message}")]
    Unavailable { message: String },
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestionStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

impl ServiceError {
    /// Wrap a failure that interrupted ingestion after `stopped_at` was reached.
    pub fn ingestion(stopped_at: IngestionStage, source: impl Into<ServiceError>) -> Self {
        ServiceError::Ingestion {
            stopped_at,
            source: Box::new(source.into()),
        }
    }

    /// The underlying cause for wrapped ingestion failures, or `self`.
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::Ingestion { source, .. } => source.root(),
            other => other,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. }
            | ServiceError::ImageNotFound { .. }
            | ServiceError::FolderNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::DocumentNotReady { .. }
            | ServiceError::FolderExists { .. }
            | ServiceError::FolderNotEmpty { .. } => StatusCode::CONFLICT,
            ServiceError::Ingestion { source, .. } => source.status_code(),
            ServiceError::Transform { source, .. } => match source {
                TransformError::InvalidParameters { .. } => StatusCode::BAD_REQUEST,
                TransformError::Cancelled => StatusCode::CONFLICT,
                TransformError::Gateway(e) => gateway_status(e),
            },
            ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Gateway(e) => gateway_status(e),
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Index(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(_) | ServiceError::Config { .. } | ServiceError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::DocumentNotReady { .. } => "document_not_ready",
            ServiceError::ImageNotFound { .. } => "image_not_found",
            ServiceError::FolderNotFound { .. } => "folder_not_found",
            ServiceError::FolderExists { .. } => "folder_exists",
            ServiceError::FolderNotEmpty { .. } => "folder_not_empty",
            ServiceError::Ingestion { source, .. } => source.error_code(),
            ServiceError::Transform { source, .. } => match source {
                TransformError::InvalidParameters { .. } => "invalid_parameters",
                TransformError::Cancelled => "transform_cancelled",
                TransformError::Gateway(e) => gateway_code(e),
            },
            ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Extraction(ExtractionError::CorruptDocument { .. }) => {
                "corrupt_document"
            }
            ServiceError::Extraction(ExtractionError::EmptyDocument) => "empty_document",
            ServiceError::Gateway(e) => gateway_code(e),
            ServiceError::Store(_) => "store_failure",
            ServiceError::Index(_) => "index_failure",
            ServiceError::PayloadTooLarge { .. } => "file_too_large",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

fn gateway_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Rejected { .. } | GatewayError::InvalidResponse { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn gateway_code(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::Unavailable { .. } => "ai_unavailable",
        GatewayError::Rejected { .. } => "ai_rejected",
        GatewayError::InvalidResponse { .. } => "ai_invalid_response",
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let stage = match &self {
            ServiceError::Ingestion { stopped_at, .. } => Some(*stopped_at),
            _ => None,
        };
        let operation = match &self {
            ServiceError::Transform { operation, .. } => Some(*operation),
            _ => None,
        };

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
            stage,
            operation,
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
