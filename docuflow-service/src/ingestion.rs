//! Document extraction.
//!
//! Turns raw PDF or DOCX bytes into an [`ExtractedArtifact`]: ordered text
//! blocks plus embedded images, each tagged with the position it came from.
//! Extraction is pure; nothing here touches the store or the index.

pub mod docx;
pub mod hash;
pub mod pdf;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ExtractionError;

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }

    /// Parse a declared format ("pdf", "docx", or a MIME type).
    pub fn parse(declared: &str) -> Result<Self, ExtractionError> {
        let declared = declared.trim().to_ascii_lowercase();
        // MIME types may carry parameters such as `; charset=binary`
        let essence = match declared.parse::<mime::Mime>() {
            Ok(parsed) => parsed.essence_str().to_string(),
            Err(_) => declared,
        };
        match essence.as_str() {
            "pdf" | "application/pdf" => Ok(DocumentFormat::Pdf),
            "docx"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(DocumentFormat::Docx)
            }
            other => Err(ExtractionError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }

    /// Infer the format from a filename extension.
    pub fn from_filename(filename: &str) -> Result<Self, ExtractionError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Self::parse(extension).map_err(|_| ExtractionError::UnsupportedFormat {
            format: if extension.is_empty() {
                filename.to_string()
            } else {
                extension.to_string()
            },
        })
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A contiguous run of text from the source document.
///
/// `position` is the 1-based page number for PDFs and the 1-based ordinal
/// of the body element (paragraph or table) for DOCX.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub position: u32,
    pub text: String,
}

/// An image embedded in the source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub position: u32,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// The extractor's output: canonical text blocks and images in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedArtifact {
    pub blocks: Vec<TextBlock>,
    pub images: Vec<ExtractedImage>,
}

impl ExtractedArtifact {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.images.is_empty()
    }
}

/// Extract text blocks and images from raw document bytes.
pub fn extract(bytes: &[u8], format: DocumentFormat) -> Result<ExtractedArtifact, ExtractionError> {
    if bytes.is_empty() {
        return Err(ExtractionError::CorruptDocument {
            message: "document is empty".to_string(),
        });
    }

    debug!(format = %format, size = bytes.len(), "Extracting document");

    let artifact = match format {
        DocumentFormat::Pdf => pdf::extract_pdf(bytes)?,
        DocumentFormat::Docx => docx::extract_docx(bytes)?,
    };

    if artifact.is_empty() {
        return Err(ExtractionError::EmptyDocument);
    }

    info!(
        format = %format,
        blocks = artifact.blocks.len(),
        images = artifact.images.len(),
        "Extraction complete"
    );

    Ok(artifact)
}

/// Guess an image MIME type from a file extension
pub(crate) fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "emf" => "image/emf",
        "wmf" => "image/wmf",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Decode just enough of an image to learn its dimensions
pub(crate) fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(std::io::Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
