//! PDF extraction using lopdf.
//!
//! Text is read page by page; each page with text becomes one block.
//! Images are image XObjects found in each page's resources.

use std::io::Cursor;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use super::{ExtractedArtifact, ExtractedImage, TextBlock};
use crate::error::ExtractionError;

/// Guard against cyclic /Parent chains in malformed page trees
const MAX_PARENT_DEPTH: usize = 32;

pub fn extract_pdf(bytes: &[u8]) -> Result<ExtractedArtifact, ExtractionError> {
    let document = Document::load_mem(bytes).map_err(|e| ExtractionError::CorruptDocument {
        message: format!("failed to parse PDF: {e}"),
    })?;

    if document.is_encrypted() {
        return Err(ExtractionError::CorruptDocument {
            message: "encrypted PDFs are not supported".to_string(),
        });
    }

    let pages = document.get_pages();
    debug!(pages = pages.len(), "Loaded PDF");

    let mut artifact = ExtractedArtifact::default();

    for (page_number, page_id) in pages {
        match document.extract_text(&[page_number]) {
            Ok(text) => {
                let text = normalize_page_text(&text);
                if !text.is_empty() {
                    artifact.blocks.push(TextBlock {
                        position: page_number,
                        text,
                    });
                }
            }
            Err(e) => {
                // Pages without a content stream or with unsupported fonts
                warn!(page = page_number, error = %e, "Failed to extract text from page");
            }
        }

        artifact
            .images
            .extend(extract_page_images(&document, page_id, page_number));
    }

    Ok(artifact)
}

/// Trim trailing whitespace per line and drop leading/trailing blank lines
fn normalize_page_text(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn extract_page_images(
    document: &Document,
    page_id: ObjectId,
    page_number: u32,
) -> Vec<ExtractedImage> {
    let Some(resources) = page_resources(document, page_id) else {
        return Vec::new();
    };
    let Some(xobjects) = resolve_dict_entry(document, resources, b"XObject") else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for (name, obj) in xobjects.iter() {
        let Object::Stream(stream) = resolve_object(document, obj) else {
            continue;
        };
        if !is_image_subtype(&stream.dict) {
            continue;
        }

        match decode_image_stream(document, stream) {
            Some((mime_type, data)) => {
                let width = get_dimension(&stream.dict, b"Width");
                let height = get_dimension(&stream.dict, b"Height");
                images.push(ExtractedImage {
                    position: page_number,
                    mime_type: mime_type.to_string(),
                    data,
                    width,
                    height,
                });
            }
            None => {
                warn!(
                    page = page_number,
                    xobject = %String::from_utf8_lossy(name),
                    "Skipping image with unsupported encoding"
                );
            }
        }
    }

    images
}

/// Find a page's /Resources, following /Parent for inherited resources
fn page_resources(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = document.get_object(page_id).ok()?.as_dict().ok()?;

    for _ in 0..MAX_PARENT_DEPTH {
        if let Some(resources) = resolve_dict_entry(document, node, b"Resources") {
            return Some(resources);
        }
        node = resolve_dict_entry(document, node, b"Parent")?;
    }

    None
}

fn is_image_subtype(dict: &Dictionary) -> bool {
    dict.get(b"Subtype")
        .map(|obj| matches!(obj, Object::Name(n) if n == b"Image"))
        .unwrap_or(false)
}

fn has_filter(dict: &Dictionary, filter: &[u8]) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == filter,
        Ok(Object::Array(arr)) => arr
            .iter()
            .any(|o| matches!(o, Object::Name(n) if n == filter)),
        _ => false,
    }
}

/// Returns the image's MIME type and encoded bytes.
///
/// JPEG and JPEG 2000 streams are passed through unchanged; anything else is
/// decompressed and re-encoded as PNG.
fn decode_image_stream(
    document: &Document,
    stream: &lopdf::Stream,
) -> Option<(&'static str, Vec<u8>)> {
    if has_filter(&stream.dict, b"DCTDecode") {
        return Some(("image/jpeg", stream.content.clone()));
    }
    if has_filter(&stream.dict, b"JPXDecode") {
        return Some(("image/jp2", stream.content.clone()));
    }

    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    if let Ok(img) = image::load_from_memory(&content) {
        return encode_png(&img).map(|png| ("image/png", png));
    }

    reconstruct_raw_image(document, &stream.dict, &content).map(|png| ("image/png", png))
}

fn reconstruct_raw_image(document: &Document, dict: &Dictionary, raw: &[u8]) -> Option<Vec<u8>> {
    let width = get_dimension(dict, b"Width")?;
    let height = get_dimension(dict, b"Height")?;
    let bpc = get_int(dict, b"BitsPerComponent").unwrap_or(8);
    if bpc != 8 {
        return None;
    }

    let channels = color_channels(document, dict)?;
    let expected = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(channels)?;
    if raw.len() < expected {
        return None;
    }
    let pixels = raw[..expected].to_vec();

    let img = match channels {
        1 => image::DynamicImage::ImageLuma8(image::GrayImage::from_raw(width, height, pixels)?),
        3 => image::DynamicImage::ImageRgb8(image::RgbImage::from_raw(width, height, pixels)?),
        _ => return None,
    };

    encode_png(&img)
}

fn color_channels(document: &Document, dict: &Dictionary) -> Option<usize> {
    let cs = match dict.get(b"ColorSpace") {
        Ok(obj) => resolve_object(document, obj),
        Err(_) => return Some(3),
    };

    match cs {
        Object::Name(n) => match n.as_slice() {
            b"DeviceGray" | b"CalGray" => Some(1),
            b"DeviceRGB" | b"CalRGB" => Some(3),
            _ => None,
        },
        Object::Array(arr) => match arr.first() {
            Some(Object::Name(n)) if n == b"ICCBased" => {
                let Some(Object::Stream(icc)) = arr.get(1).map(|o| resolve_object(document, o))
                else {
                    return Some(3);
                };
                match get_int(&icc.dict, b"N") {
                    Some(1) => Some(1),
                    Some(3) | None => Some(3),
                    _ => None,
                }
            }
            _ => None,
        },
        _ => None,
    }
}

fn encode_png(img: &image::DynamicImage) -> Option<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).ok()?;
    Some(buf.into_inner())
}

fn resolve_object<'a>(document: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => document.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict_entry<'a>(
    document: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Dictionary> {
    let obj = dict.get(key).ok()?;
    resolve_object(document, obj).as_dict().ok()
}

fn get_int(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok()?.as_i64().ok()
}

/// A positive pixel dimension that fits in `u32`
fn get_dimension(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    u32::try_from(get_int(dict, key)?).ok().filter(|v| *v > 0)
}
