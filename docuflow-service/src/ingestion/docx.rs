//! DOCX extraction.
//!
//! A DOCX file is a zip archive; the body lives in `word/document.xml` and
//! image parts are linked through `word/_rels/document.xml.rels`. Body
//! elements (paragraphs and tables) are walked in order. Tables are
//! flattened to one line per row with cells joined by `" | "`.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::{
    ExtractedArtifact, ExtractedImage, TextBlock, image_dimensions, mime_for_extension,
};
use crate::error::ExtractionError;

const DOCUMENT_PART: &str = "word/document.xml";
const RELATIONSHIPS_PART: &str = "word/_rels/document.xml.rels";

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub fn extract_docx(bytes: &[u8]) -> Result<ExtractedArtifact, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| corrupt(format!("not a DOCX archive: {e}")))?;

    let document_xml = read_part(&mut archive, DOCUMENT_PART)?
        .ok_or_else(|| corrupt(format!("missing {DOCUMENT_PART}")))?;
    let document_xml = String::from_utf8(document_xml)
        .map_err(|_| corrupt(format!("{DOCUMENT_PART} is not UTF-8")))?;

    let relationships = match read_part(&mut archive, RELATIONSHIPS_PART)? {
        Some(rels) => parse_relationships(&rels)?,
        None => HashMap::new(),
    };

    let body = BodyWalker::walk(&document_xml)?;
    debug!(
        blocks = body.blocks.len(),
        image_refs = body.image_refs.len(),
        "Parsed DOCX body"
    );

    let mut images = Vec::new();
    for image_ref in body.image_refs {
        let Some(target) = relationships.get(&image_ref.relationship_id) else {
            warn!(rel_id = %image_ref.relationship_id, "Image relationship not found");
            continue;
        };
        let part_name = resolve_part_name(target);
        let Some(data) = read_part(&mut archive, &part_name)? else {
            warn!(part = %part_name, "Image part missing from archive");
            continue;
        };

        let extension = part_name.rsplit('.').next().unwrap_or_default();
        let dimensions = image_dimensions(&data);
        images.push(ExtractedImage {
            position: image_ref.position,
            mime_type: mime_for_extension(extension).to_string(),
            data,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
        });
    }

    Ok(ExtractedArtifact {
        blocks: body.blocks,
        images,
    })
}

fn corrupt(message: String) -> ExtractionError {
    ExtractionError::CorruptDocument { message }
}

fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, ExtractionError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(corrupt(format!("failed to open {name}: {e}"))),
    };

    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)
        .map_err(|e| corrupt(format!("failed to read {name}: {e}")))?;
    Ok(Some(data))
}

/// Map relationship ids to their internal targets
fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut relationships = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let id = attribute(&e, b"Id");
                let target = attribute(&e, b"Target");
                let external = attribute(&e, b"TargetMode").is_some_and(|m| m == "External");
                if let (Some(id), Some(target), false) = (id, target, external) {
                    relationships.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(corrupt(format!("malformed relationships: {e}"))),
        }
        buf.clear();
    }

    Ok(relationships)
}

/// Resolve a relationship target (relative to `word/`) to an archive part name
fn resolve_part_name(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = vec!["word"];
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local_name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

struct ImageRef {
    position: u32,
    relationship_id: String,
}

#[derive(Default)]
struct BodyWalker {
    blocks: Vec<TextBlock>,
    image_refs: Vec<ImageRef>,
    /// Ordinal of the current top-level body element
    element: u32,
    paragraph_depth: usize,
    table_depth: usize,
    run_depth: usize,
    in_text: bool,
    paragraph: String,
    cell: String,
    row: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl BodyWalker {
    fn walk(xml: &str) -> Result<Self, ExtractionError> {
        let mut reader = Reader::from_str(xml);
        let mut walker = BodyWalker::default();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => walker.start(&e, false),
                Ok(Event::Empty(e)) => walker.start(&e, true),
                Ok(Event::End(e)) => walker.end(e.local_name().as_ref()),
                Ok(Event::Text(t)) if walker.in_text => {
                    let text = t
                        .unescape()
                        .map_err(|e| corrupt(format!("malformed text run: {e}")))?;
                    walker.push_text(&text);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(corrupt(format!(
                        "malformed {DOCUMENT_PART} at byte {}: {e}",
                        reader.buffer_position()
                    )));
                }
            }
        }

        Ok(walker)
    }

    fn start(&mut self, e: &BytesStart<'_>, empty: bool) {
        match e.local_name().as_ref() {
            b"p" => {
                if self.table_depth == 0 && self.paragraph_depth == 0 {
                    self.element += 1;
                    self.paragraph.clear();
                }
                if !empty {
                    self.paragraph_depth += 1;
                }
            }
            b"tbl" => {
                if self.table_depth == 0 {
                    self.element += 1;
                    self.rows.clear();
                }
                if !empty {
                    self.table_depth += 1;
                }
            }
            b"tr" if self.table_depth == 1 => self.row.clear(),
            b"tc" if self.table_depth == 1 => self.cell.clear(),
            b"r" if !empty => self.run_depth += 1,
            b"t" if !empty => self.in_text = true,
            // Tab stops in paragraph properties share the element name
            b"tab" if self.run_depth > 0 => self.push_text("\t"),
            b"br" | b"cr" if self.run_depth > 0 => self.push_text("\n"),
            b"blip" => {
                if let Some(id) = attribute(e, b"embed") {
                    self.push_image(id);
                }
            }
            b"imagedata" => {
                if let Some(id) = attribute(e, b"id") {
                    self.push_image(id);
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, local_name: &[u8]) {
        match local_name {
            b"t" => self.in_text = false,
            b"r" => self.run_depth = self.run_depth.saturating_sub(1),
            b"p" => {
                self.paragraph_depth = self.paragraph_depth.saturating_sub(1);
                if self.table_depth > 0 {
                    self.push_text("\n");
                } else if self.paragraph_depth == 0 {
                    let text = self.paragraph.trim();
                    if !text.is_empty() {
                        self.blocks.push(TextBlock {
                            position: self.element,
                            text: text.to_string(),
                        });
                    }
                    self.paragraph.clear();
                } else {
                    self.paragraph.push('\n');
                }
            }
            b"tc" if self.table_depth == 1 => {
                let cell = collapse_whitespace(&self.cell);
                self.row.push(cell);
                self.cell.clear();
            }
            b"tc" => self.push_text(" "),
            b"tr" if self.table_depth == 1 => {
                let row = std::mem::take(&mut self.row);
                if row.iter().any(|c| !c.is_empty()) {
                    self.rows.push(row);
                }
            }
            b"tbl" => {
                self.table_depth = self.table_depth.saturating_sub(1);
                if self.table_depth == 0 {
                    let text = self
                        .rows
                        .drain(..)
                        .map(|row| row.join(" | "))
                        .collect::<Vec<_>>()
                        .join("\n");
                    if !text.trim().is_empty() {
                        self.blocks.push(TextBlock {
                            position: self.element,
                            text,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.table_depth > 0 {
            self.cell.push_str(text);
        } else if self.paragraph_depth > 0 {
            self.paragraph.push_str(text);
        }
    }

    fn push_image(&mut self, relationship_id: String) {
        self.image_refs.push(ImageRef {
            position: self.element.max(1),
            relationship_id,
        });
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
