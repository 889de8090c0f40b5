use atelier_contracts::media::{encode_base64, parse_inline_image};
use serde_json::{json, Value};

use crate::resolver::ResolvedImage;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    InlineImage { mime_type: String, bytes: Vec<u8> },
    Text(String),
}

impl ContentPart {
    pub fn to_json(&self) -> Value {
        match self {
            Self::InlineImage { mime_type, bytes } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": encode_base64(bytes),
                }
            }),
            Self::Text(text) => json!({ "text": text }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentPayload {
    parts: Vec<ContentPart>,
}

impl ContentPayload {
    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ContentPart::InlineImage { .. }))
            .count()
    }

    /// `contents` array for a single user turn.
    pub fn to_contents(&self) -> Value {
        json!([{
            "role": "user",
            "parts": self.parts.iter().map(ContentPart::to_json).collect::<Vec<Value>>(),
        }])
    }
}

/// Images can only be pushed here; the instruction is appended by
/// [`ContentAssembler::finish`], so it always lands after every image.
#[derive(Debug, Default)]
pub struct ContentAssembler {
    images: Vec<ContentPart>,
    warnings: Vec<String>,
}

impl ContentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_resolved(&mut self, image: &ResolvedImage) {
        self.images.push(ContentPart::InlineImage {
            mime_type: image.mime_type.clone(),
            bytes: image.bytes.clone(),
        });
    }

    /// Decodes an inline data URL. Malformed or non-inline entries are
    /// skipped with a warning instead of failing the batch.
    pub fn push_encoded(&mut self, index: usize, reference: &str) -> bool {
        match parse_inline_image(reference) {
            Ok(Some(inline)) => {
                self.images.push(ContentPart::InlineImage {
                    mime_type: inline.mime_type,
                    bytes: inline.bytes,
                });
                true
            }
            Ok(None) => {
                self.skip(index, "not an inline image");
                false
            }
            Err(err) => {
                self.skip(index, &err.to_string());
                false
            }
        }
    }

    pub fn skip(&mut self, index: usize, reason: &str) {
        tracing::warn!(index, reason, "skipping malformed image");
        push_unique_warning(
            &mut self.warnings,
            format!("Skipped image {}: {reason}", index + 1),
        );
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Appends the instruction after all images. A blank instruction adds no
    /// text part.
    pub fn finish(self, instruction: &str) -> (ContentPayload, Vec<String>) {
        let mut parts = self.images;
        let text = instruction.trim();
        if !text.is_empty() {
            parts.push(ContentPart::Text(text.to_string()));
        }
        (ContentPayload { parts }, self.warnings)
    }
}

pub fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}
