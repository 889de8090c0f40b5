use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{DispatchError, Result};

/// Decoded `data:image/<subtype>;base64,<payload>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InlineImage {
    /// File extension derived from the MIME subtype (`image/jpeg` -> `jpeg`).
    pub fn extension(&self) -> String {
        let subtype = self
            .mime_type
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .split('+')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if subtype.is_empty() || !subtype.chars().all(|c| c.is_ascii_alphanumeric()) {
            "png".to_string()
        } else {
            subtype
        }
    }
}

pub fn is_inline_image(reference: &str) -> bool {
    reference
        .trim_start()
        .get(..11)
        .map(|prefix| prefix.eq_ignore_ascii_case("data:image/"))
        .unwrap_or(false)
}

/// Returns `Ok(None)` when `reference` is not an inline image at all.
pub fn parse_inline_image(reference: &str) -> Result<Option<InlineImage>> {
    let trimmed = reference.trim();
    if !is_inline_image(trimmed) {
        return Ok(None);
    }
    let Some((header, payload)) = trimmed.split_once(',') else {
        return Err(DispatchError::InvalidEncoding(
            "data URL has no payload separator".to_string(),
        ));
    };
    let mut segments = header["data:".len()..].split(';');
    let mime_type = segments
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("image/png")
        .to_ascii_lowercase();
    if !segments.any(|segment| segment.trim().eq_ignore_ascii_case("base64")) {
        return Err(DispatchError::InvalidEncoding(format!(
            "data URL for {mime_type} is not base64 encoded"
        )));
    }
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|err| DispatchError::InvalidEncoding(err.to_string()))?;
    if bytes.is_empty() {
        return Err(DispatchError::InvalidEncoding(
            "data URL payload is empty".to_string(),
        ));
    }
    Ok(Some(InlineImage { mime_type, bytes }))
}

pub fn png_data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

/// Wraps an already base64-encoded video payload.
pub fn mp4_data_url(encoded: &str) -> String {
    format!("data:video/mp4;base64,{encoded}")
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|err| DispatchError::InvalidEncoding(err.to_string()))
}
