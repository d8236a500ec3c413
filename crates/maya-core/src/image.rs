//! Validation of base64 image uploads attached to a chat request.

use crate::types::ImageAttachment;
use base64::Engine;

/// Decodes and validates a base64 image. Accepts a bare payload or a `data:<type>;base64,` URL.
/// The media type is sniffed from the decoded bytes; unknown formats are sent as JPEG.
pub fn decode_image(input: &str) -> Result<ImageAttachment, String> {
    let trimmed = input.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, b64)| b64)
            .ok_or_else(|| "image data URL must be base64-encoded".to_string())?,
        None => trimmed,
    };
    // Browsers sometimes wrap long base64 strings.
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err("image is empty".to_string());
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| format!("image is not valid base64: {}", e))?;
    if bytes.is_empty() {
        return Err("image is empty".to_string());
    }

    Ok(ImageAttachment {
        media_type: sniff_media_type(&bytes).to_string(),
        base64: payload,
    })
}

fn sniff_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}
