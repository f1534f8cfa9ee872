use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Drop everything up to and including the first comma, if there is one.
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

/// Decode a raw base64 string or a `data:` URI.
pub fn decode_image(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(strip_data_uri(payload).trim())
        .context("image payload is not valid base64")
}

pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}
