//! Image encoding for the two places pixels leave the process.
//!
//! * Page PNGs already on disk are base64-wrapped into `ImageData` for the
//!   oracle request. They are sent as-is: re-encoding would only cost time.
//! * Cropped regions are PNG-encoded for the blob store. PNG is lossless,
//!   which matters for tables and small print inside figures.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every image this crate produces.
pub const PNG_MIME: &str = "image/png";

/// Wrap an already-encoded page PNG for the oracle request.
///
/// `detail: "high"` keeps fine print and small tables legible for
/// GPT-4-class models, which otherwise downsample to a single tile.
pub fn encode_page_png(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded page → {} bytes base64", b64.len());
    ImageData::new(b64, PNG_MIME).with_detail("high")
}

/// Encode a cropped region as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
