use crate::error::ImageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;

/// Largest attachment accepted (20 MiB).
pub const MAX_IMAGE_SIZE: u64 = 20 * 1024 * 1024;

const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

fn mime_type(path: &Path) -> Result<&'static str, ImageError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    ALLOWED_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
        .ok_or_else(|| ImageError::UnsupportedType(path.display().to_string()))
}

/// Checks size and type of an image attachment, returning its MIME type.
pub fn validate_image(path: &Path) -> Result<&'static str, ImageError> {
    let size = std::fs::metadata(path)?.len();
    if size > MAX_IMAGE_SIZE {
        return Err(ImageError::TooLarge {
            size,
            limit: MAX_IMAGE_SIZE,
        });
    }
    mime_type(path)
}

/// Reads an image into a `data:<mime>;base64,...` URL suitable for an image part.
pub fn image_to_data_url(path: &Path) -> Result<String, ImageError> {
    let mime = validate_image(path)?;
    let bytes = std::fs::read(path)?;
    log::debug!("Encoding {} ({} bytes) as {}", path.display(), bytes.len(), mime);
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}
