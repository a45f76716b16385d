//! Profile image storage.
//!
//! An image is addressed by a random 128-bit token rather than by
//! identity, so a stale reference to a since-replaced image fails closed
//! (not-found) instead of silently serving whatever is current. Writes
//! decode and re-encode through the [`image`] crate to both validate the
//! upload and normalize it to a single thumbnail format, then land on
//! disk by writing to a temporary path and renaming over the final one —
//! a reader can never observe a partially written file.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, ImageFormat, ImageReader};
use rand::rngs::OsRng;
use rand::RngCore;

pub const THUMBNAIL_MAX_DIMENSION: u32 = 512;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image data could not be decoded")]
    Decode,
    #[error("image could not be written to disk: {0}")]
    Io(#[from] std::io::Error),
    #[error("image processing task panicked")]
    TaskFailed,
}

pub fn random_image_token() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn token_path(root: &Path, token: &[u8; 16]) -> PathBuf {
    root.join(hex(token)).with_extension("png")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode `raw`, downscale to fit within [`THUMBNAIL_MAX_DIMENSION`] on
/// its longest edge, and re-encode as PNG. Runs synchronously; callers on
/// an async runtime wrap this in `spawn_blocking`.
pub fn transcode_to_thumbnail(raw: &[u8]) -> Result<Vec<u8>, ImageError> {
    let decoded = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|_| ImageError::Decode)?
        .decode()
        .map_err(|_| ImageError::Decode)?;

    let thumbnail = decoded.resize(THUMBNAIL_MAX_DIMENSION, THUMBNAIL_MAX_DIMENSION, FilterType::Lanczos3);

    let mut out = Cursor::new(Vec::new());
    thumbnail.write_to(&mut out, ImageFormat::Png).map_err(|_| ImageError::Decode)?;
    Ok(out.into_inner())
}

/// Write `bytes` under a freshly generated token by writing to a
/// temporary sibling file and renaming it into place, so a crash or
/// concurrent read never sees a half-written file.
pub fn write_atomic(root: &Path, token: &[u8; 16], bytes: &[u8]) -> Result<PathBuf, ImageError> {
    std::fs::create_dir_all(root)?;
    let final_path = token_path(root, token);
    let tmp_path = root.join(format!(".{}.tmp", hex(token)));

    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(final_path)
}

pub fn read(root: &Path, token: &[u8; 16]) -> Result<Vec<u8>, ImageError> {
    Ok(std::fs::read(token_path(root, token))?)
}

pub fn remove(root: &Path, token: &[u8; 16]) {
    let _ = std::fs::remove_file(token_path(root, token));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn transcodes_and_downscales_oversized_images() {
        let raw = png_bytes(1024, 1024);
        let thumbnail = transcode_to_thumbnail(&raw).unwrap();

        let decoded = image::load_from_memory(&thumbnail).unwrap();
        assert!(decoded.width() <= THUMBNAIL_MAX_DIMENSION);
        assert!(decoded.height() <= THUMBNAIL_MAX_DIMENSION);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(transcode_to_thumbnail(b"not an image").is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile_dir();
        let token = random_image_token();
        let bytes = png_bytes(16, 16);

        write_atomic(&dir, &token, &bytes).unwrap();
        assert_eq!(read(&dir, &token).unwrap(), bytes);

        remove(&dir, &token);
        assert!(read(&dir, &token).is_err());
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("identity-node-test-{}", hex(&random_image_token())));
        dir
    }
}
