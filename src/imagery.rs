//! Before/after imagery.
//!
//! Images are reduced to 8-bit luminance at load time; colour never reaches
//! the extractor. Each image carries a content digest so run metadata can
//! identify exactly which pixels were compared.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{CoreError, CoreResult, Stage};

/// Identifies an image in run metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIdentifier {
    /// Caller-supplied label, usually the file path.
    pub label: String,
    /// SHA-256 of dimensions + luminance bytes, hex encoded.
    pub sha256: String,
}

/// Single-channel 8-bit image with its identifier.
#[derive(Clone, Debug)]
pub struct LumaImage {
    id: ImageIdentifier,
    pixels: GrayImage,
}

impl LumaImage {
    /// Decode an image file and convert it to luminance.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let decoded = image::open(path).map_err(|e| {
            CoreError::input(
                Stage::Load,
                format!("could not read image {}: {}", path.display(), e),
            )
        })?;
        let label = path.display().to_string();
        Self::from_gray(label, decoded.to_luma8())
    }

    pub fn from_gray(label: impl Into<String>, pixels: GrayImage) -> CoreResult<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(CoreError::input(Stage::Load, "image has zero width or height"));
        }
        let sha256 = digest(&pixels);
        Ok(Self {
            id: ImageIdentifier {
                label: label.into(),
                sha256,
            },
            pixels,
        })
    }

    /// Build from a raw row-major luminance buffer.
    pub fn from_luma(
        label: impl Into<String>,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> CoreResult<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(CoreError::input(
                Stage::Load,
                format!(
                    "luminance buffer has {} bytes, expected {} for {}x{}",
                    data.len(),
                    expected,
                    width,
                    height
                ),
            ));
        }
        let pixels = GrayImage::from_raw(width, height, data)
            .ok_or_else(|| CoreError::input(Stage::Load, "luminance buffer rejected"))?;
        Self::from_gray(label, pixels)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Row-major luminance bytes.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn identifier(&self) -> &ImageIdentifier {
        &self.id
    }
}

fn digest(pixels: &GrayImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pixels.width().to_le_bytes());
    hasher.update(pixels.height().to_le_bytes());
    hasher.update(pixels.as_raw());
    hex::encode(hasher.finalize())
}

/// A pixel-aligned before/after pair. Construction enforces equal dimensions.
#[derive(Clone, Debug)]
pub struct ImagePair {
    before: LumaImage,
    after: LumaImage,
}

impl ImagePair {
    pub fn new(before: LumaImage, after: LumaImage) -> CoreResult<Self> {
        if before.dimensions() != after.dimensions() {
            let (bw, bh) = before.dimensions();
            let (aw, ah) = after.dimensions();
            return Err(CoreError::input(
                Stage::Load,
                format!(
                    "image dimensions differ: before {}x{}, after {}x{} (pairs must be pre-aligned)",
                    bw, bh, aw, ah
                ),
            ));
        }
        Ok(Self { before, after })
    }

    pub fn load(before: &Path, after: &Path) -> CoreResult<Self> {
        Self::new(LumaImage::load(before)?, LumaImage::load(after)?)
    }

    pub fn before(&self) -> &LumaImage {
        &self.before
    }

    pub fn after(&self) -> &LumaImage {
        &self.after
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.before.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_dimensions() {
        let a = LumaImage::from_luma("a", 4, 4, vec![0; 16]).unwrap();
        let b = LumaImage::from_luma("b", 5, 4, vec![0; 20]).unwrap();
        let err = ImagePair::new(a, b).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("dimensions differ"));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(LumaImage::from_luma("a", 4, 4, vec![0; 15]).is_err());
    }

    #[test]
    fn digest_tracks_content() {
        let a = LumaImage::from_luma("a", 2, 2, vec![0, 1, 2, 3]).unwrap();
        let b = LumaImage::from_luma("b", 2, 2, vec![0, 1, 2, 3]).unwrap();
        let c = LumaImage::from_luma("c", 2, 2, vec![0, 1, 2, 4]).unwrap();
        assert_eq!(a.identifier().sha256, b.identifier().sha256);
        assert_ne!(a.identifier().sha256, c.identifier().sha256);
    }

    #[test]
    fn load_missing_file_is_input_error() {
        let err = LumaImage::load(Path::new("/nonexistent/before.png")).unwrap_err();
        assert!(matches!(err, CoreError::Input { .. }));
    }
}
