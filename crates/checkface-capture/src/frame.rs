//! Frame type plus the grayscale and dark-frame checks.

use image::RgbImage;
use std::path::{Path, PathBuf};

/// File extensions accepted as photos and frames.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_THRESHOLD_PCT: f32 = 0.95;

/// A captured RGB frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&to_grayscale(&image), DARK_THRESHOLD_PCT);
        Self {
            image,
            sequence,
            is_dark,
        }
    }

    /// Decode an image file into a frame.
    pub fn load(path: &Path, sequence: u32) -> Result<Self, CaptureError> {
        let image = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        Ok(Self::new(image, sequence))
    }

    /// Encode the frame to `path`; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<(), CaptureError> {
        self.image.save(path).map_err(|source| CaptureError::Encode {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Reduce an RGB image to its luma channel.
pub fn to_grayscale(rgb: &RgbImage) -> Vec<u8> {
    image::imageops::grayscale(rgb).into_raw()
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest
/// bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Whether `path` carries one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("cannot encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
}
