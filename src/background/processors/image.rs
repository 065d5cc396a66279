//! Image processing helpers - derived thumbnails and format re-encoding.

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

use crate::models::entity::Dimensions;
use crate::utils::PathExt;

/// Working encoding of every preview the cropping tool produces.
pub const WORKING_FORMAT: ImageFormat = ImageFormat::Jpeg;

pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    image::ImageReader::open(path)
        .context(format!("failed to open image {:?}", path))?
        .with_guessed_format()
        .context(format!("failed to sniff image format of {:?}", path))?
        .decode()
        .context(format!("failed to decode image {:?}", path))
}

/// Format implied by the file's extension, which is what the catalog declares.
pub fn declared_format(path: &Path) -> Option<ImageFormat> {
    ImageFormat::from_extension(path.ext_lower())
}

pub fn format_label(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{:?}", format).to_ascii_lowercase())
}

/// Decode `source` and encode it as `format` into memory.
pub fn reencode(source: &Path, format: ImageFormat) -> Result<Vec<u8>> {
    let dynamic_image = decode_image(source)?;
    // JPEG carries no alpha channel.
    let dynamic_image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(dynamic_image.to_rgb8()),
        _ => dynamic_image,
    };
    let mut buffer = Cursor::new(Vec::new());
    dynamic_image
        .write_to(&mut buffer, format)
        .context(format!("failed to encode {:?} as {:?}", source, format))?;
    Ok(buffer.into_inner())
}

/// Regenerate the derived JPEG for `source` at `destination` and return the
/// source's own dimensions.
pub fn generate_derived(source: &Path, destination: &Path, long_side: u32) -> Result<Dimensions> {
    let dynamic_image = decode_image(source)?;
    let (width, height) = (dynamic_image.width(), dynamic_image.height());
    if width == 0 || height == 0 {
        return Err(anyhow!("image {:?} has zero size", source));
    }
    let (thumb_width, thumb_height) = small_width_height(width, height, long_side);
    let thumbnail = dynamic_image.thumbnail_exact(thumb_width, thumb_height);

    let parent_path = destination
        .parent()
        .ok_or_else(|| anyhow!("failed to determine parent directory of {:?}", destination))?;
    std::fs::create_dir_all(parent_path)
        .context(format!("failed to create directory tree {:?}", parent_path))?;

    DynamicImage::ImageRgb8(thumbnail.to_rgb8())
        .save_with_format(destination, ImageFormat::Jpeg)
        .context(format!("failed to save JPEG thumbnail to {:?}", destination))?;

    Ok(Dimensions::new(width, height))
}

/// Resize dimensions so that the larger side equals `long_side`, preserving
/// aspect ratio. Images already smaller are left alone.
pub fn small_width_height(width: u32, height: u32, long_side: u32) -> (u32, u32) {
    if width >= std::cmp::max(height, long_side) {
        (long_side, (height * long_side / width).max(1))
    } else if height >= std::cmp::max(width, long_side) {
        ((width * long_side / height).max(1), long_side)
    } else {
        (width, height)
    }
}
