use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use rehab_contracts::assets::{BoundingBox, ImagePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.trim().as_bytes())
        .context("image base64 decode failed")
}

pub fn read_image_file(path: &Path) -> Result<ImagePart> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("{} is not a supported image file", path.display()))?;
    Ok(ImagePart::new(encode_base64(&bytes), format.to_mime_type()))
}

/// Side `max(width, height)`, clamped into the image and shrunk to fit it.
pub fn square_crop_rect(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Option<CropRect> {
    if image_width == 0 || image_height == 0 {
        return None;
    }
    let side = bbox.width.max(bbox.height);
    if side <= 0 {
        return None;
    }
    let size = side.min(i64::from(image_width)).min(i64::from(image_height));
    let centre_x = bbox.x as f64 + bbox.width as f64 / 2.0;
    let centre_y = bbox.y as f64 + bbox.height as f64 / 2.0;
    let origin_x = (centre_x - side as f64 / 2.0).round() as i64;
    let origin_y = (centre_y - side as f64 / 2.0).round() as i64;

    let x = origin_x.clamp(0, i64::from(image_width) - size);
    let y = origin_y.clamp(0, i64::from(image_height) - size);
    Some(CropRect {
        x: x as u32,
        y: y as u32,
        size: size as u32,
    })
}

pub fn crop_square_region(image: &ImagePart, bbox: &BoundingBox) -> Result<String> {
    let bytes = decode_base64(&image.data)?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("failed decoding {} image", image.mime_type))?;
    let Some(rect) = square_crop_rect(bbox, decoded.width(), decoded.height()) else {
        bail!(
            "bounding box {:?} does not describe a croppable region of a {}x{} image",
            bbox,
            decoded.width(),
            decoded.height()
        );
    };
    let cropped = decoded.crop_imm(rect.x, rect.y, rect.size, rect.size).to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, 90);
    encoder
        .encode_image(&cropped)
        .context("failed encoding face crop")?;
    Ok(encode_base64(&out))
}

pub(crate) fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
