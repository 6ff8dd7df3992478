use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rehab_contracts::assets::ImagePart;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::client::GenerationClient;
use crate::codec::{decode_base64, encode_base64};

const CANVAS_SIZE: u32 = 512;
const BORDER: u32 = 4;
const SWATCH_SIZE: u32 = 128;
const BACKGROUND: Rgb<u8> = Rgb([0x33, 0x33, 0x33]);
const FOREGROUND: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);
const LABEL_MARKER: u8 = 0xa5;
const LABEL_ROW: u32 = BORDER;

/// Placeholder labels are stored losslessly in one pixel row.
#[derive(Debug, Clone, Default)]
pub struct DryrunClient {
    image_latency: Duration,
    json_latency: Duration,
    composite_latency: Duration,
}

impl DryrunClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_simulated_latency() -> Self {
        Self {
            image_latency: Duration::from_millis(750),
            json_latency: Duration::from_millis(500),
            composite_latency: Duration::from_millis(1000),
        }
    }
}

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn transform_image(&self, prompt: &str, _image: &ImagePart) -> Result<String> {
        pause(self.image_latency);
        placeholder_png(prompt, &format!("Mock Image for: \"{}\"", label_title(prompt)))
    }

    fn extract_structured(&self, _prompt: &str, _image: &ImagePart, _schema: &Value) -> Result<Value> {
        pause(self.json_latency);
        Ok(json!({
            "faces": [{
                "description": "mock person on the left",
                "boundingBox": { "x": 120, "y": 150, "width": 200, "height": 240 }
            }]
        }))
    }

    fn transform_composite(&self, prompt: &str, _images: &[ImagePart]) -> Result<String> {
        pause(self.composite_latency);
        placeholder_png(prompt, &format!("Mock Composite for: \"{}\"", label_title(prompt)))
    }
}

fn pause(latency: Duration) {
    if !latency.is_zero() {
        thread::sleep(latency);
    }
}

fn label_title(prompt: &str) -> String {
    let head: String = prompt.chars().take(50).collect();
    format!("{}...", head.replace('"', ""))
}

fn color_from_prompt(prompt: &str) -> Rgb<u8> {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    Rgb([digest[0], digest[1], digest[2]])
}

fn label_capacity() -> usize {
    ((CANVAS_SIZE - 2 * BORDER - 1) * 3) as usize
}

fn placeholder_png(prompt: &str, label: &str) -> Result<String> {
    let swatch = color_from_prompt(prompt);
    let swatch_start = (CANVAS_SIZE - SWATCH_SIZE) / 2;
    let swatch_end = swatch_start + SWATCH_SIZE;
    let mut canvas = RgbImage::from_fn(CANVAS_SIZE, CANVAS_SIZE, |x, y| {
        let on_border = x < BORDER
            || y < BORDER
            || x >= CANVAS_SIZE - BORDER
            || y >= CANVAS_SIZE - BORDER;
        let in_swatch =
            (swatch_start..swatch_end).contains(&x) && (swatch_start..swatch_end).contains(&y);
        if on_border {
            FOREGROUND
        } else if in_swatch {
            swatch
        } else {
            BACKGROUND
        }
    });
    write_label(&mut canvas, label);

    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed encoding placeholder image")?;
    Ok(encode_base64(&bytes))
}

fn write_label(canvas: &mut RgbImage, label: &str) {
    let mut bytes = label.as_bytes().to_vec();
    let capacity = label_capacity();
    if bytes.len() > capacity {
        let mut end = capacity;
        while !label.is_char_boundary(end) {
            end -= 1;
        }
        bytes.truncate(end);
    }
    let len = bytes.len() as u16;
    let [len_hi, len_lo] = len.to_be_bytes();
    canvas.put_pixel(BORDER, LABEL_ROW, Rgb([len_hi, len_lo, LABEL_MARKER]));
    for (offset, chunk) in bytes.chunks(3).enumerate() {
        let mut channels = [0u8; 3];
        channels[..chunk.len()].copy_from_slice(chunk);
        canvas.put_pixel(BORDER + 1 + offset as u32, LABEL_ROW, Rgb(channels));
    }
}

pub fn read_placeholder_label(data: &str) -> Option<String> {
    let bytes = decode_base64(data).ok()?;
    let canvas = image::load_from_memory(&bytes).ok()?.to_rgb8();
    if canvas.dimensions() != (CANVAS_SIZE, CANVAS_SIZE) {
        return None;
    }
    let Rgb([len_hi, len_lo, marker]) = *canvas.get_pixel(BORDER, LABEL_ROW);
    if marker != LABEL_MARKER {
        return None;
    }
    let len = u16::from_be_bytes([len_hi, len_lo]) as usize;
    if len > label_capacity() {
        return None;
    }
    let label: Vec<u8> = (0..len.div_ceil(3))
        .flat_map(|offset| canvas.get_pixel(BORDER + 1 + offset as u32, LABEL_ROW).0)
        .take(len)
        .collect();
    String::from_utf8(label).ok()
}

#[cfg(test)]
mod tests {
    use rehab_contracts::prompts::{master_prompt, COMPREHENSIVE_TITLE};

    use super::*;

    #[test]
    fn placeholder_carries_mock_label() -> Result<()> {
        let client = DryrunClient::new();
        let data = client.transform_image("Make it \"pop\" please", &ImagePart::png("eA=="))?;
        assert_eq!(
            read_placeholder_label(&data).as_deref(),
            Some("Mock Image for: \"Make it pop please...\"")
        );

        let bytes = decode_base64(&data)?;
        assert_eq!(image::guess_format(&bytes)?, ImageFormat::Png);
        let canvas = image::load_from_memory(&bytes)?.to_rgb8();
        assert_eq!(canvas.dimensions(), (512, 512));
        assert_eq!(*canvas.get_pixel(0, 0), FOREGROUND);
        assert_eq!(*canvas.get_pixel(100, 100), BACKGROUND);
        Ok(())
    }

    #[test]
    fn long_prompts_are_cut_to_fifty_chars() -> Result<()> {
        let prompt = master_prompt(COMPREHENSIVE_TITLE)
            .map(|entry| entry.prompt)
            .unwrap_or_default();
        let client = DryrunClient::new();
        let label = read_placeholder_label(&client.transform_composite(prompt, &[])?)
            .unwrap_or_default();
        let head: String = prompt.chars().take(50).collect();
        assert_eq!(
            label,
            format!("Mock Composite for: \"{}...\"", head.replace('"', ""))
        );
        Ok(())
    }

    #[test]
    fn swatch_color_depends_on_prompt() -> Result<()> {
        let client = DryrunClient::new();
        let first = decode_base64(&client.transform_image("one", &ImagePart::png("eA=="))?)?;
        let second = decode_base64(&client.transform_image("two", &ImagePart::png("eA=="))?)?;
        let centre = |bytes: &[u8]| -> Result<Rgb<u8>> {
            Ok(*image::load_from_memory(bytes)?.to_rgb8().get_pixel(256, 256))
        };
        assert_eq!(centre(&first)?, color_from_prompt("one"));
        assert_ne!(centre(&first)?, centre(&second)?);
        Ok(())
    }

    #[test]
    fn canned_detection_has_one_face() -> Result<()> {
        let detection = DryrunClient::new().detect_faces(&ImagePart::png("eA=="))?;
        assert_eq!(detection.faces.len(), 1);
        assert_eq!(detection.faces[0].description, "mock person on the left");
        assert_eq!(detection.faces[0].bounding_box.height, 240);
        assert!(DryrunClient::new().is_simulated());
        Ok(())
    }

    #[test]
    fn foreign_images_have_no_label() {
        assert_eq!(read_placeholder_label("not base64!"), None);
        assert_eq!(read_placeholder_label(""), None);
    }
}
