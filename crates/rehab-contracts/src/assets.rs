use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePart {
    pub data: String,
    pub mime_type: String,
}

impl ImagePart {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Generated outputs are always handed back to the model as PNG.
    pub fn png(data: impl Into<String>) -> Self {
        Self::new(data, "image/png")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationAsset {
    pub title: String,
    pub prompt: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceCloseupAsset {
    pub id: u32,
    pub title: String,
    pub prompt: String,
    pub data: String,
    pub description: String,
    pub original_cropped_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequestLogEntry {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDescriptor {
    pub description: String,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceDetection {
    #[serde(default)]
    pub faces: Vec<FaceDescriptor>,
}

pub fn restoration_filename(asset: &RestorationAsset) -> String {
    format!("{}.png", normalize_entry_name(&asset.title))
}

pub fn closeup_filename(face: &FaceCloseupAsset) -> String {
    let base = if face.description.trim().is_empty() {
        face.title.clone()
    } else {
        format!("closeup_{}", face.description)
    };
    format!("{}.png", normalize_entry_name(&base))
}

/// Non-alphanumerics become `_`, runs of `_` collapse, result is lower-cased.
pub fn normalize_entry_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '_' {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out
}
