use anyhow::Result;
use rehab_contracts::assets::{FaceDetection, ImagePart};
use rehab_contracts::prompts::FACE_DETECTION_PROMPT;
use serde_json::{json, Value};

use crate::error::GenerationError;

/// Image operations return the first image part of the response as base64.
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    fn is_simulated(&self) -> bool {
        false
    }

    fn transform_image(&self, prompt: &str, image: &ImagePart) -> Result<String>;

    fn extract_structured(&self, prompt: &str, image: &ImagePart, schema: &Value) -> Result<Value>;

    fn transform_composite(&self, prompt: &str, images: &[ImagePart]) -> Result<String>;

    fn detect_faces(&self, image: &ImagePart) -> Result<FaceDetection> {
        let value = self.extract_structured(FACE_DETECTION_PROMPT, image, &face_detection_schema())?;
        serde_json::from_value(value)
            .map_err(|err| GenerationError::MalformedResponse(err.to_string()).into())
    }
}

pub fn face_detection_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "faces": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "description": { "type": "STRING" },
                        "boundingBox": {
                            "type": "OBJECT",
                            "properties": {
                                "x": { "type": "INTEGER" },
                                "y": { "type": "INTEGER" },
                                "width": { "type": "INTEGER" },
                                "height": { "type": "INTEGER" }
                            },
                            "required": ["x", "y", "width", "height"]
                        }
                    },
                    "required": ["description", "boundingBox"]
                }
            }
        },
        "required": ["faces"]
    })
}
