use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::{ApiRequestLogEntry, FaceCloseupAsset, ImagePart, RestorationAsset};
use crate::prompts::FACE_CLOSEUP_TITLE;

pub const SNAPSHOT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub schema_version: u64,
    pub original_image: Option<String>,
    #[serde(default)]
    pub original_mime_type: String,
    #[serde(default)]
    pub restoration_results: Vec<RestorationAsset>,
    #[serde(default)]
    pub face_closeups: Vec<FaceCloseupAsset>,
    #[serde(default)]
    pub api_request_log: Vec<ApiRequestLogEntry>,
    #[serde(default)]
    pub color_palette: Option<Value>,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitKey {
    Restoration(String),
    FaceDetection,
    Face(u32),
    Transplant,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKey::Restoration(title) => write!(f, "{title}"),
            UnitKey::FaceDetection => f.write_str(FACE_CLOSEUP_TITLE),
            UnitKey::Face(id) => write!(f, "Face {id}"),
            UnitKey::Transplant => write!(f, "Face Transplant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Idle,
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Uploaded(ImagePart),
    Reset,
    UnitStarted(UnitKey),
    UnitFinished { key: UnitKey, succeeded: bool },
    RequestLogged { kind: String, timestamp: String },
    RestorationStored(RestorationAsset),
    FacesCleared,
    FaceStored(FaceCloseupAsset),
    FaceImageReplaced { id: u32, data: String },
    ErrorRaised(String),
    ErrorCleared,
    PaletteSet(Option<Value>),
    Restored(SessionSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The event belonged to a session that has since been reset or replaced.
    StaleEpoch,
    AlreadyPending(UnitKey),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    epoch: u64,
    original: Option<ImagePart>,
    restoration_results: Vec<RestorationAsset>,
    face_closeups: Vec<FaceCloseupAsset>,
    api_request_log: Vec<ApiRequestLogEntry>,
    color_palette: Option<Value>,
    error_message: String,
    units: IndexMap<UnitKey, UnitStatus>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn original(&self) -> Option<&ImagePart> {
        self.original.as_ref()
    }

    pub fn restoration_results(&self) -> &[RestorationAsset] {
        &self.restoration_results
    }

    pub fn restoration(&self, title: &str) -> Option<&RestorationAsset> {
        self.restoration_results
            .iter()
            .find(|asset| asset.title == title)
    }

    pub fn face_closeups(&self) -> &[FaceCloseupAsset] {
        &self.face_closeups
    }

    pub fn face(&self, id: u32) -> Option<&FaceCloseupAsset> {
        self.face_closeups.iter().find(|face| face.id == id)
    }

    pub fn api_request_log(&self) -> &[ApiRequestLogEntry] {
        &self.api_request_log
    }

    pub fn color_palette(&self) -> Option<&Value> {
        self.color_palette.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        Some(self.error_message.as_str()).filter(|message| !message.is_empty())
    }

    pub fn unit_status(&self, key: &UnitKey) -> UnitStatus {
        self.units.get(key).copied().unwrap_or(UnitStatus::Idle)
    }

    pub fn pending_units(&self) -> Vec<UnitKey> {
        self.units
            .iter()
            .filter(|(_, status)| **status == UnitStatus::Pending)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Applies an event stamped with `epoch`; events from an older epoch are dropped.
    pub fn apply_at(&mut self, epoch: u64, event: SessionEvent) -> Applied {
        if epoch != self.epoch {
            return Applied::StaleEpoch;
        }
        self.apply(event)
    }

    pub fn apply(&mut self, event: SessionEvent) -> Applied {
        match event {
            SessionEvent::Uploaded(image) => {
                self.clear();
                self.original = Some(image);
            }
            SessionEvent::Reset => self.clear(),
            SessionEvent::UnitStarted(key) => {
                if self.unit_status(&key) == UnitStatus::Pending {
                    return Applied::AlreadyPending(key);
                }
                self.units.insert(key, UnitStatus::Pending);
            }
            SessionEvent::UnitFinished { key, succeeded } => {
                let status = if succeeded {
                    UnitStatus::Succeeded
                } else {
                    UnitStatus::Failed
                };
                self.units.insert(key, status);
            }
            SessionEvent::RequestLogged { kind, timestamp } => {
                let id = self.api_request_log.len() as u64 + 1;
                self.api_request_log.push(ApiRequestLogEntry {
                    id,
                    kind,
                    timestamp,
                });
            }
            SessionEvent::RestorationStored(asset) => {
                match self
                    .restoration_results
                    .iter()
                    .position(|existing| existing.title == asset.title)
                {
                    Some(idx) => self.restoration_results[idx] = asset,
                    None => self.restoration_results.push(asset),
                }
            }
            SessionEvent::FacesCleared => self.face_closeups.clear(),
            SessionEvent::FaceStored(face) => {
                match self
                    .face_closeups
                    .iter()
                    .position(|existing| existing.id == face.id)
                {
                    Some(idx) => self.face_closeups[idx] = face,
                    None => self.face_closeups.push(face),
                }
                self.face_closeups.sort_by_key(|face| face.id);
            }
            SessionEvent::FaceImageReplaced { id, data } => {
                if let Some(face) = self.face_closeups.iter_mut().find(|face| face.id == id) {
                    face.data = data;
                }
            }
            SessionEvent::ErrorRaised(message) => self.error_message = message,
            SessionEvent::ErrorCleared => self.error_message.clear(),
            SessionEvent::PaletteSet(palette) => self.color_palette = palette,
            SessionEvent::Restored(snapshot) => {
                self.clear();
                self.original = snapshot
                    .original_image
                    .map(|data| ImagePart::new(data, snapshot.original_mime_type));
                self.restoration_results = snapshot.restoration_results;
                self.face_closeups = snapshot.face_closeups;
                self.face_closeups.sort_by_key(|face| face.id);
                self.api_request_log = snapshot.api_request_log;
                self.color_palette = snapshot.color_palette;
                self.error_message = snapshot.error_message;
            }
        }
        Applied::Applied
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            original_image: self.original.as_ref().map(|image| image.data.clone()),
            original_mime_type: self
                .original
                .as_ref()
                .map(|image| image.mime_type.clone())
                .unwrap_or_default(),
            restoration_results: self.restoration_results.clone(),
            face_closeups: self.face_closeups.clone(),
            api_request_log: self.api_request_log.clone(),
            color_palette: self.color_palette.clone(),
            error_message: self.error_message.clone(),
        }
    }

    fn clear(&mut self) {
        let epoch = self.epoch + 1;
        *self = Self::default();
        self.epoch = epoch;
    }
}
