use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use rehab_contracts::assets::{
    FaceCloseupAsset, FaceDescriptor, ImagePart, RestorationAsset,
};
use rehab_contracts::events::{now_utc_iso, EventKind, EventPayload, EventWriter};
use rehab_contracts::prompts::{
    face_closeup_prompt, face_transplant_prompt, master_prompt, MASTER_PROMPTS,
    TRANSPLANT_TITLE, ULTIMATE_REMASTER_TITLE,
};
use rehab_contracts::session::{
    Applied, SessionEvent, SessionSnapshot, SessionState, UnitKey,
};
use rehab_contracts::storage::{SessionLoad, SessionStore};
use serde_json::{json, Map, Value};

use crate::client::GenerationClient;
use crate::codec::{crop_square_region, read_image_file};
use crate::config::EngineConfig;
use crate::dryrun::DryrunClient;
use crate::error::{classify_error, error_chain_text, user_message, ErrorKind, GenerationError};
use crate::export::{export_archive, ArchiveSummary};
use crate::gemini::GeminiClient;

pub const DEFAULT_API_DELAY: Duration = Duration::from_millis(1000);

const NO_FACES_MESSAGE: &str =
    "Couldn't find any faces to work with. Try a photo where the people are in the foreground.";

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub api_delay: Duration,
    pub events: Option<EventWriter>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            api_delay: DEFAULT_API_DELAY,
            events: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceSummary {
    pub detected: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub fn client_for_mode(test_mode: bool, config: &EngineConfig) -> Arc<dyn GenerationClient> {
    if test_mode {
        Arc::new(DryrunClient::with_simulated_latency())
    } else {
        Arc::new(GeminiClient::new(config))
    }
}

/// The session mutex is never held across a network call. Each unit is
/// stamped with the epoch it started in and its completions are dropped if
/// the session was reset or replaced in the meantime.
pub struct Orchestrator {
    client: Arc<dyn GenerationClient>,
    api_delay: Duration,
    events: Option<EventWriter>,
    state: Mutex<SessionState>,
}

struct UnitGuard<'a> {
    orchestrator: &'a Orchestrator,
    key: UnitKey,
    epoch: u64,
    started: Instant,
    succeeded: bool,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.orchestrator.state.lock() {
            state.apply_at(
                self.epoch,
                SessionEvent::UnitFinished {
                    key: self.key.clone(),
                    succeeded: self.succeeded,
                },
            );
        }
    }
}

impl Orchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, options: OrchestratorOptions) -> Result<Self> {
        let orchestrator = Self {
            client,
            api_delay: options.api_delay,
            events: options.events,
            state: Mutex::new(SessionState::new()),
        };
        orchestrator.emit(
            EventKind::SessionStarted,
            json!({
                "client": orchestrator.client.name(),
                "simulated": orchestrator.client.is_simulated(),
                "api_delay_ms": orchestrator.api_delay.as_millis() as u64,
            }),
        )?;
        Ok(orchestrator)
    }

    pub fn is_simulated(&self) -> bool {
        self.client.is_simulated()
    }

    pub fn state(&self) -> Result<SessionState> {
        Ok(self.lock()?.clone())
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        Ok(self.lock()?.snapshot())
    }

    pub fn upload(&self, image: ImagePart) -> Result<()> {
        let payload = json!({
            "mime_type": image.mime_type,
            "base64_len": image.data.len(),
        });
        self.lock()?.apply(SessionEvent::Uploaded(image));
        self.emit(EventKind::ImageUploaded, payload)
    }

    pub fn upload_file(&self, path: &Path) -> Result<()> {
        let image = read_image_file(path)?;
        self.upload(image)
    }

    /// In-flight units keep running but their completions are discarded.
    pub fn reset(&self) -> Result<()> {
        let epoch = {
            let mut state = self.lock()?;
            state.apply(SessionEvent::Reset);
            state.epoch()
        };
        self.emit(EventKind::SessionReset, json!({ "epoch": epoch }))
    }

    pub fn restore_snapshot(&self, snapshot: SessionSnapshot) -> Result<()> {
        let payload = json!({
            "restorations": snapshot.restoration_results.len(),
            "faces": snapshot.face_closeups.len(),
            "requests": snapshot.api_request_log.len(),
        });
        self.lock()?.apply(SessionEvent::Restored(snapshot));
        self.emit(EventKind::SessionLoaded, payload)
    }

    pub fn set_color_palette(&self, palette: Option<Value>) -> Result<()> {
        self.lock()?.apply(SessionEvent::PaletteSet(palette));
        Ok(())
    }

    pub fn save_session(&self, store: &SessionStore) -> Result<bool> {
        let snapshot = self.snapshot()?;
        let saved = store.save(&snapshot)?;
        if saved {
            self.emit(
                EventKind::SessionSaved,
                json!({
                    "restorations": snapshot.restoration_results.len(),
                    "faces": snapshot.face_closeups.len(),
                    "requests": snapshot.api_request_log.len(),
                }),
            )?;
        }
        Ok(saved)
    }

    pub fn load_session(&self, store: &SessionStore) -> Result<bool> {
        match store.load()? {
            SessionLoad::Absent => Ok(false),
            SessionLoad::Restored(snapshot) => {
                self.restore_snapshot(snapshot)?;
                Ok(true)
            }
            SessionLoad::Discarded(reason) => {
                self.emit(EventKind::SessionDiscarded, json!({ "reason": reason }))?;
                self.reset()?;
                Ok(false)
            }
        }
    }

    pub fn export(&self, out_path: &Path) -> Result<ArchiveSummary> {
        let summary = export_archive(&self.snapshot()?, out_path)?;
        self.emit(
            EventKind::ArchiveExported,
            json!({
                "path": summary.path.to_string_lossy().to_string(),
                "entries": summary.entries,
            }),
        )?;
        Ok(summary)
    }

    pub fn restore(&self, title: &str) -> Result<RestorationAsset> {
        let master =
            master_prompt(title).ok_or_else(|| anyhow!("unknown master prompt '{title}'"))?;
        self.run_unit(UnitKey::Restoration(master.title.to_string()), None, |epoch| {
            let original = self.require_original()?;
            let data = self.dispatch(epoch, master.title, |client| {
                client.transform_image(master.prompt, &original)
            })?;
            let asset = RestorationAsset {
                title: master.title.to_string(),
                prompt: master.prompt.to_string(),
                data,
            };
            self.commit(epoch, SessionEvent::RestorationStored(asset.clone()))?;
            Ok(asset)
        })
    }

    pub fn iterate(&self, title: &str) -> Result<RestorationAsset> {
        if title == TRANSPLANT_TITLE {
            return self.iterate_transplant();
        }
        let master =
            master_prompt(title).ok_or_else(|| anyhow!("unknown master prompt '{title}'"))?;
        self.run_unit(UnitKey::Restoration(master.title.to_string()), None, |epoch| {
            let current = self.lock()?.restoration(master.title).cloned().ok_or_else(|| {
                GenerationError::PreconditionFailed(format!(
                    "there is no '{}' result to iterate on yet",
                    master.title
                ))
            })?;
            let input = ImagePart::png(current.data);
            let data = self.dispatch(epoch, &format!("Iterate: {}", master.title), |client| {
                client.transform_image(&current.prompt, &input)
            })?;
            let asset = RestorationAsset {
                title: current.title,
                prompt: current.prompt,
                data,
            };
            self.commit(epoch, SessionEvent::RestorationStored(asset.clone()))?;
            Ok(asset)
        })
    }

    /// Serial, catalog order. A failed item does not stop the rest; the last
    /// failure is raised again once the batch ends.
    pub fn generate_all_missing(&self) -> Result<BatchSummary> {
        let epoch = {
            let state = self.lock()?;
            if state.original().is_none() {
                drop(state);
                return Err(self.precondition("Upload a photo before generating restorations."));
            }
            state.epoch()
        };

        let mut summary = BatchSummary::default();
        for master in MASTER_PROMPTS {
            let done = {
                let state = self.lock()?;
                if state.epoch() != epoch {
                    break;
                }
                state.restoration(master.title).is_some()
            };
            if done {
                summary.skipped += 1;
                continue;
            }
            match self.restore(master.title) {
                Ok(_) => {
                    summary.attempted += 1;
                    summary.succeeded += 1;
                }
                Err(err) if classify_error(&err) == ErrorKind::AlreadyPending => {
                    summary.skipped += 1;
                }
                Err(err) => {
                    summary.attempted += 1;
                    summary.failed += 1;
                    summary.last_error = Some(user_message(master.title, &err));
                }
            }
        }
        if let Some(message) = &summary.last_error {
            self.lock()?
                .apply_at(epoch, SessionEvent::ErrorRaised(message.clone()));
        }
        Ok(summary)
    }

    pub fn generate_face_closeups(&self) -> Result<FaceSummary> {
        self.run_unit(UnitKey::FaceDetection, None, |epoch| {
            let original = self.require_original()?;
            self.commit(epoch, SessionEvent::FacesCleared)?;
            let detection = self.dispatch(epoch, "Detect Faces", |client| {
                client.detect_faces(&original)
            })?;
            let faces = detection.faces;
            self.emit_from_unit(
                EventKind::FacesDetected,
                json!({
                    "count": faces.len(),
                    "descriptions": faces.iter().map(|face| face.description.as_str()).collect::<Vec<_>>(),
                }),
            );

            let mut summary = FaceSummary {
                detected: faces.len(),
                ..FaceSummary::default()
            };
            if faces.is_empty() {
                self.commit(epoch, SessionEvent::ErrorRaised(NO_FACES_MESSAGE.to_string()))?;
                return Ok(summary);
            }

            let outcomes: Vec<bool> = thread::scope(|scope| {
                let handles: Vec<_> = faces
                    .iter()
                    .enumerate()
                    .map(|(index, face)| {
                        let original = &original;
                        scope.spawn(move || {
                            self.generate_closeup(epoch, index as u32 + 1, face, original)
                                .is_ok()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or(false))
                    .collect()
            });
            summary.succeeded = outcomes.iter().filter(|ok| **ok).count();
            summary.failed = outcomes.len() - summary.succeeded;
            Ok(summary)
        })
    }

    pub fn regenerate_face(&self, id: u32) -> Result<FaceCloseupAsset> {
        self.run_unit(UnitKey::Face(id), None, |epoch| {
            let original = self.require_original()?;
            let face = self.lock()?.face(id).cloned().ok_or_else(|| {
                GenerationError::PreconditionFailed(format!("there is no face close-up with id {id}"))
            })?;
            let data = self.dispatch(epoch, &format!("Regen Face {id}"), |client| {
                client.transform_image(&face.prompt, &original)
            })?;
            self.commit(
                epoch,
                SessionEvent::FaceImageReplaced {
                    id,
                    data: data.clone(),
                },
            )?;
            Ok(FaceCloseupAsset { data, ..face })
        })
    }

    pub fn transplant(&self) -> Result<RestorationAsset> {
        self.run_transplant(ULTIMATE_REMASTER_TITLE, TRANSPLANT_TITLE)
    }

    pub fn iterate_transplant(&self) -> Result<RestorationAsset> {
        self.run_transplant(TRANSPLANT_TITLE, "Iterate on Transplant")
    }

    fn run_transplant(&self, base_title: &str, log_kind: &str) -> Result<RestorationAsset> {
        self.run_unit(UnitKey::Transplant, None, |epoch| {
            let (base, faces) = {
                let state = self.lock()?;
                (
                    state.restoration(base_title).cloned(),
                    state.face_closeups().to_vec(),
                )
            };
            let Some(base) = base.filter(|_| !faces.is_empty()) else {
                bail!(GenerationError::PreconditionFailed(format!(
                    "Can't perform transplant. You need the '{base_title}' result and at least one face close-up."
                )));
            };

            let descriptions: Vec<String> =
                faces.iter().map(|face| face.description.clone()).collect();
            let prompt = face_transplant_prompt(&descriptions);
            let mut images = Vec::with_capacity(faces.len() + 1);
            images.push(ImagePart::png(base.data));
            images.extend(faces.into_iter().map(|face| ImagePart::png(face.data)));

            let data = self.dispatch(epoch, log_kind, |client| {
                client.transform_composite(&prompt, &images)
            })?;
            let asset = RestorationAsset {
                title: TRANSPLANT_TITLE.to_string(),
                prompt,
                data,
            };
            self.commit(epoch, SessionEvent::RestorationStored(asset.clone()))?;
            Ok(asset)
        })
    }

    fn generate_closeup(
        &self,
        epoch: u64,
        id: u32,
        face: &FaceDescriptor,
        original: &ImagePart,
    ) -> Result<()> {
        self.run_unit(UnitKey::Face(id), Some(epoch), |epoch| {
            let original_cropped_data = crop_square_region(original, &face.bounding_box)?;
            let prompt = face_closeup_prompt(&face.description);
            let data = self.dispatch(epoch, &format!("Face {id} Close-up"), |client| {
                client.transform_image(&prompt, original)
            })?;
            self.commit(
                epoch,
                SessionEvent::FaceStored(FaceCloseupAsset {
                    id,
                    title: format!("Face {id}: {}", face.description),
                    prompt,
                    data,
                    description: face.description.clone(),
                    original_cropped_data,
                }),
            )?;
            Ok(())
        })
    }

    /// Nested units pass the parent's epoch and leave the banner alone on
    /// start so a sibling's failure stays visible.
    fn run_unit<T>(
        &self,
        key: UnitKey,
        parent_epoch: Option<u64>,
        body: impl FnOnce(u64) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.begin(key, parent_epoch)?;
        let unit = guard.key.to_string();
        match body(guard.epoch) {
            Ok(value) => {
                guard.succeeded = true;
                self.emit_from_unit(
                    EventKind::UnitSucceeded,
                    json!({
                        "unit": unit,
                        "latency_ms": guard.started.elapsed().as_millis() as u64,
                    }),
                );
                Ok(value)
            }
            Err(err) => {
                let message = user_message(&unit, &err);
                if let Ok(mut state) = self.state.lock() {
                    state.apply_at(guard.epoch, SessionEvent::ErrorRaised(message));
                }
                self.emit_from_unit(
                    EventKind::UnitFailed,
                    json!({
                        "unit": unit,
                        "kind": format!("{:?}", classify_error(&err)),
                        "error": error_chain_text(&err, 2048),
                    }),
                );
                Err(err)
            }
        }
    }

    fn begin(&self, key: UnitKey, parent_epoch: Option<u64>) -> Result<UnitGuard<'_>> {
        let epoch = {
            let mut state = self.lock()?;
            let epoch = parent_epoch.unwrap_or_else(|| state.epoch());
            match state.apply_at(epoch, SessionEvent::UnitStarted(key.clone())) {
                Applied::Applied => {}
                Applied::AlreadyPending(key) => {
                    bail!(GenerationError::AlreadyPending(key.to_string()))
                }
                Applied::StaleEpoch => bail!("session was reset before '{key}' could start"),
            }
            if parent_epoch.is_none() {
                state.apply(SessionEvent::ErrorCleared);
            }
            epoch
        };
        self.emit_from_unit(
            EventKind::UnitStarted,
            json!({ "unit": key.to_string(), "epoch": epoch }),
        );
        Ok(UnitGuard {
            orchestrator: self,
            key,
            epoch,
            started: Instant::now(),
            succeeded: false,
        })
    }

    fn dispatch<T>(
        &self,
        epoch: u64,
        kind: &str,
        call: impl FnOnce(&dyn GenerationClient) -> Result<T>,
    ) -> Result<T> {
        if !self.api_delay.is_zero() {
            thread::sleep(self.api_delay);
        }
        let kind = if self.client.is_simulated() {
            format!("[TEST] {kind}")
        } else {
            kind.to_string()
        };
        let applied = self.lock()?.apply_at(
            epoch,
            SessionEvent::RequestLogged {
                kind: kind.clone(),
                timestamp: now_utc_iso(),
            },
        );
        if applied == Applied::StaleEpoch {
            bail!("session was reset before '{kind}' was sent");
        }
        self.emit_from_unit(
            EventKind::ApiRequest,
            json!({ "kind": kind, "client": self.client.name() }),
        );
        call(self.client.as_ref())
    }

    fn commit(&self, epoch: u64, event: SessionEvent) -> Result<()> {
        let applied = self.lock()?.apply_at(epoch, event);
        if applied == Applied::StaleEpoch {
            self.emit_from_unit(EventKind::StaleCompletionDropped, json!({ "epoch": epoch }));
        }
        Ok(())
    }

    fn require_original(&self) -> Result<ImagePart> {
        self.lock()?.original().cloned().ok_or_else(|| {
            GenerationError::PreconditionFailed("Upload a photo first.".to_string()).into()
        })
    }

    fn precondition(&self, message: &str) -> anyhow::Error {
        if let Ok(mut state) = self.state.lock() {
            state.apply(SessionEvent::ErrorRaised(message.to_string()));
        }
        GenerationError::PreconditionFailed(message.to_string()).into()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("session state lock poisoned"))
    }

    fn emit(&self, kind: EventKind, payload: Value) -> Result<()> {
        let Some(events) = &self.events else {
            return Ok(());
        };
        let mut payload = map_object(payload);
        if !payload.contains_key("epoch") {
            let epoch = self.lock()?.epoch();
            payload.insert("epoch".to_string(), Value::from(epoch));
        }
        events.emit(kind, payload)?;
        Ok(())
    }

    // A unit's outcome never depends on the event log.
    fn emit_from_unit(&self, kind: EventKind, payload: Value) {
        if let Err(err) = self.emit(kind, payload) {
            eprintln!("rehab-rs warning: failed writing {kind} event: {err:#}");
        }
    }
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
