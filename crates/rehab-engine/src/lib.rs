mod client;
mod codec;
mod config;
mod dryrun;
mod error;
mod export;
mod gemini;
mod orchestrator;

pub use client::{face_detection_schema, GenerationClient};
pub use codec::{
    crop_square_region, decode_base64, encode_base64, read_image_file, square_crop_rect,
    CropRect,
};
pub use config::EngineConfig;
pub use dryrun::{read_placeholder_label, DryrunClient};
pub use error::{classify_error, error_chain_text, user_message, ErrorKind, GenerationError};
pub use export::{export_archive, ArchiveSummary, DEFAULT_ARCHIVE_NAME};
pub use gemini::GeminiClient;
pub use orchestrator::{
    client_for_mode, BatchSummary, FaceSummary, Orchestrator, OrchestratorOptions,
    DEFAULT_API_DELAY,
};
