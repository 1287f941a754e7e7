pub mod cancel;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod kalman_filter;
pub mod materialize;
pub mod model;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod utils;
pub mod visualization;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use crate::cancel::CancelToken;
pub use crate::config::{Config, Profile};
pub use crate::detection::{Detection, Detector};
pub use crate::engine::{DetectionEngine, EngineLoader, TorchLoader};
pub use crate::error::{Result, StudioError};
pub use crate::ingest::UploadedArtifact;
pub use crate::materialize::OpenCvTranscoder;
pub use crate::session::{ExecutionReport, Notice, NoticeLevel, RunState, Session};
pub use crate::storage::ArtifactKind;
pub use crate::tracker::{STrack, Tracker};
