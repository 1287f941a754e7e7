//! One user's working context: the active model, image and video, and the
//! collaborators needed to run them.

use crate::cancel::CancelToken;
use crate::config::{Config, MaterializeMode};
use crate::engine::{AnnotatedImage, EngineLoader, TrackOptions};
use crate::error::{Result, StudioError};
use crate::ingest::{ingest, PersistedFile, UploadedArtifact};
use crate::materialize::{relocate, transcode_raw_output, Transcoder};
use crate::model::{load_model, ModelHandle};
use crate::pipeline::{detect_image, detect_video};
use crate::storage::{ArtifactKind, StorageLayout};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Progress of a single video run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Uploaded,
    ModelLoaded,
    Detecting,
    RawOutputProduced,
    Relocated,
    Transcoded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Relocated | RunState::Transcoded | RunState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub state: RunState,
    /// The user-facing video, present only in a successful terminal state.
    pub output: Option<PathBuf>,
    pub raw_output: Option<PathBuf>,
    pub frames: u64,
    pub transitions: Vec<RunState>,
}

impl VideoOutcome {
    fn start() -> Self {
        Self {
            state: RunState::Idle,
            output: None,
            raw_output: None,
            frames: 0,
            transitions: vec![RunState::Idle],
        }
    }

    fn advance(&mut self, next: RunState) {
        self.state = next;
        self.transitions.push(next);
    }
}

/// Everything one press of "Execute" produced.
#[derive(Default)]
pub struct ExecutionReport {
    pub images: Vec<AnnotatedImage>,
    pub video: Option<VideoOutcome>,
    pub notices: Vec<Notice>,
    /// True when nothing ran because no valid model was loaded.
    pub skipped: bool,
}

pub struct Session {
    config: Config,
    layout: StorageLayout,
    loader: Box<dyn EngineLoader>,
    transcoder: Box<dyn Transcoder>,
    model: Option<ModelHandle>,
    image: Option<PersistedFile>,
    video: Option<PersistedFile>,
    pending: Vec<Notice>,
}

impl Session {
    /// Create the working directories and an empty session.
    pub fn new(
        config: Config,
        loader: Box<dyn EngineLoader>,
        transcoder: Box<dyn Transcoder>,
    ) -> Result<Self> {
        let layout = StorageLayout::new(&config.storage);
        layout.ensure()?;
        info!(root = %layout.root().display(), results = %layout.results_dir().display(), "session ready");
        Ok(Self {
            config,
            layout,
            loader,
            transcoder,
            model: None,
            image: None,
            video: None,
            pending: Vec::new(),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn active_image(&self) -> Option<&PersistedFile> {
        self.image.as_ref()
    }

    pub fn active_video(&self) -> Option<&PersistedFile> {
        self.video.as_ref()
    }

    fn accepts(&self, artifact: &UploadedArtifact) -> bool {
        match artifact.kind {
            ArtifactKind::Video => artifact.has_extension_in(&self.config.video.accepted_extensions),
            kind => artifact.has_extension_in(kind.default_extensions()),
        }
    }

    /// Persist an upload and make it the active file of its kind. A model is
    /// loaded straight away; the outcome is reported on the next execution.
    pub fn upload(&mut self, artifact: &UploadedArtifact) -> Result<PersistedFile> {
        if !self.accepts(artifact) {
            return Err(StudioError::UnsupportedExtension {
                name: artifact.name.clone(),
                kind: artifact.kind.label(),
            });
        }

        let file = ingest(artifact, self.layout.dir_for(artifact.kind))?;
        match file.kind {
            ArtifactKind::Image => self.image = Some(file.clone()),
            ArtifactKind::Video => self.video = Some(file.clone()),
            ArtifactKind::Model => {
                let handle = load_model(self.loader.as_ref(), &file);
                let notice = match handle.error() {
                    None => Notice::info(format!("model {} loaded", artifact.name)),
                    Some(message) => Notice::error(format!("error loading model: {}", message)),
                };
                self.pending.push(notice);
                self.model = Some(handle);
            }
        }
        Ok(file)
    }

    /// Run detection on the active image and tracking on the active video.
    /// Without a valid model this does nothing. The configured video timeout
    /// starts when tracking does. On error, undelivered notices are kept for
    /// the next execution.
    pub fn execute(&mut self, cancel: &CancelToken) -> Result<ExecutionReport> {
        let mut report = ExecutionReport {
            notices: std::mem::take(&mut self.pending),
            ..ExecutionReport::default()
        };
        if let Err(e) = self.run(cancel, &mut report) {
            self.pending = std::mem::take(&mut report.notices);
            return Err(e);
        }
        Ok(report)
    }

    fn run(&mut self, cancel: &CancelToken, report: &mut ExecutionReport) -> Result<()> {
        let model = match self.model.as_mut() {
            Some(model) if model.is_valid() => model,
            _ => {
                info!("no valid model, execution skipped");
                report.skipped = true;
                return Ok(());
            }
        };

        if let Some(image) = &self.image {
            report.images = detect_image(model, image)?.collect::<Result<Vec<_>>>()?;
            info!(count = report.images.len(), "images annotated");
        }

        if let Some(video) = &self.video {
            let mut outcome = VideoOutcome::start();
            outcome.advance(RunState::Uploaded);
            outcome.advance(RunState::ModelLoaded);
            outcome.advance(RunState::Detecting);

            let options = TrackOptions::under(self.layout.root());
            let tracking = cancel.armed(self.config.video.timeout_secs);
            let run = detect_video(model, video, &options, &tracking)?;
            outcome.frames = run.frames;
            if run.distinct_outputs.len() > 1 {
                report.notices.push(Notice::info(format!(
                    "tracking produced {} output files, keeping the last",
                    run.distinct_outputs.len()
                )));
            }

            match (run.raw_output, run.save_dir) {
                (Some(raw), Some(save_dir)) => {
                    outcome.advance(RunState::RawOutputProduced);
                    outcome.raw_output = Some(raw.clone());
                    self.materialize(&raw, &save_dir, &mut outcome, &mut report.notices);
                }
                _ => {
                    warn!(video = %video.path.display(), "tracking produced no output");
                    report.notices.push(Notice::error("tracking produced no video output"));
                    outcome.advance(RunState::Failed);
                }
            }
            report.video = Some(outcome);
        }

        Ok(())
    }

    fn materialize(
        &self,
        raw: &Path,
        save_dir: &Path,
        outcome: &mut VideoOutcome,
        notices: &mut Vec<Notice>,
    ) {
        let video = &self.config.video;
        let results = self.layout.results_dir();
        let (attempt, success) = match video.mode {
            MaterializeMode::Relocate => (relocate(raw, results), RunState::Relocated),
            MaterializeMode::Transcode => (
                transcode_raw_output(
                    self.transcoder.as_ref(),
                    save_dir,
                    &video.raw_extension,
                    results,
                    &video.target_name,
                    &video.target_codec,
                ),
                RunState::Transcoded,
            ),
        };

        match attempt {
            Ok(path) => {
                info!(output = %path.display(), "video ready");
                outcome.output = Some(path);
                outcome.advance(success);
            }
            Err(e) => {
                error!(error = %e, "video materialization failed");
                notices.push(Notice::error(format!("error processing video: {}", e)));
                outcome.advance(RunState::Failed);
            }
        }
    }
}
