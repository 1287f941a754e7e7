use crate::cancel::CancelToken;
use crate::engine::{ImageResults, TrackOptions};
use crate::error::{Result, StudioError};
use crate::ingest::PersistedFile;
use crate::model::ModelHandle;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// What a finished tracking stream left behind.
#[derive(Debug, Clone, Default)]
pub struct VideoRun {
    /// Output path reported by the last item of the stream.
    pub raw_output: Option<PathBuf>,
    pub save_dir: Option<PathBuf>,
    pub frames: u64,
    /// Every distinct output path seen, in order of first appearance.
    pub distinct_outputs: Vec<PathBuf>,
}

fn require_engine(model: &ModelHandle) -> Result<()> {
    if model.is_valid() {
        return Ok(());
    }
    Err(StudioError::ModelLoad {
        path: model.source_path().to_path_buf(),
        message: model.error().unwrap_or("model is not loaded").to_string(),
    })
}

/// Run single-shot prediction. Results are produced lazily, one per image.
pub fn detect_image<'a>(model: &'a mut ModelHandle, image: &PersistedFile) -> Result<ImageResults<'a>> {
    require_engine(model)?;
    let source = image.path.clone();
    let engine = model
        .engine_mut()
        .ok_or_else(|| StudioError::detection(&source, "model is not loaded"))?;
    info!(source = %source.display(), "running prediction");
    engine.predict(&source)
}

/// Drive the tracking stream to completion, one frame at a time, checking
/// `cancel` before every frame. The last reported output path wins.
pub fn detect_video(
    model: &mut ModelHandle,
    video: &PersistedFile,
    options: &TrackOptions,
    cancel: &CancelToken,
) -> Result<VideoRun> {
    require_engine(model)?;
    let source = video.path.clone();
    let engine = model
        .engine_mut()
        .ok_or_else(|| StudioError::detection(&source, "model is not loaded"))?;

    cancel.check()?;
    info!(source = %source.display(), "running tracking");
    let mut stream = engine.track(&source, options)?;
    let mut run = VideoRun::default();

    loop {
        cancel.check()?;
        let Some(item) = stream.next() else {
            break;
        };
        let result = item?;
        run.frames += 1;
        if !run.distinct_outputs.contains(&result.path) {
            debug!(path = %result.path.display(), "new raw output path");
            run.distinct_outputs.push(result.path.clone());
        }
        run.raw_output = Some(result.path);
        run.save_dir = Some(result.save_dir);
    }

    if run.distinct_outputs.len() > 1 {
        warn!(
            outputs = run.distinct_outputs.len(),
            kept = ?run.raw_output,
            "tracking reported several output files; only the last is materialized"
        );
    }
    info!(frames = run.frames, raw_output = ?run.raw_output, "tracking complete");
    Ok(run)
}
