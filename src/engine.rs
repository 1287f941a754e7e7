//! The detector/tracker seen by the pipeline as a black box.
//!
//! An engine takes a source path and yields lazily produced results. For
//! video it decides on its own where the raw annotated file is written and
//! reports that location on every streamed item.

use crate::config::{DetectorConfig, TrackerConfig};
use crate::detection::{Detection, Detector, OutputLayout};
use crate::error::{Result, StudioError};
use crate::tracker::{STrack, Tracker};
use crate::visualization;
use opencv::{
    core::{Mat, Size, Vector},
    imgcodecs,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter, CAP_ANY},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One input image with boxes and labels drawn over the original pixels.
pub struct AnnotatedImage {
    pub source: PathBuf,
    pub image: Mat,
    pub detections: Vec<Detection>,
}

impl AnnotatedImage {
    pub fn width(&self) -> i32 {
        self.image.cols()
    }

    pub fn height(&self) -> i32 {
        self.image.rows()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let ok = imgcodecs::imwrite(&path.to_string_lossy(), &self.image, &Vector::new())?;
        if !ok {
            return Err(StudioError::MissingOutput(path.to_path_buf()));
        }
        Ok(())
    }
}

/// One tracked frame. `path` is the engine's raw output file for the run.
#[derive(Debug, Clone)]
pub struct VideoTrackResult {
    pub frame_index: u64,
    pub path: PathBuf,
    pub save_dir: PathBuf,
    pub tracks: Vec<STrack>,
}

#[derive(Debug, Clone)]
pub struct TrackOptions {
    /// Parent of the per-run directories (`<project>/track`, `<project>/track2`, ...).
    pub project: PathBuf,
    pub name: String,
    pub save: bool,
}

impl TrackOptions {
    pub fn under(root: &Path) -> Self {
        Self {
            project: root.join("runs"),
            name: "track".to_string(),
            save: true,
        }
    }
}

pub type ImageResults<'a> = Box<dyn Iterator<Item = Result<AnnotatedImage>> + 'a>;
pub type TrackStream<'a> = Box<dyn Iterator<Item = Result<VideoTrackResult>> + 'a>;

pub trait DetectionEngine {
    /// Single-shot detection over an image file, or every image in a directory.
    fn predict<'a>(&'a mut self, source: &Path) -> Result<ImageResults<'a>>;

    /// Frame-by-frame tracking over a video file.
    fn track<'a>(&'a mut self, source: &Path, options: &TrackOptions) -> Result<TrackStream<'a>>;

    fn name(&self) -> &str;
}

/// Builds an engine from a weights file.
pub trait EngineLoader {
    fn load(&self, weights: &Path) -> Result<Box<dyn DetectionEngine>>;
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files under `source`, or `source` itself, in name order.
pub fn image_sources(source: &Path) -> Result<Vec<PathBuf>> {
    if !source.is_dir() {
        return Ok(vec![source.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(source)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// First of `<project>/<name>`, `<project>/<name>2`, ... that does not exist.
pub fn next_run_dir(project: &Path, name: &str) -> PathBuf {
    let first = project.join(name);
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| project.join(format!("{}{}", name, n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// TorchScript YOLO weights with OpenCV image and video I/O.
pub struct TorchEngine {
    detector: Detector,
    tracker_cfg: TrackerConfig,
    class_names: Vec<String>,
}

impl TorchEngine {
    pub fn new(detector: Detector, tracker_cfg: TrackerConfig, class_names: Vec<String>) -> Self {
        Self {
            detector,
            tracker_cfg,
            class_names,
        }
    }

    fn annotate_file(&self, path: &Path) -> Result<AnnotatedImage> {
        let mut image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
        if image.empty() {
            return Err(StudioError::detection(path, "could not decode image"));
        }
        let detections = self.detector.detect(&image)?;
        visualization::draw_detections(&mut image, &detections, &self.class_names)?;
        debug!(source = %path.display(), count = detections.len(), "image annotated");
        Ok(AnnotatedImage {
            source: path.to_path_buf(),
            image,
            detections,
        })
    }
}

impl DetectionEngine for TorchEngine {
    fn predict<'a>(&'a mut self, source: &Path) -> Result<ImageResults<'a>> {
        let files = image_sources(source)?;
        let engine: &'a TorchEngine = self;
        Ok(Box::new(files.into_iter().map(move |path| engine.annotate_file(&path))))
    }

    fn track<'a>(&'a mut self, source: &Path, options: &TrackOptions) -> Result<TrackStream<'a>> {
        let capture = VideoCapture::from_file(&source.to_string_lossy(), CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(StudioError::detection(source, "could not open video"));
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let fps = match capture.get(videoio::CAP_PROP_FPS)? {
            f if f > 0.0 => f,
            _ => 30.0,
        };

        let save_dir = next_run_dir(&options.project, &options.name);
        fs::create_dir_all(&save_dir)?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let path = save_dir.join(format!("{}.avi", stem));

        let writer = if options.save {
            let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G')?;
            let writer = VideoWriter::new(
                &path.to_string_lossy(),
                fourcc,
                fps,
                Size::new(width, height),
                true,
            )?;
            if !writer.is_opened()? {
                return Err(StudioError::detection(source, "could not open video writer"));
            }
            Some(writer)
        } else {
            None
        };

        info!(
            source = %source.display(),
            output = %path.display(),
            width,
            height,
            fps,
            "tracking started"
        );

        let tracker = Tracker::new(&self.tracker_cfg);
        let engine: &'a TorchEngine = self;
        Ok(Box::new(TorchTrackStream {
            engine,
            capture,
            writer,
            tracker,
            frame_index: 0,
            path,
            save_dir,
            done: false,
        }))
    }

    fn name(&self) -> &str {
        "torchscript-yolo"
    }
}

struct TorchTrackStream<'a> {
    engine: &'a TorchEngine,
    capture: VideoCapture,
    writer: Option<VideoWriter>,
    tracker: Tracker,
    frame_index: u64,
    path: PathBuf,
    save_dir: PathBuf,
    done: bool,
}

impl TorchTrackStream<'_> {
    fn step(&mut self) -> Result<Option<VideoTrackResult>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            self.finish()?;
            return Ok(None);
        }

        let detections = self.engine.detector.detect(&frame)?;
        let tracks = self.tracker.update(&detections);
        visualization::draw_tracks(&mut frame, &tracks, &self.engine.class_names)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&frame)?;
        }

        self.frame_index += 1;
        debug!(
            frame = self.frame_index,
            detections = detections.len(),
            tracks = tracks.len(),
            "frame tracked"
        );
        Ok(Some(VideoTrackResult {
            frame_index: self.frame_index,
            path: self.path.clone(),
            save_dir: self.save_dir.clone(),
            tracks,
        }))
    }

    fn finish(&mut self) -> Result<()> {
        self.done = true;
        if let Some(mut writer) = self.writer.take() {
            writer.release()?;
        }
        self.capture.release()?;
        info!(frames = self.frame_index, output = %self.path.display(), "tracking finished");
        Ok(())
    }
}

impl Iterator for TorchTrackStream<'_> {
    type Item = Result<VideoTrackResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Loads TorchScript weights and checks the output layout before handing
/// out an engine.
pub struct TorchLoader {
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
}

impl EngineLoader for TorchLoader {
    fn load(&self, weights: &Path) -> Result<Box<dyn DetectionEngine>> {
        let detector = Detector::new(weights, &self.detector)?;
        let shape = detector.probe_output_shape()?;
        if OutputLayout::infer(&shape).is_none() {
            return Err(StudioError::ModelLoad {
                path: weights.to_path_buf(),
                message: format!("unsupported output shape {:?}", shape),
            });
        }
        info!(weights = %weights.display(), ?shape, "detector ready");
        Ok(Box::new(TorchEngine::new(
            detector,
            self.tracker.clone(),
            self.detector.class_names.clone(),
        )))
    }
}
