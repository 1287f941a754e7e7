//! Test doubles for the engine and transcoder seams.

use crate::detection::Detection;
use crate::engine::{
    image_sources, next_run_dir, AnnotatedImage, DetectionEngine, EngineLoader, ImageResults,
    TrackOptions, TrackStream, VideoTrackResult,
};
use crate::error::{Result, StudioError};
use crate::materialize::Transcoder;
use crate::visualization;
use nalgebra::SVector;
use opencv::{
    core::{Mat, Scalar, Size, Vector, CV_8UC3},
    imgcodecs,
    prelude::*,
    videoio::VideoWriter,
};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FakeEngineConfig {
    pub frames: u64,
    /// Switch to a second output file from this frame on.
    pub split_output_at: Option<u64>,
    pub fail_at: Option<u64>,
}

impl Default for FakeEngineConfig {
    fn default() -> Self {
        Self {
            frames: 3,
            split_output_at: None,
            fail_at: None,
        }
    }
}

/// Draws one fixed box on every image; "tracks" by writing a stand-in raw file.
pub struct FakeEngine {
    cfg: FakeEngineConfig,
}

impl FakeEngine {
    pub fn new(cfg: FakeEngineConfig) -> Self {
        Self { cfg }
    }
}

impl DetectionEngine for FakeEngine {
    fn predict<'a>(&'a mut self, source: &Path) -> Result<ImageResults<'a>> {
        let files = image_sources(source)?;
        Ok(Box::new(files.into_iter().map(|path| {
            let mut image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
            if image.empty() {
                return Err(StudioError::detection(&path, "could not decode image"));
            }
            let det = Detection::new(SVector::<f32, 4>::new(2.0, 2.0, 10.0, 10.0), 0.9, 15);
            visualization::draw_detections(&mut image, std::slice::from_ref(&det), &[])?;
            Ok(AnnotatedImage {
                source: path,
                image,
                detections: vec![det],
            })
        })))
    }

    fn track<'a>(&'a mut self, source: &Path, options: &TrackOptions) -> Result<TrackStream<'a>> {
        if !source.is_file() {
            return Err(StudioError::detection(source, "could not open video"));
        }
        let save_dir = next_run_dir(&options.project, &options.name);
        fs::create_dir_all(&save_dir)?;
        let stem = source.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let first = save_dir.join(format!("{}.avi", stem));
        let second = save_dir.join(format!("{}_part2.avi", stem));
        fs::write(&first, b"raw")?;

        let cfg = self.cfg.clone();
        Ok(Box::new((1..=cfg.frames).map(move |frame_index| {
            if cfg.fail_at == Some(frame_index) {
                return Err(StudioError::detection(&first, "tracker failed"));
            }
            let path = match cfg.split_output_at {
                Some(at) if frame_index >= at => {
                    fs::write(&second, b"raw")?;
                    second.clone()
                }
                _ => first.clone(),
            };
            Ok(VideoTrackResult {
                frame_index,
                path,
                save_dir: save_dir.clone(),
                tracks: Vec::new(),
            })
        })))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Debug, Clone)]
pub enum LoaderBehaviour {
    Succeed,
    Fail(String),
    Panic,
}

pub struct FakeLoader {
    behaviour: LoaderBehaviour,
    engine: FakeEngineConfig,
    calls: Cell<usize>,
}

impl FakeLoader {
    pub fn new(behaviour: LoaderBehaviour) -> Self {
        Self {
            behaviour,
            engine: FakeEngineConfig::default(),
            calls: Cell::new(0),
        }
    }

    pub fn with_engine(engine: FakeEngineConfig) -> Self {
        Self {
            engine,
            ..Self::new(LoaderBehaviour::Succeed)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl EngineLoader for FakeLoader {
    fn load(&self, weights: &Path) -> Result<Box<dyn DetectionEngine>> {
        self.calls.set(self.calls.get() + 1);
        match &self.behaviour {
            LoaderBehaviour::Succeed => Ok(Box::new(FakeEngine::new(self.engine.clone()))),
            LoaderBehaviour::Fail(message) => Err(StudioError::ModelLoad {
                path: weights.to_path_buf(),
                message: message.clone(),
            }),
            LoaderBehaviour::Panic => panic!("fake loader panicked"),
        }
    }
}

/// Byte copy standing in for a real encoder.
pub struct CopyTranscoder;

impl Transcoder for CopyTranscoder {
    fn transcode(&self, input: &Path, output: &Path, _codec: &str) -> Result<()> {
        fs::copy(input, output)?;
        Ok(())
    }
}

pub struct FailingTranscoder;

impl Transcoder for FailingTranscoder {
    fn transcode(&self, input: &Path, output: &Path, codec: &str) -> Result<()> {
        fs::write(output, b"partial")?;
        Err(StudioError::transcode(input, format!("encoder {} unavailable", codec)))
    }
}

pub fn write_test_image(dir: &Path, name: &str, width: i32, height: i32) -> PathBuf {
    let path = dir.join(name);
    let image = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::new(40.0, 80.0, 120.0, 0.0))
        .unwrap();
    assert!(imgcodecs::imwrite(&path.to_string_lossy(), &image, &Vector::new()).unwrap());
    path
}

pub fn write_test_video(dir: &Path, name: &str, frames: usize) -> PathBuf {
    let path = dir.join(name);
    let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
    let mut writer =
        VideoWriter::new(&path.to_string_lossy(), fourcc, 10.0, Size::new(64, 48), true).unwrap();
    assert!(writer.is_opened().unwrap());
    for i in 0..frames {
        let shade = (i * 40 % 255) as f64;
        let frame =
            Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::new(shade, 100.0, 200.0, 0.0))
                .unwrap();
        writer.write(&frame).unwrap();
    }
    writer.release().unwrap();
    path
}
