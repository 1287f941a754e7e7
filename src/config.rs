use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Which of the two front-end behaviours a session follows for video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Move the engine's raw video into `results/` under its own name.
    Relocate,
    /// Re-encode the engine's raw `.avi` into `output_videos/output.mp4`.
    Transcode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeMode {
    Relocate,
    Transcode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub images_dir: String,
    pub videos_dir: String,
    pub models_dir: String,
    pub results_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            images_dir: "images".to_string(),
            videos_dir: "videos".to_string(),
            models_dir: "models".to_string(),
            results_dir: "results".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub device: String,
    pub input_size: [i32; 2],
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Empty means every class is kept.
    pub classes: Vec<i32>,
    /// Overrides the built-in COCO names when non-empty.
    pub class_names: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            input_size: [640, 640],
            conf_threshold: 0.25,
            nms_threshold: 0.45,
            classes: Vec::new(),
            class_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub track_high_thresh: f32,
    pub track_low_thresh: f32,
    pub new_track_thresh: f32,
    pub match_thresh: f32,
    /// Frames a lost track is kept before removal.
    pub track_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_high_thresh: 0.5,
            track_low_thresh: 0.1,
            new_track_thresh: 0.6,
            match_thresh: 0.8,
            track_buffer: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub mode: MaterializeMode,
    pub accepted_extensions: Vec<String>,
    /// Extension of the engine's raw output searched for in transcode mode.
    pub raw_extension: String,
    pub target_name: String,
    pub target_codec: String,
    /// Zero disables the tracking deadline.
    pub timeout_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            mode: MaterializeMode::Relocate,
            accepted_extensions: vec!["mp4".to_string(), "mov".to_string(), "avi".to_string()],
            raw_extension: "avi".to_string(),
            target_name: "output.mp4".to_string(),
            target_codec: "avc1".to_string(),
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub video: VideoConfig,
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    /// Defaults for one of the two front-ends.
    pub fn for_profile(profile: Profile) -> Self {
        let mut cfg = Config::default();
        cfg.apply_profile(profile);
        cfg
    }

    /// Switch the results directory, video filter and materialize mode.
    pub fn apply_profile(&mut self, profile: Profile) {
        match profile {
            Profile::Relocate => {
                self.storage.results_dir = "results".to_string();
                self.video.mode = MaterializeMode::Relocate;
                self.video.accepted_extensions =
                    vec!["mp4".to_string(), "mov".to_string(), "avi".to_string()];
            }
            Profile::Transcode => {
                self.storage.results_dir = "output_videos".to_string();
                self.video.mode = MaterializeMode::Transcode;
                self.video.accepted_extensions = vec!["mp4".to_string()];
                self.video.raw_extension = "avi".to_string();
                self.video.target_name = "output.mp4".to_string();
                self.video.target_codec = "avc1".to_string();
            }
        }
    }
}
