//! Fixed working-directory layout shared by uploads and results.

use crate::config::StorageConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What an uploaded artifact is, and therefore where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Image,
    Video,
    Model,
}

impl ArtifactKind {
    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
            ArtifactKind::Model => "model",
        }
    }

    /// Extensions accepted by the upload controls. Videos are configurable.
    pub fn default_extensions(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Image => &["jpg", "jpeg", "png"],
            ArtifactKind::Video => &["mp4", "mov", "avi"],
            ArtifactKind::Model => &["pt"],
        }
    }
}

/// Resolved directories: images, videos, models and results.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    images: PathBuf,
    videos: PathBuf,
    models: PathBuf,
    results: PathBuf,
}

impl StorageLayout {
    pub fn new(cfg: &StorageConfig) -> Self {
        let root = cfg.root.clone();
        Self {
            images: root.join(&cfg.images_dir),
            videos: root.join(&cfg.videos_dir),
            models: root.join(&cfg.models_dir),
            results: root.join(&cfg.results_dir),
            root,
        }
    }

    /// Create every directory if absent. Safe to call repeatedly.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.images, &self.videos, &self.models, &self.results] {
            fs::create_dir_all(dir)?;
            debug!(dir = %dir.display(), "storage directory ready");
        }
        Ok(())
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Image => &self.images,
            ArtifactKind::Video => &self.videos,
            ArtifactKind::Model => &self.models,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results_dir(&self) -> &Path {
        &self.results
    }
}
