use crate::engine::{DetectionEngine, EngineLoader};
use crate::error::StudioError;
use crate::ingest::PersistedFile;
use crate::storage::ArtifactKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// A loaded detector bound to its weights file. Invalid when loading failed;
/// an invalid handle never becomes valid again.
pub struct ModelHandle {
    source_path: PathBuf,
    engine: Option<Box<dyn DetectionEngine>>,
    error: Option<String>,
}

impl ModelHandle {
    pub fn is_valid(&self) -> bool {
        self.engine.is_some()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Message describing why loading failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut (dyn DetectionEngine + 'static)> {
        self.engine.as_deref_mut()
    }

    fn invalid(source_path: PathBuf, message: String) -> Self {
        Self {
            source_path,
            engine: None,
            error: Some(message),
        }
    }
}

/// Build an engine from a persisted model file. Failures, including panics
/// raised inside the native loader, are reported on the returned handle.
pub fn load_model(loader: &dyn EngineLoader, file: &PersistedFile) -> ModelHandle {
    let path = file.path.clone();
    if file.kind != ArtifactKind::Model {
        let message = format!("{} is not a model file", path.display());
        error!(%message, "model load rejected");
        return ModelHandle::invalid(path, message);
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| loader.load(&path)));
    match outcome {
        Ok(Ok(engine)) => {
            info!(weights = %path.display(), engine = engine.name(), "model loaded");
            ModelHandle {
                source_path: path,
                engine: Some(engine),
                error: None,
            }
        }
        Ok(Err(e)) => {
            let message = match e {
                StudioError::ModelLoad { message, .. } => message,
                other => other.to_string(),
            };
            error!(weights = %path.display(), %message, "model load failed");
            ModelHandle::invalid(path, message)
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "model loader panicked".to_string());
            error!(weights = %path.display(), %message, "model loader panicked");
            ModelHandle::invalid(path, message)
        }
    }
}
