use crate::error::{Result, StudioError};
use crate::storage::ArtifactKind;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A named byte payload as handed over by the presentation layer.
#[derive(Debug, Clone)]
pub struct UploadedArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
    pub kind: ArtifactKind,
}

impl UploadedArtifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, kind: ArtifactKind) -> Self {
        Self {
            name: name.into(),
            bytes,
            kind,
        }
    }

    /// Read a local file as an upload, keeping only its file name.
    pub fn from_path(path: &Path, kind: ArtifactKind) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StudioError::MissingOutput(path.to_path_buf()))?;
        Ok(Self::new(name, fs::read(path)?, kind))
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn has_extension_in<S: AsRef<str>>(&self, accepted: &[S]) -> bool {
        match self.extension() {
            Some(ext) => accepted.iter().any(|a| a.as_ref().eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }
}

/// An upload that now exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedFile {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

/// Write the artifact to `target_dir/name`. The name is used as given and an
/// existing file with that name is replaced.
pub fn ingest(artifact: &UploadedArtifact, target_dir: &Path) -> Result<PersistedFile> {
    let path = target_dir.join(&artifact.name);
    fs::write(&path, &artifact.bytes)?;
    info!(
        kind = artifact.kind.label(),
        path = %path.display(),
        bytes = artifact.bytes.len(),
        "artifact persisted"
    );
    Ok(PersistedFile {
        path,
        kind: artifact.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_writes_identical_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let artifact = UploadedArtifact::new("cat.jpg", payload.clone(), ArtifactKind::Image);

        let persisted = ingest(&artifact, tmp.path()).unwrap();
        assert_eq!(persisted.path, tmp.path().join("cat.jpg"));
        assert_eq!(persisted.kind, ArtifactKind::Image);
        assert_eq!(fs::read(&persisted.path).unwrap(), payload);
    }

    #[test]
    fn same_name_overwrites_previous_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let first = UploadedArtifact::new("clip.mp4", vec![1; 64], ArtifactKind::Video);
        let second = UploadedArtifact::new("clip.mp4", vec![2; 8], ArtifactKind::Video);

        ingest(&first, tmp.path()).unwrap();
        let persisted = ingest(&second, tmp.path()).unwrap();

        assert_eq!(fs::read(&persisted.path).unwrap(), vec![2; 8]);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_directory_surfaces_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = UploadedArtifact::new("yolo.pt", vec![0; 4], ArtifactKind::Model);
        let err = ingest(&artifact, &tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, StudioError::Io(_)));
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let artifact = UploadedArtifact::new("Photo.JPG", Vec::new(), ArtifactKind::Image);
        assert!(artifact.has_extension_in(ArtifactKind::Image.default_extensions()));
        let model = UploadedArtifact::new("weights.onnx", Vec::new(), ArtifactKind::Model);
        assert!(!model.has_extension_in(ArtifactKind::Model.default_extensions()));
        let bare = UploadedArtifact::new("README", Vec::new(), ArtifactKind::Image);
        assert!(!bare.has_extension_in(ArtifactKind::Image.default_extensions()));
    }
}
