//! Moves or re-encodes the engine's raw video into the results directory.

use crate::error::{Result, StudioError};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter, CAP_ANY},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Move `raw` into `results_dir`, keeping its file name.
pub fn relocate(raw: &Path, results_dir: &Path) -> Result<PathBuf> {
    if !raw.is_file() {
        return Err(StudioError::MissingOutput(raw.to_path_buf()));
    }
    let name = raw
        .file_name()
        .ok_or_else(|| StudioError::MissingOutput(raw.to_path_buf()))?;
    let target = results_dir.join(name);
    fs::rename(raw, &target)?;
    info!(from = %raw.display(), to = %target.display(), "raw output relocated");
    Ok(target)
}

/// Files in `dir` with `extension`, first in lexicographic order.
pub fn discover_raw_output(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches && path.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();
    if candidates.len() > 1 {
        warn!(
            dir = %dir.display(),
            count = candidates.len(),
            "several raw outputs found, using the first"
        );
    }
    Ok(candidates.into_iter().next())
}

/// Re-encodes a whole video file. Blocks until the output is complete.
pub trait Transcoder {
    fn transcode(&self, input: &Path, output: &Path, codec: &str) -> Result<()>;
}

/// Translate a codec name into a fourcc. Accepts four-character codes and a
/// few encoder aliases.
pub fn fourcc_for(codec: &str) -> Result<i32> {
    let code = match codec.to_ascii_lowercase().as_str() {
        "libx264" | "h264" | "x264" => "avc1".to_string(),
        "mpeg4" => "mp4v".to_string(),
        "mjpeg" => "MJPG".to_string(),
        _ => codec.to_string(),
    };
    let chars: Vec<char> = code.chars().collect();
    if chars.len() != 4 {
        return Err(StudioError::transcode(
            Path::new(""),
            format!("codec {:?} is not a fourcc", codec),
        ));
    }
    Ok(VideoWriter::fourcc(chars[0], chars[1], chars[2], chars[3])?)
}

/// An opened video file, ready to be written out with another codec.
pub struct VideoClip {
    path: PathBuf,
    capture: VideoCapture,
    fps: f64,
    size: Size,
}

impl VideoClip {
    pub fn open(path: &Path) -> Result<Self> {
        let capture = VideoCapture::from_file(&path.to_string_lossy(), CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(StudioError::transcode(path, "could not open video"));
        }
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let fps = match capture.get(videoio::CAP_PROP_FPS)? {
            f if f > 0.0 => f,
            _ => 30.0,
        };
        Ok(Self {
            path: path.to_path_buf(),
            capture,
            fps,
            size: Size::new(width, height),
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Encode every frame into `output`. Returns the number of frames written.
    pub fn write_to(mut self, output: &Path, codec: &str) -> Result<u64> {
        let fourcc = fourcc_for(codec)?;
        let mut writer =
            VideoWriter::new(&output.to_string_lossy(), fourcc, self.fps, self.size, true)?;
        if !writer.is_opened()? {
            return Err(StudioError::transcode(
                &self.path,
                format!("no encoder available for codec {}", codec),
            ));
        }

        let mut frames = 0u64;
        let mut frame = Mat::default();
        while self.capture.read(&mut frame)? {
            if frame.empty() {
                break;
            }
            writer.write(&frame)?;
            frames += 1;
        }
        writer.release()?;
        self.capture.release()?;

        if frames == 0 {
            return Err(StudioError::transcode(&self.path, "no frames decoded"));
        }
        Ok(frames)
    }
}

pub struct OpenCvTranscoder;

impl Transcoder for OpenCvTranscoder {
    fn transcode(&self, input: &Path, output: &Path, codec: &str) -> Result<()> {
        let frames = VideoClip::open(input)?.write_to(output, codec)?;
        info!(input = %input.display(), output = %output.display(), frames, codec, "transcoded");
        Ok(())
    }
}

/// Find the raw output in `raw_dir` and encode it to `results_dir/target_name`,
/// replacing any previous result. On failure no file is left at the target
/// from this attempt.
pub fn transcode_raw_output(
    transcoder: &dyn Transcoder,
    raw_dir: &Path,
    raw_extension: &str,
    results_dir: &Path,
    target_name: &str,
    codec: &str,
) -> Result<PathBuf> {
    let raw = discover_raw_output(raw_dir, raw_extension)?
        .ok_or_else(|| StudioError::MissingOutput(raw_dir.join(format!("*.{}", raw_extension))))?;

    let target = results_dir.join(target_name);
    let staging = results_dir.join(format!(".partial-{}", target_name));

    if let Err(e) = transcoder.transcode(&raw, &staging, codec) {
        let _ = fs::remove_file(&staging);
        return Err(match e {
            StudioError::Transcode { .. } => e,
            other => StudioError::transcode(&raw, other.to_string()),
        });
    }
    if let Err(e) = fs::rename(&staging, &target) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_test_video, CopyTranscoder};

    #[test]
    fn relocate_moves_file_under_its_name() {
        let tmp = tempfile::tempdir().unwrap();
        let run = tmp.path().join("runs/track");
        let results = tmp.path().join("results");
        fs::create_dir_all(&run).unwrap();
        fs::create_dir_all(&results).unwrap();
        let raw = run.join("clip.avi");
        fs::write(&raw, b"raw video").unwrap();

        let moved = relocate(&raw, &results).unwrap();
        assert_eq!(moved, results.join("clip.avi"));
        assert!(!raw.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"raw video");
    }

    #[test]
    fn relocate_reports_missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let err = relocate(&tmp.path().join("gone.avi"), tmp.path()).unwrap_err();
        assert!(matches!(err, StudioError::MissingOutput(_)));
    }

    #[test]
    fn discovery_picks_lexicographic_first() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.avi", "a.avi", "c.mp4", "labels.txt"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        let found = discover_raw_output(tmp.path(), "avi").unwrap();
        assert_eq!(found, Some(tmp.path().join("a.avi")));
        assert_eq!(discover_raw_output(tmp.path(), "mkv").unwrap(), None);
    }

    #[test]
    fn second_transcode_overwrites_single_target() {
        let tmp = tempfile::tempdir().unwrap();
        let raw_dir = tmp.path().join("runs/track");
        let results = tmp.path().join("output_videos");
        fs::create_dir_all(&raw_dir).unwrap();
        fs::create_dir_all(&results).unwrap();

        fs::write(raw_dir.join("clip.avi"), b"first").unwrap();
        let first =
            transcode_raw_output(&CopyTranscoder, &raw_dir, "avi", &results, "output.mp4", "avc1")
                .unwrap();
        fs::write(raw_dir.join("clip.avi"), b"second").unwrap();
        let second =
            transcode_raw_output(&CopyTranscoder, &raw_dir, "avi", &results, "output.mp4", "avc1")
                .unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read(&second).unwrap(), b"second");
        assert_eq!(fs::read_dir(&results).unwrap().count(), 1);
    }

    #[test]
    fn failed_transcode_leaves_no_output() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("clip.avi"), b"not a video").unwrap();
        let results = tmp.path().join("out");
        fs::create_dir_all(&results).unwrap();

        let err = transcode_raw_output(
            &OpenCvTranscoder,
            tmp.path(),
            "avi",
            &results,
            "output.mp4",
            "avc1",
        )
        .unwrap_err();
        assert!(matches!(err, StudioError::Transcode { .. }));
        assert_eq!(fs::read_dir(&results).unwrap().count(), 0);
    }

    #[test]
    fn failed_rename_removes_staging_file() {
        let tmp = tempfile::tempdir().unwrap();
        let raw_dir = tmp.path().join("runs/track");
        let results = tmp.path().join("output_videos");
        fs::create_dir_all(&raw_dir).unwrap();
        fs::write(raw_dir.join("clip.avi"), b"raw").unwrap();
        // A non-empty directory squatting on the target name blocks the rename.
        fs::create_dir_all(results.join("output.mp4")).unwrap();
        fs::write(results.join("output.mp4/keep"), b"").unwrap();

        let err =
            transcode_raw_output(&CopyTranscoder, &raw_dir, "avi", &results, "output.mp4", "avc1")
                .unwrap_err();
        assert!(matches!(err, StudioError::Io(_)));
        assert!(!results.join(".partial-output.mp4").exists());
        assert_eq!(fs::read_dir(&results).unwrap().count(), 1);
    }

    #[test]
    fn missing_raw_output_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = transcode_raw_output(
            &CopyTranscoder,
            tmp.path(),
            "avi",
            tmp.path(),
            "output.mp4",
            "avc1",
        )
        .unwrap_err();
        assert!(matches!(err, StudioError::MissingOutput(_)));
    }

    #[test]
    fn codec_aliases_resolve_to_fourcc() {
        assert_eq!(fourcc_for("libx264").unwrap(), fourcc_for("avc1").unwrap());
        assert!(fourcc_for("h265-main").is_err());
    }

    #[test]
    fn opencv_transcoder_reencodes_mjpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_test_video(tmp.path(), "raw.avi", 3);
        let output = tmp.path().join("copy.avi");

        let clip = VideoClip::open(&input).unwrap();
        assert_eq!((clip.size().width, clip.size().height), (64, 48));
        let frames = clip.write_to(&output, "MJPG").unwrap();
        assert_eq!(frames, 3);
        assert!(output.exists());
    }
}
