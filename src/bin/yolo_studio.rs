use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yolo_studio::{
    ArtifactKind, CancelToken, Config, NoticeLevel, OpenCvTranscoder, Profile, Session,
    TorchLoader, UploadedArtifact,
};

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    /// Move the raw tracking video into `results/`
    Relocate,
    /// Re-encode the raw tracking video to `output_videos/output.mp4`
    Transcode,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Relocate => Profile::Relocate,
            ProfileArg::Transcode => Profile::Transcode,
        }
    }
}

/// Upload an image, a video and YOLO weights, then run detection and tracking.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Working directory holding images/, videos/, models/ and results
    #[arg(long)]
    root: Option<PathBuf>,
    /// Path to the config JSON file
    #[arg(long)]
    config: Option<String>,
    #[arg(long, value_enum)]
    profile: Option<ProfileArg>,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    video: Option<PathBuf>,
    /// TorchScript weights (.pt)
    #[arg(long)]
    model: Option<PathBuf>,
    /// cpu or cuda
    #[arg(long)]
    device: Option<String>,
    /// Abort video tracking this many seconds after it starts (0 = never)
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(profile) = args.profile {
        cfg.apply_profile(profile.into());
    }
    if let Some(root) = args.root {
        cfg.storage.root = root;
    }
    if let Some(device) = args.device {
        cfg.detector.device = device;
    }
    if let Some(secs) = args.timeout_secs {
        cfg.video.timeout_secs = secs;
    }

    let loader = TorchLoader {
        detector: cfg.detector.clone(),
        tracker: cfg.tracker.clone(),
    };
    let mut session = Session::new(cfg, Box::new(loader), Box::new(OpenCvTranscoder))?;

    let uploads = [
        (args.image, ArtifactKind::Image),
        (args.video, ArtifactKind::Video),
        (args.model, ArtifactKind::Model),
    ];
    for (path, kind) in uploads {
        if let Some(path) = path {
            let artifact = UploadedArtifact::from_path(&path, kind)?;
            session.upload(&artifact)?;
        }
    }

    // The session arms the tracking deadline itself when tracking starts.
    let report = session.execute(&CancelToken::new())?;
    for notice in &report.notices {
        match notice.level {
            NoticeLevel::Info => println!("{}", notice.message),
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
        }
    }
    if report.skipped {
        println!("no model loaded; nothing to do");
        return Ok(());
    }

    let results = session.layout().results_dir().to_path_buf();
    for annotated in &report.images {
        let stem = annotated
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let out = results.join(format!("{}_annotated.jpg", stem));
        annotated.save(&out)?;
        println!(
            "annotated image: {} ({}x{}, {} detections)",
            out.display(),
            annotated.width(),
            annotated.height(),
            annotated.detections.len()
        );
    }

    if let Some(video) = &report.video {
        match &video.output {
            Some(path) => println!("video: {} ({} frames)", path.display(), video.frames),
            None => println!("no video output ({:?})", video.state),
        }
    }
    Ok(())
}
