use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use yolo_studio::{
    config::DetectorConfig,
    detection::{Detector, OutputLayout},
    engine::EngineLoader,
    TorchLoader,
};

// Prints the raw output shape of a weights file so a model that fails to load
// in the studio can be diagnosed on its own.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// TorchScript weights (.pt)
    weights: PathBuf,
    #[arg(long, default_value = "cpu")]
    device: String,
    #[arg(long, default_value_t = 640)]
    size: i32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.weights.exists() {
        println!("Model file not found at: {}", args.weights.display());
        return Ok(());
    }

    let cfg = DetectorConfig {
        device: args.device,
        input_size: [args.size, args.size],
        ..DetectorConfig::default()
    };
    println!("Loading model from: {}", args.weights.display());
    let detector = Detector::new(&args.weights, &cfg)?;
    let shape = detector.probe_output_shape()?;
    println!("Output tensor shape: {:?}", shape);

    match OutputLayout::infer(&shape) {
        Some(layout) => println!("Layout: {:?}", layout),
        None => println!("Unsupported output format, dimensions: {:?}", shape),
    }

    let loader = TorchLoader {
        detector: cfg,
        tracker: Default::default(),
    };
    match loader.load(&args.weights) {
        Ok(engine) => println!("Engine ready: {}", engine.name()),
        Err(e) => println!("Engine rejected the weights: {}", e),
    }
    Ok(())
}
