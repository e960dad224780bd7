use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facelearn_core::{store, EmbeddingStore, OnnxAnalyzer};
use facelearn_hw::Camera;

#[derive(Parser)]
#[command(name = "facelearn-cli", about = "facelearn maintenance and diagnostics")]
struct Cli {
    /// Directory holding `train/` and the store snapshot
    #[arg(long, global = true, default_value_os_t = facelearn_core::default_data_dir())]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-encode the whole training corpus into the store
    Encode {
        /// Directory containing det_10g.onnx and w600k_r50.onnx
        #[arg(long, default_value_os_t = facelearn_core::default_model_dir())]
        model_dir: PathBuf,
    },
    /// List identities in the store
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show how names would be normalized into labels
    Normalize {
        names: Vec<String>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: u32,
        /// Save the last frame as a PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store_path = cli.data_dir.join(facelearn_core::STORE_FILE);

    match cli.command {
        Commands::Encode { model_dir } => {
            let scrfd = model_dir.join(facelearn_core::SCRFD_MODEL);
            let arcface = model_dir.join(facelearn_core::ARCFACE_MODEL);
            let mut analyzer = OnnxAnalyzer::load(&scrfd.to_string_lossy(), &arcface.to_string_lossy())
                .context("failed to load face models")?;

            let train = cli.data_dir.join(facelearn_core::TRAIN_DIR);
            let rebuilt = store::rebuild_and_persist(&mut analyzer, &train, &store_path)
                .with_context(|| format!("failed to encode {}", train.display()))?;
            println!(
                "Saved {} embeddings for {} identities to {}",
                rebuilt.len(),
                rebuilt.identities().len(),
                store_path.display()
            );
        }
        Commands::List { json } => {
            let store = EmbeddingStore::load(&store_path)
                .with_context(|| format!("failed to load {}", store_path.display()))?;
            let identities = store.identities();
            if json {
                println!("{}", serde_json::to_string_pretty(&identities)?);
            } else if identities.is_empty() {
                println!("No identities enrolled");
            } else {
                println!("{:<32} EMBEDDINGS", "LABEL");
                for (label, count) in &identities {
                    println!("{label:<32} {count}");
                }
                println!("{} embeddings total", store.len());
            }
        }
        Commands::Normalize { names } => {
            for name in names {
                match facelearn_core::IdentityLabel::parse(&name) {
                    Ok(label) => println!("{name:?} -> {label}"),
                    Err(e) => println!("{name:?} -> rejected ({e})"),
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device, frames, snapshot } => {
            println!("Running camera diagnostics on {device}...");
            let mut camera = Camera::open(&device, 640, 480)
                .with_context(|| format!("failed to open {device}"))?;
            println!(
                "Negotiated {}x{} {:?}",
                camera.width, camera.height, camera.fourcc
            );

            let mut last = None;
            for i in 0..frames {
                let frame = camera.capture_frame().context("frame capture failed")?;
                println!(
                    "frame {i:>3}: seq={} brightness={:.1}",
                    frame.sequence,
                    frame.avg_brightness()
                );
                last = Some(frame);
            }

            if let (Some(path), Some(frame)) = (snapshot, last) {
                frame
                    .image
                    .save(&path)
                    .with_context(|| format!("failed to save {}", path.display()))?;
                println!("Saved snapshot to {}", path.display());
            }
        }
    }

    Ok(())
}
