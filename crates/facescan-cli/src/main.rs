use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facescan_core::{OrtPipeline, PipelineConfig};
use facescan_source::{FrameSource, ImageSequenceSource, StillImageSource};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod engine;
mod gallery;

use engine::{enroll_from_frames, load_frames, run_frame_loop, verify_frames, LoopOptions};

#[derive(Parser)]
#[command(name = "facescan", about = "Face detection, alignment and identification CLI")]
struct Cli {
    /// TOML configuration file (FACESCAN_* variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gallery file (default: $XDG_DATA_HOME/facescan/gallery.json)
    #[arg(short, long, global = true)]
    gallery: Option<PathBuf>,

    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of the best face in an image
    Embed {
        image: PathBuf,
    },
    /// Enroll a person from one or more images
    Enroll {
        /// Name recorded with the embedding
        #[arg(short, long)]
        person: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify the best face in each image against the gallery
    Identify {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Cosine similarity between the best faces of two images
    Compare {
        a: PathBuf,
        b: PathBuf,
    },
    /// Run the frame loop over an image or a directory of images, printing confirmed identities
    Watch {
        path: PathBuf,
        /// Milliseconds between frames
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Replay the source until interrupted
        #[arg(long)]
        repeat: bool,
        /// Process frames even if they are almost black
        #[arg(long)]
        keep_dark: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    let gallery_path = cli.gallery.unwrap_or_else(gallery::default_gallery_path);

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Embed { image } => {
            let mut pipeline = load_pipeline(config)?;
            let frames = load_frames(&[image.clone()])?;
            let enrolled = enroll_from_frames(&mut pipeline, &frames)
                .await
                .with_context(|| format!("no embedding for {}", image.display()))?;
            let out = json!({
                "image": image,
                "confidence": enrolled.quality_score,
                "dimension": enrolled.embedding.dimension(),
                "model_version": enrolled.embedding.model_version,
                "embedding": enrolled.embedding.values,
            });
            println!("{out}");
        }
        Commands::Enroll { person, images } => {
            let gallery_id = config.gallery_id.clone();
            let mut pipeline = load_pipeline(config)?;
            let frames = load_frames(&images)?;
            let enrolled = enroll_from_frames(&mut pipeline, &frames)
                .await
                .context("enrollment failed")?;

            let mut store = gallery::load(&gallery_path)?;
            let record = gallery::new_record(&person, enrolled.embedding);
            let id = record.id.clone();
            store.gallery_mut(&gallery_id).enroll(record);
            gallery::save(&gallery_path, &store)?;

            tracing::info!(person = %person, id = %id, gallery = %gallery_id, "face enrolled");
            let out = json!({
                "id": id,
                "person": person,
                "gallery": gallery_id,
                "quality": enrolled.quality_score,
                "image": images.get(enrolled.frame),
            });
            println!("{out}");
        }
        Commands::Identify { images } => {
            let gallery_id = config.gallery_id.clone();
            let mut pipeline = load_pipeline(config)?;
            let store = gallery::load(&gallery_path)?;
            let Some(gallery) = store.gallery(&gallery_id) else {
                bail!("gallery {gallery_id:?} has no enrolled faces ({})", gallery_path.display());
            };

            for image in &images {
                let frames = load_frames(std::slice::from_ref(image))?;
                let out = match verify_frames(&mut pipeline, &frames, gallery).await {
                    Ok(verified) => json!({
                        "image": image,
                        "status": verified.result.status,
                        "person": verified.result.person,
                        "similarity": verified.result.similarity,
                        "quality": verified.best_quality,
                    }),
                    Err(engine::EngineError::NoFaceDetected) => json!({
                        "image": image,
                        "status": "no_face",
                    }),
                    Err(e) => return Err(e.into()),
                };
                println!("{out}");
            }
        }
        Commands::Compare { a, b } => {
            let mut pipeline = load_pipeline(config)?;
            let frames_a = load_frames(std::slice::from_ref(&a))?;
            let frames_b = load_frames(std::slice::from_ref(&b))?;
            let ea = enroll_from_frames(&mut pipeline, &frames_a)
                .await
                .with_context(|| format!("no face in {}", a.display()))?;
            let eb = enroll_from_frames(&mut pipeline, &frames_b)
                .await
                .with_context(|| format!("no face in {}", b.display()))?;

            let similarity = ea.embedding.similarity(&eb.embedding);
            let out = json!({
                "a": a,
                "b": b,
                "similarity": similarity,
                "same_person": similarity > pipeline.config().similarity_threshold,
            });
            println!("{out}");
        }
        Commands::Watch { path, interval_ms, repeat, keep_dark } => {
            let options = LoopOptions {
                frame_interval: Duration::from_millis(interval_ms),
                skip_dark: !keep_dark,
            };
            let source = open_source(&path, repeat)?;
            let store = gallery::load(&gallery_path)?;
            let mut pipeline = load_pipeline(config)?;

            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received; stopping");
                    let _ = stop_tx.send(true);
                }
                // The loop also stops if the sender is dropped.
                std::future::pending::<()>().await;
            });

            let stats = run_frame_loop(source, &mut pipeline, &store, stop_rx, &options, |frame, confirmed| {
                let out = json!({
                    "frame": frame.sequence,
                    "confirmed_person": confirmed.person,
                    "similarity": confirmed.similarity,
                });
                println!("{out}");
            })
            .await;

            tracing::info!(?stats, "watch finished");
        }
    }

    Ok(())
}

fn load_pipeline(config: PipelineConfig) -> Result<OrtPipeline> {
    let dir = config.model_dir.clone();
    OrtPipeline::load(config).with_context(|| format!("failed to load models from {}", dir.display()))
}

fn open_source(path: &Path, repeat: bool) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        let source = ImageSequenceSource::from_dir(path)?.looping(repeat);
        Ok(Box::new(source))
    } else {
        let limit = if repeat { None } else { Some(1) };
        Ok(Box::new(StillImageSource::open(path, limit)?))
    }
}
