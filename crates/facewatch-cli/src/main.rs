use anyhow::Result;
use clap::{Parser, Subcommand};
use facewatch_core::{EncodingStore, OnnxProvider, StoreError};
use facewatch_hw::{Annotator, Camera};
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

mod alert;
mod config;
mod display;
mod live;
mod pipeline;

use alert::TelegramDispatcher;
use config::Config;
use display::PreviewSink;
use live::{LiveLoop, LiveOptions, LiveSummary, SystemClock};
use pipeline::{PipelineError, Source};

#[derive(Parser)]
#[command(name = "facewatch", about = "Face identification and unknown-face alerts")]
struct Cli {
    /// TOML config file (default: $FACEWATCH_CONFIG or <project root>/facewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the encoding store from the dataset directory
    Train,
    /// Enroll images for a new or existing person
    Save {
        /// Identity name (case-sensitive)
        #[arg(long)]
        person: Option<String>,
        /// A single image
        #[arg(long, conflicts_with = "folder")]
        image: Option<PathBuf>,
        /// A folder of images
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Use --folder verbatim instead of resolving it under the project root
        #[arg(long)]
        fullpath: bool,
    },
    /// Print the enrolled identities
    Load {
        /// Dump every stored vector as JSON
        #[arg(long)]
        verbose: bool,
    },
    /// Identify faces in images or on the live camera
    Recognize {
        #[arg(long, conflicts_with_all = ["folder", "video"])]
        image: Option<PathBuf>,
        #[arg(long, conflicts_with = "video")]
        folder: Option<PathBuf>,
        /// Live camera recognition with unknown-face alerts
        #[arg(long)]
        video: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("missing arguments: {0}")]
    MissingArguments(&'static str),
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Err(e) if is_user_facing(&e) => {
            eprintln!("{e}");
            Ok(())
        }
        other => other,
    }
}

/// Argument and store errors are reported to the user; everything else
/// terminates the process with an error.
fn is_user_facing(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CliError>().is_some()
        || err.downcast_ref::<StoreError>().is_some()
        || matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Store(_)))
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");
    let store = EncodingStore::new(config.encodings_path.clone());

    match cli.command {
        Commands::Train => {
            let mut provider = load_provider(&config)?;
            let reports = pipeline::train(
                &mut provider,
                &store,
                &config.dataset_dir,
                config.enroll_resize,
            )?;
            for r in &reports {
                println!("{}: {} vectors ({} skipped)", r.identity, r.added, r.skipped);
            }
            println!("Trained {} identities into {}", reports.len(), store.path().display());
        }
        Commands::Save {
            person,
            image,
            folder,
            fullpath,
        } => {
            let person = person.ok_or(CliError::MissingArguments(
                "save needs --person and one of --image or --folder",
            ))?;
            let source = match (image, folder) {
                (Some(image), _) => Source::Image(image),
                (None, Some(folder)) => Source::Folder(config.resolve_folder(&folder, fullpath)),
                (None, None) => {
                    return Err(CliError::MissingArguments(
                        "save needs --image or --folder along with --person",
                    )
                    .into())
                }
            };

            let mut provider = load_provider(&config)?;
            let report = pipeline::enroll(&mut provider, &store, &person, &source, config.enroll_resize)?;
            println!(
                "Saved {} new vectors for {} ({} images without a face)",
                report.added, report.identity, report.skipped
            );
        }
        Commands::Load { verbose } => {
            let encodings = store.load()?;
            if verbose {
                println!("{}", serde_json::to_string_pretty(&encodings)?);
            } else if encodings.is_empty() {
                println!("No identities enrolled");
            } else {
                for (name, vectors) in encodings.iter() {
                    let dim = vectors.first().map(|v| v.dim()).unwrap_or(0);
                    println!("{name}: {} vectors (dim {dim})", vectors.len());
                }
                println!(
                    "{} identities, {} vectors",
                    encodings.len(),
                    encodings.total_vectors()
                );
            }
        }
        Commands::Recognize {
            image,
            folder,
            video,
        } => {
            let source = match (image, folder, video) {
                (_, _, true) => return recognize_live(&config, &store).await,
                (Some(image), _, _) => Source::Image(image),
                (None, Some(folder), _) => Source::Folder(folder),
                (None, None, false) => {
                    return Err(CliError::MissingArguments(
                        "recognize needs one of --image, --folder or --video",
                    )
                    .into())
                }
            };

            let mut provider = load_provider(&config)?;
            for result in pipeline::recognize_batch(&mut provider, &store, &source)? {
                println!("{}", result.path.display());
                if result.faces.is_empty() {
                    println!("  no faces");
                }
                for face in &result.faces {
                    println!(
                        "  {} (top {}, right {}, bottom {}, left {})",
                        face.decision,
                        face.bbox.top(),
                        face.bbox.right(),
                        face.bbox.bottom(),
                        face.bbox.left()
                    );
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
        }
    }

    Ok(())
}

fn load_provider(config: &Config) -> Result<OnnxProvider> {
    Ok(OnnxProvider::load(
        &config.model_dir,
        config.detector_model,
        config.similarity_threshold,
    )?)
}

async fn recognize_live(config: &Config, store: &EncodingStore) -> Result<()> {
    let (Some(token), Some(chat_id)) = (config.telegram_token.clone(), config.telegram_chat_id.clone())
    else {
        return Err(CliError::NotConfigured(
            "live recognition needs [telegram] token and chat_id (or FACEWATCH_TELEGRAM_TOKEN / FACEWATCH_TELEGRAM_CHAT_ID)",
        )
        .into());
    };

    let encodings = store.load()?;
    let dispatcher = TelegramDispatcher::new(token, chat_id)?;
    let options = LiveOptions {
        unknown_timeout_minutes: config.unknown_timeout_minutes,
        annotator: Annotator::new(config.box_style())?,
        capture_dir: config.capture_dir.clone(),
        alert_dir: std::env::temp_dir(),
    };
    let config = config.clone();
    let runtime = tokio::runtime::Handle::current();

    // Camera, inference and the stdin prompt block; keep them off the async workers.
    let summary = tokio::task::spawn_blocking(move || -> Result<LiveSummary> {
        let provider = load_provider(&config)?;
        let camera = Camera::open(&config.camera_device)?;
        let stream = camera.stream()?;
        let summary = LiveLoop::new(
            stream,
            provider,
            PreviewSink::new(config.preview_path.clone()),
            dispatcher,
            SystemClock,
            options,
        )
        .run(&encodings, &runtime)?;
        Ok(summary)
    })
    .await??;

    println!(
        "Processed {} frames, {} alerts sent, {} failed",
        summary.frames, summary.alerts_sent, summary.alerts_failed
    );
    if let Some(path) = summary.snapshot {
        println!("Snapshot saved to {}", path.display());
    }
    Ok(())
}
