//! # Media Converter - Main Entry Point
//!
//! Adapter a riga di comando: una sessione, una conversione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti con `clap` (un sottocomando per operazione)
//! - Inizializzazione del logging con `tracing` (RUST_LOG ha la precedenza)
//! - Caricamento e validazione della configurazione
//! - Controllo dei tool esterni richiesti dall'operazione
//! - Scrittura del risultato nella directory di output
//!
//! ## Flusso di esecuzione:
//! 1. Seleziona l'operazione nella sessione `cli`
//! 2. Invia il file (o l'URL) al motore
//! 3. Se l'output supera il limite, accetta il retry solo con `--auto-optimize`
//! 4. Salva il risultato e stampa l'eventuale testo associato
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-converter gif clip.mp4 --output out/ --auto-optimize
//! media-converter stretch banner.png --width 800 --height 200 --mode fill
//! media-converter --json fetch "https://example.com/watch?v=abc" --start 12 --duration 6
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_converter::json_output::JsonMessage;
use media_converter::platform::PlatformCommands;
use media_converter::progress::{ProgressManager, Stage};
use media_converter::{
    Config, ConversionEngine, ConvertError, Decision, FileRef, OperationParams, StretchMode,
    SubmitOutcome,
};

const CLI_SESSION: &str = "cli";

#[derive(Parser)]
#[command(name = "media-converter")]
#[command(about = "Convert media with external tools under output size limits")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (JSON); defaults to the user config dir when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory the result is written to
    #[arg(short, long, global = true, default_value = ".")]
    output: PathBuf,

    /// Accept the optimized retry when the first output is too large
    #[arg(long, global = true)]
    auto_optimize: bool,

    /// Emit JSON event lines on stdout instead of a spinner
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Video to looping GIF (two-pass palette encoding)
    Gif { input: PathBuf },

    /// Lossy recompression of an existing GIF
    Compress {
        input: PathBuf,
        /// Requested reduction, 0-100
        #[arg(short, long, default_value = "50")]
        percentage: u8,
    },

    /// Centered square crop
    Crop { input: PathBuf },

    /// Resize to an explicit size
    Stretch {
        input: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// stretch, fit or fill
        #[arg(short, long, default_value = "fit")]
        mode: StretchMode,
    },

    /// Convert to another image format
    Convert {
        input: PathBuf,
        /// Target format (png, jpg, webp, gif, bmp, tiff, ico, ...)
        #[arg(short, long)]
        to: String,
        /// Quality for lossy targets (1-100)
        #[arg(short, long, default_value = "85")]
        quality: u8,
    },

    /// Assemble still images into a GIF slideshow
    Assemble {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Frames each still is held for (10 frames = 1 second)
        #[arg(short, long, default_value = "10")]
        frame_duration: u32,
    },

    /// Fetch a clip from a remote video and turn it into a GIF
    Fetch {
        url: String,
        /// Start offset in seconds
        #[arg(short, long, default_value = "0")]
        start: f64,
        /// Clip length in seconds
        #[arg(short, long, default_value = "10")]
        duration: f64,
    },

    /// Extract the dominant colors of an image
    Palette { input: PathBuf },

    /// Report the external tools found on this system
    Tools,
}

impl Command {
    /// Operation parameters and the files to submit
    fn request(self) -> Result<(OperationParams, Vec<PathBuf>)> {
        Ok(match self {
            Command::Gif { input } => (OperationParams::AnimatedEncode, vec![input]),
            Command::Compress { input, percentage } => {
                (OperationParams::LossyRecompress { percentage }, vec![input])
            }
            Command::Crop { input } => (OperationParams::Crop, vec![input]),
            Command::Stretch {
                input,
                width,
                height,
                mode,
            } => (OperationParams::Stretch { width, height, mode }, vec![input]),
            Command::Convert { input, to, quality } => (
                OperationParams::FormatConvert {
                    target_format: to,
                    quality,
                },
                vec![input],
            ),
            Command::Assemble {
                inputs,
                frame_duration,
            } => (OperationParams::MultiStillAssemble { frame_duration }, inputs),
            Command::Fetch {
                url,
                start,
                duration,
            } => (
                OperationParams::RemoteFetchConvert {
                    url,
                    start_offset: start,
                    duration,
                },
                Vec::new(),
            ),
            Command::Palette { input } => (OperationParams::PaletteExtract, vec![input]),
            Command::Tools => return Err(anyhow::anyhow!("tools does not run a conversion")),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if matches!(args.command, Command::Tools) {
        println!("{}", PlatformCommands::instance().get_tools_report());
        return Ok(());
    }

    let config = load_config(args.config.as_ref()).await?;

    // Validate and create output directory
    if !args.output.exists() {
        std::fs::create_dir_all(&args.output)?;
        info!("Created output directory: {}", args.output.display());
    }
    if !args.output.is_dir() {
        return Err(anyhow::anyhow!("Output path is not a directory: {}", args.output.display()));
    }

    let output_dir = args.output.clone();
    let (json, auto_optimize) = (args.json, args.auto_optimize);
    let (params, inputs) = args.command.request()?;

    PlatformCommands::instance()
        .check_dependencies(params.operation(), config.resolver_endpoint.is_some())?;

    let files = inputs
        .iter()
        .map(|path| FileRef::local(path))
        .collect::<Result<Vec<_>, _>>()?;

    let (engine, _events) = ConversionEngine::with_strategies(config);
    let progress = ProgressManager::new(!json);

    match run(&engine, params, files, auto_optimize, json, &progress).await {
        Ok(SubmitOutcome::Delivered(result)) => {
            let path = output_dir.join(&result.filename);
            tokio::fs::write(&path, &result.bytes).await?;
            if json {
                JsonMessage::delivered(CLI_SESSION, &result, Some(path)).emit();
            } else {
                progress.finish_delivered(&result.filename, result.bytes.len() as u64);
                if let Some(text) = &result.side_text {
                    println!("{}", text);
                }
            }
            Ok(())
        }
        Ok(_) => {
            progress.clear();
            info!("Nothing delivered");
            Ok(())
        }
        Err(e) => {
            progress.clear();
            if json {
                JsonMessage::failed(CLI_SESSION, &e).emit();
            }
            engine.close(CLI_SESSION).await;
            Err(e.into())
        }
    }
}

async fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path).await?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(default) => {
                info!("Loading configuration from {}", default.display());
                Config::from_file(&default).await?
            }
            None => Config::default(),
        },
    };
    config.validate()?;
    Ok(config)
}

async fn run(
    engine: &ConversionEngine,
    params: OperationParams,
    files: Vec<FileRef>,
    auto_optimize: bool,
    json: bool,
    progress: &ProgressManager,
) -> Result<SubmitOutcome, ConvertError> {
    let operation = params.operation();
    if json {
        JsonMessage::selected(CLI_SESSION, &params).emit();
    }
    engine.select(CLI_SESSION, params).await?;

    let subject = files
        .first()
        .map(|f| f.name.clone())
        .unwrap_or_else(|| operation.to_string());
    progress.stage(Stage::Transcoding, &subject);

    let outcome = if operation.takes_url() {
        engine.submit_url(CLI_SESSION).await?
    } else {
        engine.submit_file(CLI_SESSION, files).await?
    };

    let offer = match outcome {
        SubmitOutcome::OptimizationOffered(offer) => offer,
        other => return Ok(other),
    };

    if json {
        JsonMessage::offered(CLI_SESSION, &offer).emit();
    }
    if !auto_optimize {
        warn!("Output exceeds the size limit; rerun with --auto-optimize to accept a reduced-quality retry");
        return engine.decide(CLI_SESSION, Decision::Cancel).await;
    }

    progress.stage(Stage::Retrying, &subject);
    engine.decide(CLI_SESSION, Decision::Retry).await
}
