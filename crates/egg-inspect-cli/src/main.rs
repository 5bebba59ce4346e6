//! Egg Inspect CLI - egg defect detection on video
//!
//! Runs the detection model over every frame of an input video and writes an
//! annotated copy.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::probe::ProbeCommand;
use commands::run::RunCommand;

#[derive(Parser)]
#[command(
    name = "egg-inspect",
    version,
    about = "Detect and classify defective eggs in video",
    long_about = "Runs a YOLOv8 ONNX model frame by frame over an input video, draws the\n\
                  detections and encodes an annotated output video.\n\n\
                  Ctrl-C stops processing after the current frame; frames already written\n\
                  are kept as a partial video next to the requested output.",
    after_help = "EXAMPLES:\n  \
                  # Inspect a video with the default model (model/best.onnx)\n  \
                  egg-inspect run eggs.mp4\n\n  \
                  # Custom model, output and threshold\n  \
                  egg-inspect run eggs.mp4 --model weights/eggs.onnx --output out.mp4 --confidence 0.4\n\n  \
                  # Settings from YAML, stop after 10 minutes\n  \
                  egg-inspect run eggs.mov --config inspect.yaml --timeout 600\n\n  \
                  # Show stream metadata\n  \
                  egg-inspect probe eggs.mp4"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect defects and write an annotated video
    Run(RunCommand),

    /// Print stream metadata as JSON
    Probe(ProbeCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        // Keep stdout clean for the JSON
        Commands::Probe(_) if !cli.verbose => Level::WARN,
        _ => {
            if cli.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            }
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Run(cmd) => cmd.execute().await,
        Commands::Probe(cmd) => cmd.execute(),
    }
}
