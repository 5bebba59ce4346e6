//! Run mode - one input video, one annotated output
//!
//! The pipeline runs on a blocking worker thread. This task only watches it:
//! it logs progress, turns Ctrl-C and `--timeout` into a cooperative cancel,
//! and prints the JSON run report when the worker is done.

use anyhow::{Context as _, Result};
use clap::Args;
use egg_inspect::{
    default_output_path, full_pipeline_with, is_supported_input, load_model_with, AppConfig,
    PipelineRun, RunHandle, RunStatus, SUPPORTED_EXTENSIONS,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Args, Debug)]
pub struct RunCommand {
    /// Input video file (mp4, avi, mov)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output video (default: <FILE>_detected.mp4 next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// ONNX detection model (default: model/best.onnx)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum confidence for a detection to be drawn (0.0-1.0)
    #[arg(long)]
    confidence: Option<f32>,

    /// Stop processing after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Accept input files with unrecognized extensions
    #[arg(long, default_value = "false")]
    force: bool,
}

impl RunCommand {
    pub async fn execute(self) -> Result<()> {
        if !self.input.exists() {
            anyhow::bail!("Input file does not exist: {}", self.input.display());
        }
        if !self.force && !is_supported_input(&self.input) {
            anyhow::bail!(
                "Unsupported input {} (expected one of: {}; use --force to try anyway)",
                self.input.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            );
        }

        let config = self.app_config()?;
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.input));
        if output == self.input {
            anyhow::bail!("Output must differ from the input: {}", output.display());
        }

        let model_path = config.model_path();
        let model = load_model_with(&model_path, config.detection.clone())
            .with_context(|| format!("Failed to load model {}", model_path.display()))?;

        let run = PipelineRun::new();
        let handle = run.handle();
        let input = self.input.clone();
        let mut worker = tokio::task::spawn_blocking(move || {
            full_pipeline_with(&run, &input, &output, &model, &config)
        });

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        // The first tick fires immediately
        ticker.tick().await;

        let result = loop {
            tokio::select! {
                joined = &mut worker => break joined.context("Pipeline worker panicked")?,
                _ = ticker.tick() => log_progress(&handle),
                _ = &mut ctrl_c, if !handle.is_cancel_requested() => {
                    info!("Stop requested, finishing the current frame");
                    handle.cancel();
                }
                () = &mut deadline, if !handle.is_cancel_requested() => {
                    warn!("Timeout of {}s reached, stopping", timeout.unwrap_or_default());
                    handle.cancel();
                }
            }
        };

        match result {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
                match (&report.status, &report.output, &report.partial_output) {
                    (RunStatus::Completed, Some(path), _) => {
                        info!("Annotated video written to {}", path.display());
                    }
                    (_, _, Some(partial)) => {
                        warn!("Run cancelled, partial video kept at {}", partial.display());
                    }
                    _ => warn!("Run cancelled before any frame was written"),
                }
                Ok(())
            }
            Err(e) => {
                if let Some(partial) = handle.partial_output() {
                    warn!("Partial video kept at {}", partial.display());
                }
                Err(e).with_context(|| format!("Inspection of {} failed", self.input.display()))
            }
        }
    }

    fn app_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_yaml(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AppConfig::default(),
        };
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                anyhow::bail!("--confidence must be between 0 and 1, got {confidence}");
            }
            config.set_confidence(confidence);
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        Ok(config)
    }
}

fn log_progress(handle: &RunHandle) {
    let processed = handle.processed_count();
    match (handle.total_count(), handle.fraction()) {
        (Some(total), Some(fraction)) => info!(
            "Progress: {}/{} frames ({:.1}%)",
            processed,
            total,
            fraction * 100.0
        ),
        _ => info!("Progress: {} frames", processed),
    }
}
