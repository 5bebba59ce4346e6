use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ProbeCommand {
    /// Input video file
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

impl ProbeCommand {
    pub fn execute(self) -> Result<()> {
        let info = egg_inspect_decoder::probe(&self.input)
            .with_context(|| format!("Failed to probe {}", self.input.display()))?;
        println!("{}", serde_json::to_string_pretty(&info)?);
        Ok(())
    }
}
