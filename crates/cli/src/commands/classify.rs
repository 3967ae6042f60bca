use anyhow::{Context, Result};
use clap::Args;
use orchestrator::{ErrorClassifier, ExecutionErrorInfo};

#[derive(Debug, Args)]
pub struct ClassifyCommand {
    /// Error name as the interpreter reports it
    #[arg(short, long, default_value = "Error")]
    pub name: String,

    pub message: String,
}

impl ClassifyCommand {
    pub fn execute(&self) -> Result<()> {
        let classifier =
            ErrorClassifier::with_default_rules().context("Failed to compile default rules")?;
        let classification =
            classifier.classify(&ExecutionErrorInfo::new(&self.name, &self.message));
        println!("{}", serde_json::to_string_pretty(&classification)?);
        Ok(())
    }
}
