use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use infrastructure::config::AppConfig;
use orchestrator::{ExecutionRequest, RequestSource};
use std::path::PathBuf;
use tracing::info;

use super::build_manager;
use crate::render;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Manual,
    Automatic,
}

impl From<SourceArg> for RequestSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Manual => RequestSource::Manual,
            SourceArg::Automatic => RequestSource::Automatic,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Inline snippet; repeat for several
    #[arg(short, long = "code")]
    pub code: Vec<String>,

    /// Read a snippet from a file; repeat for several
    #[arg(short, long = "file")]
    pub file: Vec<PathBuf>,

    /// Per-request timeout overriding the policy
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long, value_enum, default_value = "manual")]
    pub source: SourceArg,
}

impl RunCommand {
    async fn payloads(&self) -> Result<Vec<String>> {
        let mut payloads = self.code.clone();
        for path in &self.file {
            let code = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            payloads.push(code);
        }
        if payloads.is_empty() {
            bail!("Nothing to run: pass --code or --file");
        }
        Ok(payloads)
    }

    /// Returns whether every payload succeeded.
    pub async fn execute(&self, config: &AppConfig) -> Result<bool> {
        let payloads = self.payloads().await?;
        let manager = build_manager(config)?;
        info!(count = payloads.len(), policy = %config.engine.current_policy, "Submitting payloads");

        let handles: Vec<_> = payloads
            .into_iter()
            .map(|code| {
                let mut request = ExecutionRequest::new(code).with_source(self.source.into());
                if let Some(timeout_ms) = self.timeout_ms {
                    request = request.with_timeout_ms(timeout_ms);
                }
                manager.submit(request)
            })
            .collect();

        let mut all_succeeded = true;
        for handle in handles {
            let outcome = handle.await;
            all_succeeded &= outcome.success;
            print!("{}", render::outcome(&outcome));
        }

        println!();
        print!("{}", render::summary(&manager.summary()));
        Ok(all_succeeded)
    }
}
