//! Runs snippets in a child interpreter process.

use async_trait::async_trait;
use infrastructure::config::PrimitiveConfig;
use orchestrator::{Context, ExecutionErrorInfo, ExecutionPrimitive, LogEntry, LogLevel, PrimitiveOutput};
use regex::Regex;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Environment variable carrying the JSON-encoded request context.
pub const CONTEXT_ENV: &str = "EXECQ_CONTEXT";

const SPAWN_ERROR: &str = "SpawnError";
const PROCESS_ERROR: &str = "ProcessError";

/// `<interpreter> <args...> <code>`, with the context in [`CONTEXT_ENV`].
///
/// The child is killed when the future is dropped, which is what happens when the
/// runner's timeout fires first.
pub struct ProcessPrimitive {
    interpreter: String,
    args: Vec<String>,
    error_line: Regex,
}

impl ProcessPrimitive {
    pub fn new(interpreter: impl Into<String>, args: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            interpreter: interpreter.into(),
            args,
            error_line: Regex::new(r"(?m)^\s*(?:Uncaught\s+)?([A-Za-z_$][\w$]*Error): (.*)$")?,
        })
    }

    pub fn from_config(config: &PrimitiveConfig) -> Result<Self, regex::Error> {
        Self::new(config.interpreter.clone(), config.args.clone())
    }

    /// First `<Name>Error: message` line in stderr, if any.
    pub fn parse_error(&self, stderr: &str) -> Option<ExecutionErrorInfo> {
        let captures = self.error_line.captures(stderr)?;
        Some(ExecutionErrorInfo::new(&captures[1], captures[2].trim_end()))
    }

    fn failure(&self, status: std::process::ExitStatus, stderr: &str) -> ExecutionErrorInfo {
        let error = self.parse_error(stderr).unwrap_or_else(|| {
            let last_line = stderr.lines().rev().find(|line| !line.trim().is_empty());
            let message = match (status.code(), last_line) {
                (Some(code), Some(line)) => format!("exit status {code}: {line}"),
                (Some(code), None) => format!("exit status {code}"),
                (None, Some(line)) => format!("terminated by signal: {line}"),
                (None, None) => "terminated by signal".to_string(),
            };
            ExecutionErrorInfo::new(PROCESS_ERROR, message)
        });
        if stderr.trim().is_empty() {
            error
        } else {
            error.with_stack(stderr.trim_end())
        }
    }
}

/// The last non-empty stdout line, as JSON when it parses, else as a string.
fn result_value(stdout: &str) -> Value {
    match stdout.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => serde_json::from_str(line.trim()).unwrap_or_else(|_| Value::String(line.to_string())),
        None => Value::Null,
    }
}

fn captured_logs(stdout: &str, stderr: &str) -> Vec<LogEntry> {
    stdout
        .lines()
        .map(LogEntry::info)
        .chain(stderr.lines().map(|line| LogEntry::new(LogLevel::Warn, line)))
        .collect()
}

#[async_trait]
impl ExecutionPrimitive for ProcessPrimitive {
    async fn execute(&self, code: &str, context: &Context, timeout: Duration) -> PrimitiveOutput {
        let context_json = match serde_json::to_string(context) {
            Ok(json) => json,
            Err(e) => return PrimitiveOutput::error("ContextError", e.to_string()),
        };

        debug!(
            interpreter = %self.interpreter,
            timeout_ms = timeout.as_millis() as u64,
            "Spawning interpreter"
        );

        let output = Command::new(&self.interpreter)
            .args(&self.args)
            .arg(code)
            .env(CONTEXT_ENV, context_json)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return PrimitiveOutput::error(
                    SPAWN_ERROR,
                    format!("failed to start {}: {e}", self.interpreter),
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let logs = captured_logs(&stdout, &stderr);

        if output.status.success() {
            PrimitiveOutput::value(result_value(&stdout)).with_logs(logs)
        } else {
            PrimitiveOutput {
                result: Err(self.failure(output.status, &stderr)),
                captured_output: logs,
            }
        }
    }
}
