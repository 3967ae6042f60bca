use anyhow::Result;
use clap::Args;
use console::style;
use infrastructure::config::AppConfig;

use super::build_manager;

#[derive(Debug, Args)]
pub struct PoliciesCommand {}

impl PoliciesCommand {
    pub fn execute(&self, config: &AppConfig) -> Result<()> {
        let manager = build_manager(config)?;
        let (current, _) = manager.current_policy();

        println!("{}", style("Execution policies").bold());
        for (name, policy) in manager.policies().policies() {
            let marker = if name == current { "*" } else { " " };
            let allowed = match &policy.retryable_error_types {
                Some(types) => types
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                None => "all".to_string(),
            };
            println!(
                " {} {:<14} strategy={} timeout={} retry={} max_retries={} clean={} retryable={}",
                style(marker).green().bold(),
                style(&name).cyan(),
                policy.strategy_name,
                policy
                    .timeout_ms
                    .map_or_else(|| "default".to_string(), |ms| format!("{ms}ms")),
                policy.enable_retry,
                policy.max_retries,
                policy.clean_context_on_retry,
                allowed
            );
        }

        let retry = manager.retry_policies();
        println!();
        println!("{}", style("Retry policies").bold());
        for (name, policy) in retry.policies() {
            println!(
                "   {:<14} attempts={} base={}ms x{} cap={}ms jitter={} clean={}",
                style(&name).cyan(),
                policy.max_attempts,
                policy.base_delay_ms,
                policy.backoff_multiplier,
                policy.max_delay_ms,
                policy.jitter,
                policy.clean_context
            );
        }

        println!();
        println!("{}", style("Error types").bold());
        let ceilings = retry.ceilings();
        for (error_type, policy_name) in retry.error_map() {
            let ceiling = ceilings
                .get(&error_type)
                .map(|c| format!(" ceiling={c}"))
                .unwrap_or_default();
            println!("   {:<20} -> {}{}", error_type.as_str(), policy_name, ceiling);
        }

        Ok(())
    }
}
