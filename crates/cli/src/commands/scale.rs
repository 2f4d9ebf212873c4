//! Manual scaling command

use anyhow::Result;
use colored::Colorize;

use crate::client::ApiClient;
use crate::output::{
    color_action, color_status, format_timestamp, format_usd, print_error, print_heading,
    print_info, print_json, print_success, OutputFormat,
};

/// Set the fleet to `target` instances, bypassing the decision engine
pub async fn scale(
    client: &ApiClient,
    target: u32,
    reason: &str,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Table {
        print_info(&format!("Requesting {} instances ({})", target, reason));
    }

    let execution = client.scale(target, reason).await?;

    if format == OutputFormat::Json {
        return print_json(&execution);
    }

    match execution.status.as_str() {
        "completed" if execution.action == "maintain" => {
            print_success(&format!("Fleet already at {} instances", target))
        }
        "completed" => print_success(&format!("Fleet scaled to {} instances", target)),
        _ => print_error(&format!(
            "Scaling ended as {}: {}",
            execution.status,
            execution.error_message.as_deref().unwrap_or("no details")
        )),
    }

    println!();
    print_heading("Execution");
    println!("ID:                     {}", execution.execution_id.cyan());
    println!("Action:                 {}", color_action(&execution.action));
    println!("Status:                 {}", color_status(&execution.status));
    println!("Started:                {}", format_timestamp(&execution.started_at));
    if let Some(done) = &execution.completed_at {
        println!("Completed:              {}", format_timestamp(done));
    }
    if !execution.created_instances.is_empty() {
        println!("Created:                {}", execution.created_instances.join(", "));
    }
    if !execution.terminated_instances.is_empty() {
        println!(
            "Terminated:             {}",
            execution.terminated_instances.join(", ")
        );
    }
    if execution.rollback_performed {
        println!("Rollback:               {}", "performed".yellow());
    }
    println!("Cost Change:            {}/hour", format_usd(execution.cost_estimate));

    Ok(())
}
