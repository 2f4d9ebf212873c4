//! Status and metrics commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, DetailedMetrics, ManagerStatus};
use crate::output::{
    color_action, color_confidence, color_status, format_percent, format_timestamp, format_usd,
    print_heading, print_json, print_table, print_warning, OutputFormat,
};

/// Row for the recent decisions table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Instances")]
    instances: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Urgency")]
    urgency: u8,
    #[tabled(rename = "Reasons")]
    reasons: String,
}

/// Row for the recent executions table
#[derive(Tabled)]
struct ExecutionRow {
    #[tabled(rename = "Execution")]
    id: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Target")]
    target: u32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Cost Δ/h")]
    cost: String,
}

fn print_status_block(status: &ManagerStatus) {
    let running = if status.running { "running" } else { "stopped" };
    println!("Manager:                {}", color_status(running));
    println!("Region:                 {}", status.region.cyan());
    println!("Interval:               {}s", status.monitoring_interval_secs);
    println!(
        "Auto-scaling:           {}",
        if status.auto_scaling_enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        }
    );
    println!("Running Instances:      {}", status.running_instances);

    let cost = format_usd(status.current_hourly_cost);
    let cost = if status.current_hourly_cost > status.cost_limit_per_hour {
        cost.red().bold()
    } else {
        cost.green()
    };
    println!(
        "Hourly Cost:            {} / {} limit",
        cost,
        format_usd(status.cost_limit_per_hour)
    );
    println!(
        "Last Scaling:           {}",
        status
            .last_scaling_at
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Events (48h):           {}", status.total_events);
}

/// Show manager status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_heading("Autoscaler Status");
            print_status_block(&status);

            if !status.recent_events.is_empty() {
                println!();
                println!("{}", "Recent Events".bold());
                println!("{}", "-".repeat(50));
                for event in status.recent_events.iter().take(5) {
                    println!(
                        "{}  {:<24} {}",
                        format_timestamp(&event.timestamp).dimmed(),
                        event.kind,
                        event.message
                    );
                }
            }
        }
    }

    Ok(())
}

/// Show current metrics, forecast, cost and recent activity
pub async fn show_metrics(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let metrics: DetailedMetrics = client.detailed_metrics().await?;

    if format == OutputFormat::Json {
        return print_json(&metrics);
    }

    print_heading("Current Metrics");
    match &metrics.current {
        Some(snapshot) => {
            println!(
                "Collected:              {}",
                format_timestamp(&snapshot.timestamp)
            );
            println!("Queue Depth:            {}", snapshot.queue_depth);
            println!("Pending / Active:       {} / {}", snapshot.pending_requests, snapshot.active_tasks);
            println!("CPU:                    {}", format_percent(snapshot.cpu_percent));
            println!("Memory:                 {}", format_percent(snapshot.memory_percent));
            if let Some(gpu) = snapshot.gpu_utilization {
                println!("GPU:                    {}", format_percent(gpu));
            }
            println!(
                "Response (avg / p95):   {:.0}ms / {:.0}ms",
                snapshot.avg_response_ms, snapshot.p95_response_ms
            );
            println!("Success Rate:           {}", format_percent(snapshot.success_rate));
        }
        None => print_warning("No metrics collected yet"),
    }

    println!();
    println!("{}", "Forecast".bold());
    println!("{}", "-".repeat(50));
    match &metrics.forecast {
        Some(forecast) => {
            println!(
                "Queue in {} steps:       {:.1} ({:.1} - {:.1})",
                forecast.horizon, forecast.value, forecast.forest_lower, forecast.forest_upper
            );
            println!("Model:                  {}", forecast.model);
            println!("Confidence:             {}", color_confidence(forecast.confidence));
        }
        None => println!("{}", "No forecast available (model untrained)".dimmed()),
    }
    if let Some(health) = &metrics.model_health {
        match (&health.grade, health.score) {
            (Some(grade), Some(score)) => println!(
                "Model Health:           {} ({:.0}/100){}",
                color_status(grade),
                score,
                if health.requires_retraining == Some(true) {
                    " - retraining requested".yellow().to_string()
                } else {
                    String::new()
                }
            ),
            _ => println!(
                "Model Health:           {}",
                format!(
                    "insufficient data ({}/{} validated predictions)",
                    health.samples.unwrap_or(0),
                    health.required.unwrap_or(0)
                )
                .dimmed()
            ),
        }
    }
    println!("Pending Predictions:    {}", metrics.pending_predictions);

    println!();
    println!("{}", "Cost".bold());
    println!("{}", "-".repeat(50));
    println!("Per Hour:               {}", format_usd(metrics.cost.cost_per_hour));
    println!("Per Day:                {}", format_usd(metrics.cost.cost_per_day));
    println!("Per Month:              {}", format_usd(metrics.cost.cost_per_month));

    println!();
    println!("{}", "Recent Decisions".bold());
    print_table(
        metrics
            .recent_decisions
            .iter()
            .map(|d| DecisionRow {
                id: d.id,
                time: format_timestamp(&d.decided_at),
                action: color_action(&d.action),
                instances: format!("{} → {}", d.current_instances, d.recommended_instances),
                confidence: color_confidence(d.confidence),
                urgency: d.urgency,
                reasons: d.reasons.join(", "),
            })
            .collect(),
    );

    println!();
    println!("{}", "Recent Executions".bold());
    print_table(
        metrics
            .recent_executions
            .iter()
            .map(|e| ExecutionRow {
                id: e.execution_id.clone(),
                action: color_action(&e.action),
                target: e.target_instances,
                status: color_status(&e.status),
                cost: format_usd(e.cost_estimate),
            })
            .collect(),
    );

    Ok(())
}
