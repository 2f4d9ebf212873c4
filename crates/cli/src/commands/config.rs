//! Remote configuration commands

use anyhow::{bail, Result};
use colored::Colorize;
use serde_json::{Map, Value};

use crate::client::ApiClient;
use crate::output::{print_heading, print_json, print_success, OutputFormat};

/// Build a partial update from `path=value` assignments
///
/// Dotted paths nest (`thresholds.scale_up.cpu_percent=85`). Values are
/// parsed as JSON where possible so numbers and booleans keep their type.
pub fn build_update(assignments: &[String]) -> Result<Value> {
    let mut root = Map::new();

    for assignment in assignments {
        let Some((path, raw)) = assignment.split_once('=') else {
            bail!("Expected key=value, got '{}'", assignment);
        };
        let keys: Vec<&str> = path.trim().split('.').collect();
        if keys.iter().any(|k| k.is_empty()) {
            bail!("Invalid option path '{}'", path);
        }

        let raw = raw.trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        insert_path(&mut root, &keys, value)?;
    }

    if root.is_empty() {
        bail!("No configuration changes given");
    }
    Ok(Value::Object(root))
}

fn insert_path(map: &mut Map<String, Value>, keys: &[&str], value: Value) -> Result<()> {
    match keys {
        [] => Ok(()),
        [last] => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(child) => insert_path(child, rest, value),
                _ => bail!("Option '{}' is set both as a value and as a section", head),
            }
        }
    }
}

fn print_flat(prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                print_flat(&path, child);
            }
        }
        other => println!("{:<48} {}", prefix.cyan(), other),
    }
}

/// Show the running configuration
pub async fn show_config(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let config = client.config().await?;

    match format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Table => {
            print_heading("Scaling Configuration");
            print_flat("", &config);
        }
    }
    Ok(())
}

/// Apply a partial configuration update
pub async fn set_config(
    client: &ApiClient,
    assignments: &[String],
    format: OutputFormat,
) -> Result<()> {
    let update = build_update(assignments)?;
    let applied = client.update_config(&update).await?;

    match format {
        OutputFormat::Json => print_json(&applied)?,
        OutputFormat::Table => {
            print_success("Configuration updated");
            print_flat("", &update);
        }
    }
    Ok(())
}
