//! Read-only views of sensors, the model and service health

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ModelInfo, SensorHistory, SensorList};
use crate::output::{
    color_status, format_timestamp, print_header, print_json, print_table, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct SensorRow {
    #[tabled(rename = "Sensor")]
    sensor_id: String,
    #[tabled(rename = "Readings")]
    records: usize,
    #[tabled(rename = "Last Reading")]
    last_seen: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Triggered")]
    triggered: String,
}

#[derive(Tabled)]
struct ReadingRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Triggered")]
    triggered: String,
    #[tabled(rename = "Max Amplitude")]
    max_amplitude: String,
}

/// Cell text for a reading field, "-" when absent
fn cell(reading: &BTreeMap<String, Value>, key: &str) -> String {
    match reading.get(key) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn reading_time(reading: &BTreeMap<String, Value>) -> String {
    ["timestamp", "date"]
        .iter()
        .find_map(|key| reading.get(*key).and_then(Value::as_str))
        .map(format_timestamp)
        .unwrap_or_else(|| "-".to_string())
}

pub async fn list_sensors(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list: SensorList = client.get("sensors", &[]).await?;

    if let OutputFormat::Json = format {
        return print_json(&list);
    }

    if list.sensors.is_empty() {
        print_warning("No sensors have reported readings");
        return Ok(());
    }

    let rows: Vec<SensorRow> = list
        .sensors
        .iter()
        .map(|s| {
            let latest = s.latest.clone().unwrap_or_default();
            SensorRow {
                sensor_id: s.sensor_id.clone(),
                records: s.record_count,
                last_seen: reading_time(&latest),
                active: cell(&latest, "isActive"),
                triggered: cell(&latest, "isTriggered"),
            }
        })
        .collect();

    print_table(rows);
    println!("\nTotal: {} sensors", list.count);

    Ok(())
}

pub async fn show_history(
    client: &ApiClient,
    sensor_id: &str,
    order: &str,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut query = vec![("order", order.to_string())];
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }

    let path = format!("sensors/{}/history", sensor_id);
    let history: SensorHistory = client.get(&path, &query).await?;

    if let OutputFormat::Json = format {
        return print_json(&history);
    }

    print_header("Sensor History", 60);
    println!("Sensor: {}", history.sensor_id.cyan());
    println!();

    if history.history.is_empty() {
        print_warning("No readings found for this sensor");
        return Ok(());
    }

    let rows: Vec<ReadingRow> = history
        .history
        .iter()
        .map(|r| ReadingRow {
            timestamp: reading_time(r),
            active: cell(r, "isActive"),
            triggered: cell(r, "isTriggered"),
            max_amplitude: cell(r, "Max_Amplitude"),
        })
        .collect();

    print_table(rows);
    println!("\nTotal: {} readings", history.count);

    Ok(())
}

pub async fn show_model(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let info: ModelInfo = client.get("ml/model/info", &[]).await?;

    if let OutputFormat::Json = format {
        return print_json(&info);
    }

    print_header("Model", 50);
    println!("Status:      {}", color_status(&info.status));
    println!("Name:        {}", info.config.model_name.cyan());
    println!("Version:     {}", info.config.version);
    println!("Type:        {}", info.model_type);
    println!(
        "Path:        {}",
        info.model_path.as_deref().unwrap_or("-")
    );
    println!("Threshold:   {}", info.config.threshold);
    println!();
    println!("{}", "Features".bold());
    println!("{}", "-".repeat(50));
    for name in &info.feature_names {
        println!("  {}", name);
    }
    println!();
    println!("{}", "Classes".bold());
    println!("{}", "-".repeat(50));
    for (class, label) in &info.config.output_classes {
        println!("  {}  {}", class, label);
    }

    Ok(())
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get("healthz", &[]).await?;

    if let OutputFormat::Json = format {
        return print_json(&health);
    }

    print_header("Service Health", 50);
    println!("Overall:     {}", color_status(&health.status));
    println!();

    for (name, component) in &health.components {
        match &component.message {
            Some(message) => println!(
                "  {:<16} {}  {}",
                name,
                color_status(&component.status),
                message.dimmed()
            ),
            None => println!("  {:<16} {}", name, color_status(&component.status)),
        }
    }

    Ok(())
}
