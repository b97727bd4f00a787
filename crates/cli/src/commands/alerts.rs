//! Manual alerts and the alert log

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AlertList, ApiClient, ManualAlertRequest, ManualAlertResponse};
use crate::output::{
    format_timestamp, print_header, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Sensor")]
    sensor_id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Devices")]
    tokens_sent: usize,
}

pub async fn send_alert(
    client: &ApiClient,
    sensor_id: &str,
    force: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = ManualAlertRequest {
        sensor_id: sensor_id.to_string(),
        force,
    };
    let response: ManualAlertResponse = client.post("notification/alerts", &request).await?;

    if let OutputFormat::Json = format {
        return print_json(&response);
    }

    if response.success {
        print_success(&response.message);
    } else {
        print_warning(&response.message);
    }

    println!("Sensor:        {}", response.sensor_id.cyan());
    println!("Devices found: {}", response.tokens_found);
    if let Some(result) = &response.notification_result {
        println!(
            "Delivered:     {} of {}",
            result.success_count, result.total_tokens
        );
        if result.failure_count > 0 {
            println!("Failed:        {}", result.failure_count.to_string().red());
        }
    }
    if let Some(error) = &response.error {
        println!("Detail:        {}", error);
    }
    if !response.alert_logged {
        print_info("Alert was not written to the alert log");
    }

    Ok(())
}

pub async fn list_alerts(
    client: &ApiClient,
    sensor_id: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(sensor_id) = &sensor_id {
        query.push(("sensor_id", sensor_id.clone()));
    }

    let list: AlertList = client.get("notification/alerts", &query).await?;

    if let OutputFormat::Json = format {
        return print_json(&list);
    }

    print_header("Alert Log", 70);
    if let Some(sensor_id) = &sensor_id {
        println!("Sensor: {}", sensor_id.cyan());
        println!();
    }

    if list.alerts.is_empty() {
        print_warning("No alerts logged");
        return Ok(());
    }

    let rows: Vec<AlertRow> = list
        .alerts
        .iter()
        .map(|a| AlertRow {
            timestamp: format_timestamp(&a.timestamp),
            sensor_id: a.sensor_id.clone(),
            kind: a.kind.clone(),
            title: a.title.clone(),
            tokens_sent: a.tokens_sent,
        })
        .collect();

    print_table(rows);
    println!("\nTotal: {} alerts", list.count);

    Ok(())
}
