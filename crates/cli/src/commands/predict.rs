//! Prediction commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    AlertsSummary, ApiClient, BatchPredictRequest, BatchResponse, PredictRequest,
    PredictResponse, PredictionHistory,
};
use crate::output::{
    color_alert, color_level, color_status, format_confidence, format_timestamp, print_header,
    print_json, print_success, print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Level")]
    level: String,
}

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Sensor")]
    sensor_id: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Alert Sent")]
    alert_sent: String,
}

pub async fn predict(
    client: &ApiClient,
    sensor_id: &str,
    auto_alert: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = PredictRequest {
        sensor_id: sensor_id.to_string(),
        auto_alert,
    };
    let response: PredictResponse = client.post("ml/predict", &request).await?;

    if let OutputFormat::Json = format {
        return print_json(&response);
    }

    let p = &response.prediction;
    print_header("Prediction", 50);
    println!("Sensor:      {}", sensor_id.cyan());
    println!("Result:      {}", color_alert(p.is_alert));
    println!("Label:       {}", p.class_label);
    println!("Confidence:  {}", format_confidence(p.confidence));
    println!("Level:       {}", color_level(p.alert_level.as_deref()));
    println!("Timestamp:   {}", format_timestamp(&p.timestamp));
    if p.features_were_derived {
        println!("Features:    {}", "derived from activity flags".dimmed());
    }

    if let Some(error) = &p.error {
        print_warning(&format!("Classifier error: {}", error));
    }
    if let Some(error) = &p.persistence_error {
        print_warning(&format!("Prediction not stored: {}", error));
    }

    if let Some(n) = &response.notification {
        println!();
        println!("{}", "Notification".bold());
        println!("{}", "-".repeat(50));
        println!("Status:      {}", color_status(&n.status));
        println!("Delivered:   {}", n.success_count);
        println!("Failed:      {}", n.failure_count);
        if let Some(error) = &n.error {
            println!("Detail:      {}", error);
        }
    }

    if response.alert_sent {
        print_success("Alert sent");
    }

    Ok(())
}

pub async fn predict_batch(
    client: &ApiClient,
    sensor_ids: Vec<String>,
    auto_alert: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = BatchPredictRequest {
        sensor_ids,
        auto_alert,
    };
    let response: BatchResponse = client.post("ml/predict/batch", &request).await?;

    if let OutputFormat::Json = format {
        return print_json(&response);
    }

    let rows: Vec<BatchRow> = response
        .results
        .iter()
        .map(|entry| match (&entry.prediction, &entry.error) {
            (Some(p), _) => BatchRow {
                sensor_id: entry.sensor_id.clone(),
                result: color_alert(p.is_alert),
                confidence: format_confidence(p.confidence),
                alert_sent: if entry.alert_sent.unwrap_or(false) { "yes" } else { "no" }
                    .to_string(),
            },
            (None, error) => BatchRow {
                sensor_id: entry.sensor_id.clone(),
                result: error.clone().unwrap_or_else(|| "error".to_string()).red().to_string(),
                confidence: "-".to_string(),
                alert_sent: "-".to_string(),
            },
        })
        .collect();

    print_table(rows);
    println!(
        "\nTotal: {}  Successful: {}  Failed: {}",
        response.total,
        response.successful.to_string().green(),
        response.failed.to_string().red()
    );

    Ok(())
}

pub async fn show_predictions(
    client: &ApiClient,
    sensor_id: &str,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("ml/predictions/{}", sensor_id);
    let history: PredictionHistory = client.get(&path, &[("limit", limit.to_string())]).await?;

    if let OutputFormat::Json = format {
        return print_json(&history);
    }

    print_header("Prediction History", 60);
    println!("Sensor: {}", history.sensor_id.cyan());
    println!();

    if history.predictions.is_empty() {
        print_warning(
            history
                .message
                .as_deref()
                .unwrap_or("No predictions found for this sensor"),
        );
        return Ok(());
    }

    let rows: Vec<PredictionRow> = history
        .predictions
        .iter()
        .map(|p| PredictionRow {
            timestamp: format_timestamp(&p.timestamp),
            result: color_alert(p.is_alert),
            label: p.class_label.clone(),
            confidence: format_confidence(p.confidence),
            level: color_level(p.alert_level.as_deref()),
        })
        .collect();

    print_table(rows);
    println!("\nTotal: {} predictions", history.total);

    Ok(())
}

pub async fn show_summary(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let summary: AlertsSummary = client.get("ml/alerts/summary", &[]).await?;

    if let OutputFormat::Json = format {
        return print_json(&summary);
    }

    print_header("Alerts Summary", 50);
    println!("Total Predictions:  {}", summary.total_predictions);
    println!("Alerts:             {}", summary.alert_count.to_string().red());
    println!("Normal:             {}", summary.normal_count.to_string().green());
    println!("Alert Rate:         {:.2}%", summary.alert_percentage);
    println!();

    if summary.sensors_with_alerts.is_empty() {
        print_success("No sensors have raised alerts");
    } else {
        println!("{}", "Sensors With Alerts".bold());
        println!("{}", "-".repeat(50));
        for sensor in &summary.sensors_with_alerts {
            println!("  {}", sensor.yellow());
        }
    }

    Ok(())
}
