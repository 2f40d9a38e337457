//! Prediction and training commands

use anyhow::Result;
use colored::Colorize;

use crate::client::ApiClient;
use crate::output::{format_minutes, print_json, print_success, print_warning, OutputFormat};

/// Estimate the wait for a new token in a department
pub async fn predict(client: &ApiClient, department_id: i64, format: OutputFormat) -> Result<()> {
    let prediction = client.predict(department_id).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            println!("Department:     {}", department_id.to_string().cyan());
            println!(
                "Estimated wait: {}",
                format_minutes(prediction.estimated_wait_time).bold()
            );
            match prediction.queue_length {
                Some(length) => println!("Queue length:   {}", length),
                None => println!("Queue length:   {}", "unknown".dimmed()),
            }
            if let Some(reason) = &prediction.fallback {
                print_warning(&format!("Default estimate served ({})", reason));
            }
        }
    }

    Ok(())
}

/// Retrain the model for a department from the current history
pub async fn retrain(client: &ApiClient, department_id: i64, format: OutputFormat) -> Result<()> {
    let response = client.retrain(department_id).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success(&format!("{} for department {}", response.message, department_id))
        }
    }

    Ok(())
}
