//! Model management commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{format_timestamp, print_json, print_success, print_warning, OutputFormat};

/// Row for models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Department")]
    department_id: i64,
    #[tabled(rename = "Trained")]
    trained_at: String,
    #[tabled(rename = "Rows")]
    training_rows: usize,
    #[tabled(rename = "Algorithm")]
    algorithm: String,
}

/// List every stored department model
pub async fn list_models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let models = client.list_models().await?;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            if models.is_empty() {
                print_warning("No models found");
                return Ok(());
            }

            let rows: Vec<ModelRow> = models
                .iter()
                .map(|m| ModelRow {
                    department_id: m.department_id,
                    trained_at: format_timestamp(&m.trained_at),
                    training_rows: m.training_rows,
                    algorithm: m.algorithm.clone(),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} models", models.len());
        }
    }

    Ok(())
}

/// Drop a department model so the next prediction retrains it
pub async fn invalidate_model(
    client: &ApiClient,
    department_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let response = client.invalidate_model(department_id).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success(&format!("{} for department {}", response.message, department_id))
        }
    }

    Ok(())
}
