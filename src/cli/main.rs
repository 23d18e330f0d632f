use clap::{Parser, Subcommand};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::path::PathBuf;

/// Records sent per request by `load`
const LOAD_CHUNK_SIZE: usize = 1000;

#[derive(Parser)]
#[command(name = "facet-cli")]
#[command(about = "Facet engine CLI", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "FACET_ENGINE_ENDPOINT")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Show index statistics
    Stats,

    /// Create or replace a record
    Put {
        #[arg(value_name = "RECORD_ID")]
        id: String,

        /// Metadata as field=value (repeatable)
        #[arg(short, long = "field", value_parser = parse_pair)]
        fields: Vec<(String, Value)>,
    },

    /// Bulk-load records from a JSON Lines file of {"id": ..., "fields": {...}}
    Load {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Get a record
    Get {
        #[arg(value_name = "RECORD_ID")]
        id: String,
    },

    /// Delete a record
    Delete {
        #[arg(value_name = "RECORD_ID")]
        id: String,
    },

    /// Facet counts for a filter
    Search {
        /// Constraint as field=value (repeatable)
        #[arg(short, long = "filter", value_parser = parse_pair)]
        filters: Vec<(String, Value)>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
}

/// Parse `field=value`; numbers and booleans keep their JSON type
fn parse_pair(raw: &str) -> Result<(String, Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{}'", raw))?;
    if field.is_empty() {
        return Err(format!("empty field name in '{}'", raw));
    }

    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok((field.to_string(), value))
}

fn to_object(pairs: Vec<(String, Value)>) -> Map<String, Value> {
    pairs.into_iter().collect()
}

async fn print_response(response: Response) -> Result<(), Box<dyn Error>> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        println!("{}", status);
        return Ok(());
    }

    let body: Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        return Err(format!("request failed with {}", status).into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Stats => {
            let response = client
                .get(format!("{}/v1/stats", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Put { id, fields } => {
            let response = client
                .put(format!("{}/v1/records/{}", cli.endpoint, id))
                .json(&json!({ "fields": to_object(fields) }))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Load { file } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let mut records = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: Value = serde_json::from_str(line)
                    .map_err(|e| format!("{}:{}: {}", file.display(), line_no + 1, e))?;
                records.push(record);
            }

            let mut indexed = 0u64;
            for chunk in records.chunks(LOAD_CHUNK_SIZE) {
                let response = client
                    .post(format!("{}/v1/records", cli.endpoint))
                    .json(&json!({ "records": chunk }))
                    .send()
                    .await?;

                let status = response.status();
                let body: Value = response.json().await?;
                if !status.is_success() {
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    return Err(format!("load stopped after {} records: {}", indexed, status).into());
                }
                indexed += body["indexed"].as_u64().unwrap_or(0);
            }
            println!("Loaded {} records from {}", indexed, file.display());
        }

        Commands::Get { id } => {
            let response = client
                .get(format!("{}/v1/records/{}", cli.endpoint, id))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Delete { id } => {
            let response = client
                .delete(format!("{}/v1/records/{}", cli.endpoint, id))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Search {
            filters,
            top_k,
            timeout_ms,
        } => {
            let response = client
                .post(format!("{}/v1/search", cli.endpoint))
                .json(&json!({
                    "filter": to_object(filters),
                    "top_k": top_k,
                    "timeout_ms": timeout_ms,
                }))
                .send()
                .await?;
            print_response(response).await?;
        }
    }

    Ok(())
}
