//! NoETL Command Line Tool
//!
//! A thin wrapper over the server's REST API: every subcommand maps to
//! one API operation. Exit code 0 on success; on a protocol or server
//! error the response's `error` field is printed and the exit code is
//! non-zero.

mod api;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use api::ApiClient;

#[derive(Parser)]
#[command(name = "noetlctl")]
#[command(version, about = "NoETL Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// NoETL server URL
    #[arg(long, default_value = "http://localhost:8082", env = "NOETL_SERVER_URL")]
    server_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an execution of a catalog playbook
    Run {
        /// Catalog path of the playbook
        path: String,

        /// Catalog version (latest if omitted)
        #[arg(short = 'V', long)]
        version: Option<String>,

        /// Parameters (format: key=value), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        parameters: Vec<String>,

        /// Parameters as a JSON object (merged over --set)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },

    /// Fetch execution status and summary
    Status {
        /// Execution ID
        execution_id: String,
    },

    /// Page the event log of an execution
    Events {
        /// Execution ID
        execution_id: String,

        /// Return events after this event id
        #[arg(long, default_value_t = 0)]
        since: i64,
    },

    /// Cancel an execution
    Cancel {
        /// Execution ID
        execution_id: String,

        /// Cancellation reason
        #[arg(long, default_value = "cancelled from CLI")]
        reason: String,
    },

    /// Queue administration
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Catalog management
    #[command(subcommand)]
    Catalog(CatalogCommands),
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Trigger an immediate reap of expired leases
    Reap,
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Register a playbook file in the catalog
    Register {
        /// Playbook file (YAML)
        file: PathBuf,

        /// Catalog path; defaults to the playbook's metadata path or name
        #[arg(long)]
        path: Option<String>,

        /// Catalog version
        #[arg(short = 'V', long, default_value = "1")]
        version: String,
    },

    /// Fetch a playbook from the catalog
    Get {
        /// Catalog path
        path: String,

        /// Catalog version (latest if omitted)
        #[arg(short = 'V', long)]
        version: Option<String>,
    },

    /// List catalog entries
    List,
}

/// Parse repeated `key=value` arguments into a JSON map.
fn parse_parameters(
    pairs: &[String],
    payload: Option<&str>,
) -> Result<HashMap<String, serde_json::Value>> {
    let mut parameters = HashMap::new();

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid parameter '{}', expected key=value", pair))?;
        // Values that parse as JSON keep their type; everything else is a
        // string.
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        parameters.insert(key.to_string(), value);
    }

    if let Some(payload) = payload {
        let payload: HashMap<String, serde_json::Value> =
            serde_json::from_str(payload).context("Invalid --payload JSON")?;
        parameters.extend(payload);
    }

    Ok(parameters)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server_url);

    match cli.command {
        Commands::Run {
            path,
            version,
            parameters,
            payload,
        } => {
            let parameters = parse_parameters(&parameters, payload.as_deref())?;
            let response = client.run(&path, version.as_deref(), &parameters).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Status { execution_id } => {
            let response = client.execution(&execution_id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Events {
            execution_id,
            since,
        } => {
            let response = client.events(&execution_id, since).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Cancel {
            execution_id,
            reason,
        } => {
            let response = client.cancel(&execution_id, &reason).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Queue(QueueCommands::Reap) => {
            let response = client.reap_expired().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Catalog(CatalogCommands::Register {
            file,
            path,
            version,
        }) => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let path = match path {
                Some(path) => path,
                None => infer_catalog_path(&content, &file)?,
            };
            let response = client.register_playbook(&path, &version, &content).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Catalog(CatalogCommands::Get { path, version }) => {
            let response = client.get_playbook(&path, version.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Catalog(CatalogCommands::List) => {
            let response = client.list_playbooks().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

/// Derive the catalog path from the playbook's metadata, falling back to
/// the file stem. A cheap line scan is enough; the server validates the
/// document anyway.
fn infer_catalog_path(content: &str, file: &std::path::Path) -> Result<String> {
    for prefix in ["path:", "name:"] {
        for line in content.lines() {
            if let Some(rest) = line.trim_start().strip_prefix(prefix) {
                let value = rest.trim().trim_matches('"');
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    file.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .context("Cannot infer a catalog path; pass --path")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameters_typed_values() {
        let parameters = parse_parameters(
            &[
                "url=https://example.com".to_string(),
                "count=3".to_string(),
                "enabled=true".to_string(),
            ],
            None,
        )
        .unwrap();

        assert_eq!(
            parameters["url"],
            serde_json::json!("https://example.com")
        );
        assert_eq!(parameters["count"], serde_json::json!(3));
        assert_eq!(parameters["enabled"], serde_json::json!(true));
    }

    #[test]
    fn test_parse_parameters_payload_wins() {
        let parameters = parse_parameters(
            &["region=us-east".to_string()],
            Some(r#"{"region": "eu-west"}"#),
        )
        .unwrap();

        assert_eq!(parameters["region"], serde_json::json!("eu-west"));
    }

    #[test]
    fn test_parse_parameters_rejects_bare_key() {
        assert!(parse_parameters(&["novalue".to_string()], None).is_err());
    }

    #[test]
    fn test_infer_catalog_path_from_name() {
        let content = "metadata:\n  name: my_flow\nworkflow: []\n";
        let path = infer_catalog_path(content, std::path::Path::new("flow.yaml")).unwrap();
        assert_eq!(path, "my_flow");
    }
}
