//! Output formatting for remotecar (table, json)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use remotecar_client::{CommandEvent, Vehicle};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        }
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print rows as a table, or `json` as JSON
    pub fn print<T: Tabled, J: Serialize + ?Sized>(&self, rows: &[T], json: &J) {
        match self.format {
            OutputFormat::Table => {
                if rows.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(rows));
                }
            }
            OutputFormat::Json => print_json(json),
        }
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                print_json(&map);
            }
        }
    }
}

fn print_json<J: Serialize + ?Sized>(value: &J) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
    );
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Vehicle display for status command
#[derive(Debug, Tabled)]
pub struct VehicleRow {
    #[tabled(rename = "VIN")]
    pub vin: String,
    #[tabled(rename = "Brand")]
    pub brand: String,
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "Updated")]
    pub fetched_at: String,
    #[tabled(rename = "Remote commands")]
    pub commands: String,
}

impl From<&Vehicle> for VehicleRow {
    fn from(vehicle: &Vehicle) -> Self {
        let commands = vehicle.capabilities.supported_names();
        Self {
            vin: vehicle.vin.clone(),
            brand: vehicle.brand.to_string(),
            model: vehicle.model.clone().unwrap_or_else(|| "-".to_string()),
            fetched_at: vehicle
                .fetched_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string()),
            commands: if commands.is_empty() {
                "-".to_string()
            } else {
                commands.join(", ")
            },
        }
    }
}

/// Remote command display for command
#[derive(Debug, Tabled)]
pub struct CommandRow {
    #[tabled(rename = "VIN")]
    pub vin: String,
    #[tabled(rename = "Command")]
    pub command: String,
    #[tabled(rename = "Event")]
    pub event_id: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Polls")]
    pub polls: u32,
    #[tabled(rename = "Position")]
    pub position: String,
}

impl From<&CommandEvent> for CommandRow {
    fn from(event: &CommandEvent) -> Self {
        Self {
            vin: event.vin.clone(),
            command: event.command.to_string(),
            event_id: event.event_id.clone().unwrap_or_else(|| "-".to_string()),
            status: event.status.to_string(),
            polls: event.poll_count,
            position: event
                .position
                .as_ref()
                .map(|p| format!("{:.5}, {:.5}", p.latitude, p.longitude))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}
