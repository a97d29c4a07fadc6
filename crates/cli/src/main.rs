//! Sarpras CLI - drive and watch the daemon's job queues

mod rpc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rpc::{is_busy, RpcClient};
use serde_json::{json, Value};
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "sarpras")]
#[command(about = "Sarpras inventory queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "SARPRAS_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    Import,
    Export,
    Backup,
    Autobackup,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Import => "import",
            Kind::Export => "export",
            Kind::Backup => "backup",
            Kind::Autobackup => "autobackup",
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportKind {
    Stock,
    Accounts,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImportKind {
    Stock,
    History,
    Accounts,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Subcommand)]
enum StartCommand {
    /// Export stock (with item photos) or student accounts
    Export {
        #[arg(value_enum)]
        export_type: ExportKind,
    },
    /// Import a CSV file
    Import {
        #[arg(value_enum)]
        import_type: ImportKind,
        /// CSV file to upload
        file: std::path::PathBuf,
    },
    /// Back up borrowing history with proof photos
    Backup,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a queue
    Start {
        #[command(subcommand)]
        what: StartCommand,
    },

    /// Advance a queue by one unit of work
    Step {
        #[arg(value_enum)]
        kind: Kind,
    },

    /// Step a queue until it finishes, retrying while it is busy
    Run {
        #[arg(value_enum)]
        kind: Kind,

        /// Pause between steps in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Show queue status (all kinds when omitted)
    Status {
        #[arg(value_enum)]
        kind: Option<Kind>,
    },

    /// Remove a finished queue and its leftover files
    Clear {
        #[arg(value_enum)]
        kind: Kind,
    },

    /// Check the automatic backup schedule now
    Tick,

    /// Show or change the automatic backup schedule
    Settings {
        #[arg(long)]
        enabled: Option<bool>,

        #[arg(long, value_enum)]
        frequency: Option<Frequency>,

        /// Weekday (1 = Monday) for weekly, day of month for monthly
        #[arg(long)]
        day: Option<u32>,

        /// Local time of day, HH:MM
        #[arg(long)]
        time: Option<String>,
    },
}

#[derive(Tabled)]
struct JobLine {
    #[tabled(rename = "#")]
    index: usize,
    status: String,
    target: String,
    detail: String,
}

fn value_name<T: ValueEnum>(value: T) -> String {
    value
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_default()
}

fn is_terminal(doc: &Value) -> bool {
    matches!(doc["status"].as_str(), Some("complete") | Some("error"))
}

fn status_colored(status: &str) -> colored::ColoredString {
    match status {
        "complete" | "success" => status.green(),
        "error" => status.red(),
        "running" | "processing" | "finalizing" => status.yellow(),
        _ => status.normal(),
    }
}

fn job_lines(doc: &Value) -> Vec<JobLine> {
    let jobs = match doc["jobs"].as_array() {
        Some(jobs) => jobs,
        None => return Vec::new(),
    };
    jobs.iter()
        .enumerate()
        .map(|(index, job)| {
            let target = match job["type"].as_str() {
                Some("csv_row") => format!("row {}", job["row_number"]),
                _ => job["local_path"].as_str().unwrap_or("-").to_string(),
            };
            let detail = job["drive_url"]
                .as_str()
                .or_else(|| job["message"].as_str())
                .or_else(|| job["data_preview"].as_str())
                .unwrap_or("")
                .to_string();
            JobLine {
                index: index + 1,
                status: job["status"].as_str().unwrap_or("?").to_string(),
                target,
                detail,
            }
        })
        .collect()
}

fn print_summary(kind: &str, doc: &Value) {
    let status = doc["status"].as_str().unwrap_or("unknown");
    println!("{} {}", format!("{} queue:", kind).cyan().bold(), status_colored(status));
    if status == "idle" {
        return;
    }
    println!(
        "  {} {}/{}  {} {}  {} {}",
        "Processed:".bold(),
        doc["processed"],
        doc["total"],
        "Success:".bold(),
        doc["success"],
        "Failed:".bold(),
        doc["failed"]
    );
    if let Some(url) = doc["csv_url"].as_str() {
        println!("  {} {}", "Result:".bold(), url);
    }
}

fn print_document(kind: &str, doc: &Value) {
    print_summary(kind, doc);
    let lines = job_lines(doc);
    if !lines.is_empty() {
        println!();
        println!("{}", Table::new(lines));
    }
    if let Some(log) = doc["log"].as_array() {
        println!();
        for entry in log.iter().rev().take(5).rev() {
            let message = entry["message"].as_str().unwrap_or("");
            let line = match entry["level"].as_str() {
                Some("error") => message.red(),
                Some("warning") => message.yellow(),
                Some("success") => message.green(),
                _ => message.normal(),
            };
            println!("  {} {}", entry["time"].as_str().unwrap_or(""), line);
        }
    }
}

async fn run_queue(client: &RpcClient, kind: Kind, interval: Duration) -> Result<Value> {
    let params = json!({ "kind": kind.as_str() });
    loop {
        match client.call("queue.step.v1", params.clone()).await {
            Ok(doc) => {
                println!(
                    "  {} {}/{} ({} failed)",
                    status_colored(doc["status"].as_str().unwrap_or("?")),
                    doc["processed"],
                    doc["total"],
                    doc["failed"]
                );
                if is_terminal(&doc) {
                    return Ok(doc);
                }
            }
            Err(e) if is_busy(&e) => println!("  {}", "busy, retrying...".yellow()),
            Err(e) => return Err(e),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Accept `HH:MM` as well as `HH:MM:SS`
fn normalize_time(raw: &str) -> String {
    if raw.len() == 5 {
        format!("{}:00", raw)
    } else {
        raw.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = RpcClient::new(cli.rpc_url.clone());

    match cli.command {
        Commands::Start { what } => {
            let (kind, params) = match what {
                StartCommand::Export { export_type } => (
                    "export",
                    json!({ "kind": "export", "export_type": value_name(export_type) }),
                ),
                StartCommand::Import { import_type, file } => {
                    let csv_content = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    (
                        "import",
                        json!({
                            "kind": "import",
                            "import_type": value_name(import_type),
                            "csv_content": csv_content,
                        }),
                    )
                }
                StartCommand::Backup => ("backup", json!({ "kind": "backup" })),
            };

            let doc = client.call("queue.start.v1", params).await?;
            println!("{}", format!("✓ {} queue started", kind).green().bold());
            println!();
            print_summary(kind, &doc);
        }

        Commands::Step { kind } => {
            let doc = client
                .call("queue.step.v1", json!({ "kind": kind.as_str() }))
                .await?;
            print_document(kind.as_str(), &doc);
        }

        Commands::Run { kind, interval_ms } => {
            println!("{}", format!("Running {} queue...", kind.as_str()).cyan().bold());
            let doc = run_queue(&client, kind, Duration::from_millis(interval_ms)).await?;
            println!();
            print_document(kind.as_str(), &doc);
        }

        Commands::Status { kind } => {
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => Kind::value_variants().to_vec(),
            };
            for kind in kinds {
                match client
                    .call("queue.status.v1", json!({ "kind": kind.as_str() }))
                    .await
                {
                    Ok(doc) => print_summary(kind.as_str(), &doc),
                    Err(e) => println!("  {} {}: {}", "✗".red(), kind.as_str(), e),
                }
            }
        }

        Commands::Clear { kind } => {
            let report = client
                .call("queue.clear.v1", json!({ "kind": kind.as_str() }))
                .await?;
            println!(
                "{} (document removed: {}, files removed: {})",
                format!("✓ {} queue cleared", kind.as_str()).green().bold(),
                report["removed_document"],
                report["removed_artifacts"]
            );
        }

        Commands::Tick => {
            let result = client.call("autobackup.tick.v1", json!({})).await?;
            let outcome = result["outcome"].as_str().unwrap_or("unknown");
            match outcome {
                "launched" => println!("{}", "✓ Automatic backup launched".green().bold()),
                other => println!("  ○ {}", other.replace('_', " ")),
            }
        }

        Commands::Settings {
            enabled,
            frequency,
            day,
            time,
        } => {
            let mut params = serde_json::Map::new();
            if let Some(enabled) = enabled {
                params.insert("enabled".into(), json!(enabled));
            }
            if let Some(frequency) = frequency {
                params.insert("frequency".into(), json!(value_name(frequency)));
            }
            if let Some(day) = day {
                params.insert("day".into(), json!(day));
            }
            if let Some(time) = time {
                params.insert("time".into(), json!(normalize_time(&time)));
            }

            let settings = client
                .call("autobackup.settings.v1", Value::Object(params))
                .await?;
            println!("{}", "Automatic backup".cyan().bold());
            println!("  {} {}", "Enabled:".bold(), settings["enabled"]);
            println!("  {} {}", "Frequency:".bold(), settings["frequency"]);
            println!("  {} {}", "Day:".bold(), settings["day"]);
            println!("  {} {}", "Time:".bold(), settings["time"]);
            println!("  {} {}", "Last run:".bold(), settings["last_run"]);
            println!("  {} {}", "State:".bold(), status_colored(settings["state"].as_str().unwrap_or("?")));
            if let Some(error) = settings["last_error"].as_str() {
                println!("  {} {}", "Last error:".bold(), error.red());
            }
        }
    }

    Ok(())
}
