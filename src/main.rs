//! Database Backup Pipeline
//!
//! Dumps a configured source database and delivers the artifact to every
//! enabled storage destination with per-destination retry.

// backupengine/src/main.rs
mod config;
mod connection;
mod delivery;
mod destination;
mod dump;
mod errors;
mod events;
mod pipeline;
mod run;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use config::AppConfig;

/// Main entry point for the backup pipeline
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json next to the executable, or in the project root
    // when running with `cargo run`.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            pipeline::run_backup_flow(&app_config)
                .await
                .context("Backup process failed")?;
        }
        "2" | "estimate" => {
            println!("📊 Estimating source database size...");
            pipeline::run_estimate_flow(&app_config)
                .await
                .context("Size estimation failed")?;
        }
        "3" | "fetch" => {
            let destination = args
                .get(2)
                .context("Usage: backupengine fetch <destination> <stored_path> [dest_dir]")?;
            let stored_path = args
                .get(3)
                .context("Usage: backupengine fetch <destination> <stored_path> [dest_dir]")?;
            let dest_dir = args
                .get(4)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));

            println!("🔄 Fetching {} from [{}]...", stored_path, destination);
            pipeline::run_fetch_flow(&app_config, destination, stored_path, &dest_dir)
                .await
                .context("Fetch process failed")?;
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (estimate), or '3' (fetch).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Estimate Source Size (or type 'estimate')");
    println!("3. Fetch Stored Backup (or type 'fetch')");
    print!("Enter your choice: ");
    let _ = stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
