//! # Failfence - CLI Entry Point
//!
//! Commands:
//! - `start`       - Run the tracking/ban agent
//! - `status`      - Show whether the agent is running
//! - `init-config` - Generate a default configuration file
//!
//! The agent reads audit records as JSON lines on stdin, one object per
//! record: `{"source": "mssql-logon", "properties": [...], "timestamp":
//! "..."}`. A real deployment points its audit-log subscriber at this feed;
//! the subscription transport itself is out of scope here.

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use failfence::agent::FenceAgent;
use failfence::firewall::MemoryRuleStore;
use failfence::log_sources::{mssql, rdp, RawRecord};
use failfence::{FenceConfig, FenceError, FenceResult};

/// Failfence - fail2ban-style logon protection agent.
///
/// Tracks authentication failures per source IP and feeds a fragmented
/// firewall block list once an IP exceeds its threshold.
#[derive(Parser, Debug)]
#[command(name = "failfence")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "failfence.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent, consuming audit records from stdin.
    Start,

    /// Show whether the agent is running.
    Status,

    /// Generate a default configuration file.
    InitConfig,
}

/// One stdin line: the target source plus the raw record envelope.
#[derive(serde::Deserialize)]
struct IntakeRecord {
    source: String,
    #[serde(flatten)]
    record: RawRecord,
}

fn main() -> FenceResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => cmd_start(&cli.config),
        Commands::Status => cmd_status(&cli.config),
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

/// Run the agent until stdin closes or a shutdown signal arrives.
fn cmd_start(config_path: &Path) -> FenceResult<()> {
    info!("failfence starting...");

    let config = if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        FenceConfig::from_file(config_path)?
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        FenceConfig::default()
    };

    std::fs::create_dir_all(&config.general.data_dir)?;

    let pid_path = config.general.data_dir.join("failfence.pid");
    write_pid_file(&pid_path)?;
    info!("PID file written to: {}", pid_path.display());

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    // The memory store stands in for the OS packet filter; a production
    // backend implements FirewallRuleStore over the real thing and is
    // injected here instead.
    let store = MemoryRuleStore::new();
    let agent = FenceAgent::start(&config, Box::new(store.clone()))?;

    let mut intakes = HashMap::new();
    for name in agent.source_names() {
        if let Some(intake) = agent.intake(name) {
            intakes.insert(name.to_string(), intake);
        }
    }

    info!(
        "failfence is watching {} sources. Track, trigger, ban.",
        intakes.len(),
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown signal received. Stopping gracefully...");
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("Record feed read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let intake: IntakeRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("Undeliverable feed line discarded: {}", e);
                continue;
            }
        };
        match intakes.get(&intake.source) {
            Some(sender) => {
                // A closed intake means the worker died; that is worth
                // stopping for, unlike a bad record.
                if sender.send(intake.record).is_err() {
                    error!("Source [{}] no longer accepting records", intake.source);
                    break;
                }
            }
            None => warn!("Record for unknown source [{}] discarded", intake.source),
        }
    }

    // Dropping our senders lets the workers drain and exit.
    drop(intakes);
    agent.shutdown();

    let rules = store.snapshot();
    let banned: usize = rules.iter().map(|r| r.addresses.len()).sum();
    info!(
        "Block list at exit: {} fragments, {} addresses.",
        rules.len(),
        banned,
    );

    if let Err(e) = std::fs::remove_file(&pid_path) {
        warn!("Could not remove PID file: {}", e);
    }

    info!("failfence stopped.");
    Ok(())
}

/// Show the current status of the running agent.
fn cmd_status(config_path: &Path) -> FenceResult<()> {
    let config = if config_path.exists() {
        FenceConfig::from_file(config_path)?
    } else {
        FenceConfig::default()
    };

    let pid_path = config.general.data_dir.join("failfence.pid");

    match read_pid_file(&pid_path) {
        Some(pid) => {
            if is_process_running(pid) {
                println!("failfence is RUNNING (PID: {})", pid);
            } else {
                println!("failfence is NOT RUNNING (stale PID file, PID {} not found)", pid);
                println!("  The agent may have crashed. Remove {} to clear.", pid_path.display());
            }
        }
        None => {
            println!("failfence is NOT RUNNING (no PID file)");
        }
    }

    println!();
    println!("Configuration:");
    println!("  Block rule base name: {}", config.firewall.base_rule_name);
    for name in [mssql::SOURCE_NAME, rdp::SOURCE_NAME] {
        let settings = config.sources.settings_for(name);
        println!(
            "  {}: threshold {}, reset window {}s",
            name, settings.max_failed_attempts, settings.reset_window_secs,
        );
    }

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> FenceResult<()> {
    if config_path.exists() {
        return Err(FenceError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    FenceConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!("Key settings to configure:");
    println!("  [sources.defaults]    - Fallback threshold and reset window");
    println!("  [sources.mssql_logon] - Database-engine logon overrides");
    println!("  [sources.rdp_logon]   - Remote-desktop logon overrides");
    println!("  [firewall]            - Base name for block-rule fragments");

    Ok(())
}

// ---------------------------------------------------------------------------
// PID file management
// ---------------------------------------------------------------------------

/// Write the current process PID to a file.
fn write_pid_file(path: &Path) -> FenceResult<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

/// Read a PID from a PID file. Returns None if file doesn't exist or is invalid.
fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

/// Check if a process with the given PID is still running.
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // On Unix, kill(pid, 0) checks if process exists without sending a signal.
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        use std::process::Command;
        // On Windows, use tasklist to check if the PID exists.
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output();
        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                !stdout.contains("No tasks") && stdout.contains(&pid.to_string())
            }
            Err(_) => false,
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}
