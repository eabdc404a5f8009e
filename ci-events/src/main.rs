//! ci-events - CLI tool for the CI events delivery worker
//!
//! This tool provides commands for:
//! - Checking collector configuration
//! - Pushing a file of CI events through the delivery worker
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/ci-events/config.toml (~/.config/ci-events/config.toml)
//! - Logs: $XDG_STATE_HOME/ci-events/ (~/.local/state/ci-events/)

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ci_events_core::collector::{ConfiguredServer, EventsService, HttpTransport};
use ci_events_core::{CiEvent, Config};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ci-events")]
#[command(about = "Deliver CI build events to a collector")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    /// Config file to use instead of the XDG default
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show collector configuration
    Status,

    /// Deliver events from a JSON file (array or one event per line); `-` reads stdin
    Send {
        input: PathBuf,

        /// Give up waiting for delivery after this many seconds
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(
            ci_events_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Send { input, timeout } => cmd_send(config, &input, Duration::from_secs(timeout)),
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("CI Events Collector Configuration");
    println!("=================================");
    println!();

    let server = &config.server;
    println!(
        "Collector URL:   {}",
        server.url.as_deref().unwrap_or("<not set>")
    );
    println!("Shared Space:    {}", server.shared_space);
    println!(
        "Instance ID:     {}",
        server.instance_id.as_deref().unwrap_or("<generated>")
    );
    println!("Server Type:     {}", server.server_type);
    println!();

    let delivery = &config.delivery;
    println!("Send Interval:   {}ms", delivery.send_interval_ms);
    println!("Retry Pause:     {}ms (doubling)", delivery.initial_retry_pause_ms);
    println!("Max Retries:     {}", delivery.max_send_retries);
    println!("Suspension:      {}s", delivery.suspend_interval_secs);
    println!("Timeout:         {}s", delivery.request_timeout_secs);

    println!();
    match config.validate() {
        Ok(()) => println!("Status: Ready to deliver"),
        Err(e) => {
            println!("Status: Not ready ({})", e);
            println!();
            println!("Configure the collector in config.toml:");
            println!();
            println!("  [server]");
            println!("  url = \"https://your-collector.example.com\"");
            println!("  shared_space = \"1001\"");
        }
    }

    Ok(())
}

fn cmd_send(config: Config, input: &Path, timeout: Duration) -> Result<()> {
    config.validate().context("collector is not configured")?;

    let events = read_events(input)?;
    if events.is_empty() {
        println!("No events to send.");
        return Ok(());
    }
    let total = events.len() as u64;

    let server = ConfiguredServer::new(&config.server).context("invalid server configuration")?;
    let transport = HttpTransport::new(config.delivery.request_timeout())
        .context("failed to create HTTP client")?;
    let service = EventsService::new(config.delivery, Arc::new(server), Arc::new(transport))
        .context("failed to create events service")?;

    for event in events {
        service.publish(event);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    println!("Sending {} event(s)...", total);
    service.activate().context("failed to start events worker")?;

    let deadline = Instant::now() + timeout;
    loop {
        let stats = service.stats();
        if stats.events_sent + stats.events_dropped >= total {
            break;
        }
        if interrupted.load(Ordering::SeqCst) {
            println!("Interrupted while {}.", service.state());
            break;
        }
        if Instant::now() >= deadline {
            println!(
                "Timed out with {} event(s) pending, worker {}.",
                service.pending(),
                service.state()
            );
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let pending = service.pending() as u64;
    service.dispose();
    let stats = service.stats();

    println!();
    println!("Stats:");
    println!("  Attempts:   {}", stats.attempts);
    println!("  Sent:       {}", stats.events_sent);
    println!("  Dropped:    {}", stats.events_dropped);
    println!("  Failures:   {}", stats.failed_attempts);

    tracing::info!(
        sent = stats.events_sent,
        dropped = stats.events_dropped,
        "Send finished"
    );

    if stats.events_dropped > 0 {
        bail!("{} event(s) were dropped", stats.events_dropped);
    }
    if pending > 0 {
        bail!("{} event(s) were not delivered", pending);
    }
    Ok(())
}

/// Parse a JSON array of events, or one JSON event per line
fn read_events(input: &Path) -> Result<Vec<CiEvent>> {
    let content = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?
    };

    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed to parse events array");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid event on line {}", n + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_events_core::CiEventType;

    #[test]
    fn test_read_events_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[{"eventType":"started","project":"p","buildCiId":"1"},
                {"eventType":"finished","project":"p","buildCiId":"1","result":"failure","duration":5}]"#,
        )
        .unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, CiEventType::Started);
        assert_eq!(events[1].duration, Some(5));
    }

    #[test]
    fn test_read_events_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"eventType\":\"queued\",\"project\":\"p\",\"buildCiId\":\"1\"}\n",
                "\n",
                "{\"eventType\":\"scm\",\"project\":\"p\",\"buildCiId\":\"1\"}\n",
            ),
        )
        .unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, CiEventType::Scm);
    }

    #[test]
    fn test_read_events_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            "{\"eventType\":\"queued\",\"project\":\"p\",\"buildCiId\":\"1\"}\nnot json\n",
        )
        .unwrap();

        let err = read_events(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
