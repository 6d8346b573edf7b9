use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use storybook_contracts::events::EventWriter;
use storybook_engine::config::WorkerConfig;
use storybook_engine::Worker;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "storybook-worker",
    version,
    about = "Story illustration worker for a local image-generation API"
)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Handle one job envelope (`{"input": {...}}`) and print the result.
    Handle(HandleArgs),
    /// Print the worker capability descriptor.
    Info,
    /// Block until the image service answers its readiness probe.
    WaitReady(WaitArgs),
}

#[derive(Debug, Args)]
struct ServiceArgs {
    /// API base of the image service, e.g. http://127.0.0.1:3000/sdapi/v1
    #[arg(long, global = true, env = "STORYBOOK_API_BASE")]
    api_base: Option<String>,
    /// Append job events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct HandleArgs {
    /// Path to the job envelope; reads stdin when omitted or `-`.
    #[arg(long)]
    job: Option<PathBuf>,
    /// Wait for the image service before handling the job.
    #[arg(long)]
    wait_ready: bool,
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Args)]
struct WaitArgs {
    #[arg(long, default_value_t = 300)]
    attempts: u32,
    #[arg(long, default_value_t = 2)]
    interval_secs: u64,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("storybook-worker error: {err:#}");
            println!("{}", json!({"error": format!("Handler failed: {err:#}")}));
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let worker = build_worker(&cli.service)?;
    match cli.command {
        Command::Handle(args) => run_handle(&worker, args),
        Command::Info => {
            print_json(&serde_json::to_value(worker.info())?, true)?;
            Ok(0)
        }
        Command::WaitReady(args) => {
            let ready = worker
                .gateway()
                .wait_until_ready(args.attempts, Duration::from_secs(args.interval_secs));
            Ok(if ready { 0 } else { 1 })
        }
    }
}

fn build_worker(service: &ServiceArgs) -> Result<Worker> {
    let mut config = WorkerConfig::from_env();
    if let Some(api_base) = service
        .api_base
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        config.api_base = api_base.trim_end_matches('/').to_string();
    }
    info!(api_base = %config.api_base, "worker configured");
    let worker = Worker::new(config)?;
    Ok(match &service.events {
        Some(path) => worker.with_events(EventWriter::new(path.clone(), "worker")),
        None => worker,
    })
}

fn run_handle(worker: &Worker, args: HandleArgs) -> Result<i32> {
    if args.wait_ready && !worker.gateway().wait_until_ready(300, Duration::from_secs(2)) {
        print_json(
            &json!({"error": "WebUI API service failed to start"}),
            args.pretty,
        )?;
        return Ok(1);
    }
    let envelope = read_envelope(args.job.as_ref())?;
    let result = worker.handle_event(&envelope);
    print_json(&result, args.pretty)?;
    Ok(if result.get("error").is_some() { 2 } else { 0 })
}

fn read_envelope(path: Option<&PathBuf>) -> Result<Value> {
    let raw = match path.filter(|path| path.as_os_str() != "-") {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading job {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed reading job from stdin")?;
            buffer
        }
    };
    serde_json::from_str(&raw).context("job envelope is not valid JSON")
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{read_envelope, Cli, Command};

    #[test]
    fn handle_accepts_global_service_flags() {
        let cli = Cli::try_parse_from([
            "storybook-worker",
            "handle",
            "--job",
            "job.json",
            "--api-base",
            "http://gpu:3000/sdapi/v1",
            "--pretty",
        ]);
        let cli = match cli {
            Ok(cli) => cli,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(cli.service.api_base.as_deref(), Some("http://gpu:3000/sdapi/v1"));
        match cli.command {
            Command::Handle(args) => {
                assert!(args.pretty);
                assert!(!args.wait_ready);
                assert_eq!(args.job.as_deref(), Some(std::path::Path::new("job.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn wait_ready_has_bounded_defaults() {
        let cli = Cli::try_parse_from(["storybook-worker", "wait-ready"]);
        match cli.map(|cli| cli.command) {
            Ok(Command::WaitReady(args)) => {
                assert_eq!(args.attempts, 300);
                assert_eq!(args.interval_secs, 2);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn envelope_is_read_from_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("job.json");
        std::fs::write(&path, r#"{"input": {"action": "get_info"}}"#)?;
        let envelope = read_envelope(Some(&path))?;
        assert_eq!(envelope["input"]["action"], "get_info");
        Ok(())
    }
}
