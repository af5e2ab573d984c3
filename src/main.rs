//! medir CLI - load-driving performance meter for inference services
//!
//! Holds a fixed number of in-flight requests against a model (or sweeps
//! concurrency upward until a latency bound) and reports client- and
//! server-side latency per stable measurement window.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use medir::client::{factory_for, Protocol};
use medir::error::{MedirError, Result};
use medir::{report, ConcurrencyManager, PerfConfig};

/// medir - load-driving performance meter for inference services
#[derive(Parser)]
#[command(name = "medir")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Print verbose progress for every measurement pass
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Enable server-side profiling around each measurement window
    #[arg(short = 'n', long = "profile")]
    profile: bool,

    /// Sweep concurrency upward until the latency threshold is reached
    #[arg(short = 'd', long = "dynamic")]
    dynamic: bool,

    /// Drive load from one pipelining worker instead of worker threads
    #[arg(short = 'a', long = "async")]
    async_workers: bool,

    /// Batch size for each request
    #[arg(short = 'b', long = "batch-size", default_value_t = 1)]
    batch_size: usize,

    /// Number of concurrent requests (the starting level with -d)
    #[arg(short = 't', long = "concurrency", default_value_t = 1)]
    concurrency: usize,

    /// Measurement window in milliseconds
    #[arg(short = 'p', long = "measurement-window")]
    measurement_window_ms: Option<u64>,

    /// Latency threshold in milliseconds stopping the dynamic sweep
    #[arg(short = 'l', long = "latency-threshold", default_value_t = 0)]
    latency_threshold_ms: u64,

    /// Maximum concurrency for the dynamic sweep; 0 means unbounded
    #[arg(short = 'c', long = "max-concurrency", default_value_t = 0)]
    max_concurrency: usize,

    /// Deviation threshold for stable measurement, in percent
    #[arg(short = 's', long = "stability-percentage", default_value_t = 10.0)]
    stability_pct: f64,

    /// Maximum number of measurements per concurrency level
    #[arg(short = 'r', long = "max-measurements", default_value_t = 10)]
    max_measurements: usize,

    /// Name of the model to benchmark
    #[arg(short = 'm', long = "model-name")]
    model_name: Option<String>,

    /// Model version; -1 selects the latest
    #[arg(
        short = 'x',
        long = "model-version",
        default_value_t = -1,
        allow_hyphen_values = true
    )]
    model_version: i64,

    /// URL of the inference service
    #[arg(short = 'u', long = "url", default_value = "localhost:8000")]
    url: String,

    /// Protocol used to communicate with the service: http or grpc
    #[arg(short = 'i', long = "protocol", default_value = "http")]
    protocol: String,

    /// File for storing the throughput-vs-latency curve in CSV format
    #[arg(short = 'f', long = "csv-file")]
    csv_file: Option<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version are not errors; everything else exits 1.
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    if let Err(err) = run(&cli) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let model_name = cli
        .model_name
        .as_deref()
        .ok_or_else(|| MedirError::InvalidArgument("-m flag must be specified".to_string()))?;
    let measurement_window_ms = cli
        .measurement_window_ms
        .filter(|&window| window > 0)
        .ok_or_else(|| {
            MedirError::InvalidArgument("measurement window must be > 0 in msec".to_string())
        })?;
    if cli.batch_size == 0 {
        return Err(MedirError::InvalidArgument(
            "batch size must be > 0".to_string(),
        ));
    }
    if cli.concurrency == 0 {
        return Err(MedirError::InvalidArgument(
            "concurrent request count must be > 0".to_string(),
        ));
    }
    if cli.stability_pct < 0.0 {
        return Err(MedirError::InvalidArgument(
            "stability percentage must be >= 0".to_string(),
        ));
    }
    let protocol = Protocol::parse(&cli.protocol)?;

    // Trap SIGINT so workers can finish in-flight requests and join.
    let early_exit = Arc::new(AtomicBool::new(false));
    {
        let early_exit = Arc::clone(&early_exit);
        ctrlc::set_handler(move || {
            println!("Interrupt signal received.");
            println!("Waiting for in-flight inferences to complete.");
            early_exit.store(true, Ordering::SeqCst);
        })
        .map_err(|e| MedirError::Internal(format!("failed to install signal handler: {e}")))?;
    }

    let factory = factory_for(protocol, &cli.url, model_name, cli.model_version)?;
    let config = PerfConfig {
        verbose: cli.verbose,
        profile: cli.profile,
        batch_size: cli.batch_size,
        stable_offset: cli.stability_pct / 100.0,
        measurement_window_ms,
        max_measurement_count: cli.max_measurements,
        async_mode: cli.async_workers,
        model_version: cli.model_version,
    };
    let mut manager = ConcurrencyManager::new(config, factory, Arc::clone(&early_exit));

    println!("*** Measurement Settings ***");
    println!("  Batch size: {}", cli.batch_size);
    println!("  Measurement window: {measurement_window_ms} msec");
    if cli.dynamic {
        println!("  Latency limit: {} msec", cli.latency_threshold_ms);
        if cli.max_concurrency != 0 {
            println!(
                "  Concurrency limit: {} concurrent requests",
                cli.max_concurrency
            );
        }
    }
    println!();

    if !cli.dynamic {
        let summary = manager.step(cli.concurrency)?;
        report::report_step(&summary, protocol, cli.verbose);
        return Ok(());
    }

    // Dynamic mode: iterate concurrency upward until the latency ceiling,
    // the concurrency ceiling, or a step failure. Whatever was measured
    // is still reported.
    let mut summaries = Vec::new();
    let mut sweep_error = None;
    let mut concurrency = cli.concurrency;
    loop {
        if cli.max_concurrency > 0 && concurrency > cli.max_concurrency {
            break;
        }
        match manager.step(concurrency) {
            Ok(summary) => {
                report::report_step(&summary, protocol, cli.verbose);
                let latency_reached = summary.avg_latency_ms() >= cli.latency_threshold_ms;
                summaries.push(summary);
                if latency_reached {
                    break;
                }
            }
            Err(err) => {
                sweep_error = Some(err);
                break;
            }
        }
        concurrency += 1;
    }

    if !summaries.is_empty() {
        report::print_sweep_summary(&summaries);
        if let Some(csv_file) = &cli.csv_file {
            report::write_csv(Path::new(csv_file), &summaries)?;
        }
    }

    match sweep_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["medir", "-m", "resnet", "-p", "1000"]);
        assert_eq!(cli.batch_size, 1);
        assert_eq!(cli.concurrency, 1);
        assert_eq!(cli.max_concurrency, 0);
        assert_eq!(cli.model_version, -1);
        assert_eq!(cli.url, "localhost:8000");
        assert_eq!(cli.protocol, "http");
        assert!((cli.stability_pct - 10.0).abs() < f64::EPSILON);
        assert_eq!(cli.max_measurements, 10);
        assert!(!cli.dynamic);
        assert!(!cli.async_workers);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "medir", "-v", "-n", "-d", "-a", "-b", "4", "-t", "2", "-p", "500", "-l", "20", "-c",
            "16", "-s", "5", "-r", "8", "-m", "bert", "-x", "3", "-u", "host:9000", "-i", "grpc",
            "-f", "curve.csv",
        ]);
        assert!(cli.verbose && cli.profile && cli.dynamic && cli.async_workers);
        assert_eq!(cli.batch_size, 4);
        assert_eq!(cli.concurrency, 2);
        assert_eq!(cli.measurement_window_ms, Some(500));
        assert_eq!(cli.latency_threshold_ms, 20);
        assert_eq!(cli.max_concurrency, 16);
        assert!((cli.stability_pct - 5.0).abs() < f64::EPSILON);
        assert_eq!(cli.max_measurements, 8);
        assert_eq!(cli.model_name.as_deref(), Some("bert"));
        assert_eq!(cli.model_version, 3);
        assert_eq!(cli.url, "host:9000");
        assert_eq!(cli.protocol, "grpc");
        assert_eq!(cli.csv_file.as_deref(), Some("curve.csv"));
    }

    #[test]
    fn test_cli_negative_version() {
        let cli = Cli::parse_from(["medir", "-m", "m", "-p", "100", "-x", "-1"]);
        assert_eq!(cli.model_version, -1);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["medir", "-z"]).is_err());
    }

    #[test]
    fn test_missing_model_is_invalid_argument() {
        let cli = Cli::parse_from(["medir", "-p", "100"]);
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("-m flag must be specified"));
    }

    #[test]
    fn test_missing_window_is_invalid_argument() {
        let cli = Cli::parse_from(["medir", "-m", "resnet"]);
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("measurement window"));
    }

    #[test]
    fn test_zero_batch_is_invalid_argument() {
        let cli = Cli::parse_from(["medir", "-m", "resnet", "-p", "100", "-b", "0"]);
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("batch size must be > 0"));
    }
}
