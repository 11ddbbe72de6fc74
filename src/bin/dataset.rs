use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use route_optimizer::{
    default_log_path, fingerprint_request, hybrid, EmitCallback, HybridSolveOptions, LogFormat,
    LoggerConfig, OptimizeRequest, RunEvent, RunRecorder,
};

#[derive(Parser)]
#[command(
    name = "dataset",
    version,
    about = "Batch helpers for hybrid solver runs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hybrid solver across a batch of requests and record logs.
    Collect {
        /// Path to a JSON array of optimize requests (orders + shoppers).
        #[arg(long)]
        input: PathBuf,
        /// Directory to write JSONL run logs into.
        #[arg(long, default_value = "logs")]
        output: PathBuf,
        /// Override the iteration budget (defaults to the solver default).
        #[arg(long)]
        iterations: Option<i64>,
        /// Fix the random seed for reproducible runs.
        #[arg(long)]
        seed: Option<i64>,
        /// Flush interval for the log writer.
        #[arg(long, default_value_t = 100usize)]
        flush_interval: usize,
    },
    /// Summarize a JSONL run log file.
    Summarize {
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Collect {
            input,
            output,
            iterations,
            seed,
            flush_interval,
        } => collect_runs(input, output, iterations, seed, flush_interval),
        Command::Summarize { input } => summarize_log(input),
    }
}

fn collect_runs(
    input: PathBuf,
    output: PathBuf,
    iterations: Option<i64>,
    seed: Option<i64>,
    flush_interval: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(&input)?;
    let requests: Vec<OptimizeRequest> = serde_json::from_reader(file)?;

    println!("Loaded {} request instances", requests.len());

    for (idx, request) in requests.into_iter().enumerate() {
        let fingerprint = fingerprint_request(&request);
        let log_path = default_log_path(&output, &format!("{}_{}", fingerprint, idx));
        let options = HybridSolveOptions {
            iterations: iterations.unwrap_or(0),
            random_seed: seed.unwrap_or(0),
            ..Default::default()
        };

        let logger_config = LoggerConfig {
            output_path: log_path.clone(),
            format: LogFormat::JsonLines,
            flush_interval,
        };
        let recorder: Arc<Mutex<RunRecorder>> = Arc::new(Mutex::new(logger_config.ensure_writer()?));

        if let Ok(mut guard) = recorder.lock() {
            guard.record_event(&RunEvent::SolveStart {
                instance_fingerprint: fingerprint,
                orders: request.orders.len(),
                couriers: request.couriers.len(),
                options: options.clone(),
            });
        }

        let snapshot_recorder = Arc::clone(&recorder);
        let emit: EmitCallback = Box::new(move |snapshot| {
            if let Ok(mut guard) = snapshot_recorder.lock() {
                guard.record_event(&RunEvent::Snapshot {
                    snapshot: snapshot.clone(),
                });
            }
        });

        let response = hybrid::solve_with_callbacks(
            &request.orders,
            &request.couriers,
            &options,
            Some(&emit),
            None,
        )?;

        if let Ok(mut guard) = recorder.lock() {
            guard.record_event(&RunEvent::SolveComplete {
                best_distance: response.optimization.total_distance_after,
                stats: response.stats.clone(),
            });
            guard.finalize();
        }

        println!(
            "[{idx}] logged run to {} | total_distance={:.2} runtime_ms={}",
            log_path.display(),
            response.optimization.total_distance_after,
            response.stats.runtime_ms
        );
    }

    Ok(())
}

fn summarize_log(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(&path)?;
    let reader = BufReader::new(file);

    let mut solve_starts = 0usize;
    let mut snapshots = 0usize;
    let mut completions = 0usize;
    let mut best_distance = f64::MAX;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: RunEvent = serde_json::from_str(&line)?;
        match event {
            RunEvent::SolveStart { .. } => solve_starts += 1,
            RunEvent::Snapshot { .. } => snapshots += 1,
            RunEvent::SolveComplete {
                best_distance: distance,
                ..
            } => {
                completions += 1;
                if distance < best_distance {
                    best_distance = distance;
                }
            }
        }
    }

    println!("Runs: {}", solve_starts);
    println!("Snapshots logged: {}", snapshots);
    println!("Completions: {}", completions);
    if completions > 0 {
        println!("Best distance: {:.2}", best_distance);
    }

    Ok(())
}
