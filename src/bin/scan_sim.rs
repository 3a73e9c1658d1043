//! Scan load simulator
//!
//! Fires concurrent scan requests at a running faregate instance and
//! reports outcome counts and latency percentiles. Point it at a server
//! seeded with a matching ticket manifest (see --emit-seed).

use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "scan-sim", about = "Concurrent scan load generator")]
struct Args {
    /// Base URL of the faregate API
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Number of distinct ticket codes to scan
    #[arg(long, default_value = "200")]
    tickets: usize,

    /// Concurrent scanner workers
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Scans per ticket (values > 1 exercise the already-used path)
    #[arg(long, default_value = "2")]
    repeats: usize,

    /// Ticket code prefix
    #[arg(long, default_value = "SIM")]
    prefix: String,

    /// Print a JSONL seed manifest for the configured codes and exit
    #[arg(long)]
    emit_seed: bool,
}

#[derive(Debug, Default)]
struct Tally {
    accepted: u64,
    already_used: u64,
    not_found: u64,
    invalid: u64,
    errors: u64,
    latencies_us: Vec<u64>,
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64 * pct).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

async fn run_worker(
    client: reqwest::Client,
    url: String,
    worker_id: usize,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    results: mpsc::Sender<(String, u64)>,
) {
    loop {
        let code = {
            let mut rx = jobs.lock().await;
            match rx.recv().await {
                Some(code) => code,
                None => break,
            }
        };

        let body = serde_json::json!({ "code": code, "actor": format!("sim-{worker_id}") });
        let start = Instant::now();
        let outcome = match client.post(format!("{url}/api/scan")).json(&body).send().await {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(value) => value["reason"]
                    .as_str()
                    .unwrap_or_else(|| value["outcome"].as_str().unwrap_or("error"))
                    .to_string(),
                Err(_) => "error".to_string(),
            },
            Err(_) => "error".to_string(),
        };
        let latency_us = start.elapsed().as_micros() as u64;

        if results.send((outcome, latency_us)).await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.emit_seed {
        for i in 0..args.tickets {
            println!(
                r#"{{"code":"{}-{i}","trip":"SIM-TRIP"}}"#,
                args.prefix
            );
        }
        return Ok(());
    }

    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    let (job_tx, job_rx) = mpsc::channel::<String>(1024);
    let (result_tx, mut result_rx) = mpsc::channel::<(String, u64)>(1024);
    let jobs = Arc::new(tokio::sync::Mutex::new(job_rx));

    let mut workers = Vec::new();
    for worker_id in 0..args.workers {
        workers.push(tokio::spawn(run_worker(
            client.clone(),
            args.url.clone(),
            worker_id,
            jobs.clone(),
            result_tx.clone(),
        )));
    }
    drop(result_tx);

    let total_scans = args.tickets * args.repeats;
    let started = Instant::now();

    let prefix = args.prefix.clone();
    let tickets = args.tickets;
    let repeats = args.repeats;
    tokio::spawn(async move {
        for round in 0..repeats {
            for i in 0..tickets {
                if job_tx.send(format!("{prefix}-{i}")).await.is_err() {
                    return;
                }
            }
            // Keep rounds roughly phase-separated so repeat scans actually
            // hit already-used tickets
            if round + 1 < repeats {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    });

    let mut tally = Tally::default();
    while let Some((outcome, latency_us)) = result_rx.recv().await {
        match outcome.as_str() {
            "accepted" => tally.accepted += 1,
            "already_used" => tally.already_used += 1,
            "not_found" => tally.not_found += 1,
            "invalid" => tally.invalid += 1,
            _ => tally.errors += 1,
        }
        tally.latencies_us.push(latency_us);
    }

    for worker in workers {
        let _ = worker.await;
    }

    let elapsed = started.elapsed();
    tally.latencies_us.sort_unstable();

    println!("=== scan-sim results ===");
    println!("scans:        {total_scans} in {:.2}s", elapsed.as_secs_f64());
    println!(
        "throughput:   {:.0} scans/sec",
        total_scans as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("accepted:     {}", tally.accepted);
    println!("already_used: {}", tally.already_used);
    println!("not_found:    {}", tally.not_found);
    println!("invalid:      {}", tally.invalid);
    println!("errors:       {}", tally.errors);
    println!(
        "latency us:   p50={} p95={} p99={} max={}",
        percentile(&tally.latencies_us, 0.50),
        percentile(&tally.latencies_us, 0.95),
        percentile(&tally.latencies_us, 0.99),
        tally.latencies_us.last().copied().unwrap_or(0),
    );

    Ok(())
}
