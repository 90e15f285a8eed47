// End-to-end latency for the execution core
// Measures stage -> spawn -> wait -> collect -> release for trivial programs
// Interpreter defaults to /bin/sh; set NIMBLE_BENCH_INTERPRETER to point at a real binary

use nimble_runner::{ExecutionCoordinator, RunnerConfig};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const ITERATIONS: usize = 100;
const WARMUP_ITERATIONS: usize = 10;

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n=== {} ===", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

fn measure(coordinator: &ExecutionCoordinator, source: &str) -> LatencyStats {
    for _ in 0..WARMUP_ITERATIONS {
        let _ = coordinator.execute(source);
    }

    let samples = (0..ITERATIONS)
        .map(|_| {
            let start = Instant::now();
            let _ = coordinator.execute(source);
            start.elapsed()
        })
        .collect();

    LatencyStats::from_samples(samples)
}

fn main() {
    let interpreter = std::env::var_os("NIMBLE_BENCH_INTERPRETER")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/bin/sh"));
    let staging_dir = std::env::temp_dir().join(format!("nimble-bench-{}", std::process::id()));

    let coordinator = match ExecutionCoordinator::new(RunnerConfig {
        interpreter: interpreter.clone(),
        staging_dir: staging_dir.clone(),
        ..RunnerConfig::default()
    }) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to set up coordinator: {}", e);
            std::process::exit(1);
        }
    };

    println!("=== nimble-runner execute latency ===");
    println!("Interpreter: {}", interpreter.display());
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    measure(&coordinator, "").print("empty program");
    measure(&coordinator, "echo hello").print("hello");

    let concurrent_start = Instant::now();
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..ITERATIONS / 8 {
                    let _ = coordinator.execute("echo hello");
                }
            });
        }
    });
    println!(
        "\n8 threads x {} runs: {:?} total",
        ITERATIONS / 8,
        concurrent_start.elapsed()
    );

    let _ = std::fs::remove_dir_all(&staging_dir);
}
