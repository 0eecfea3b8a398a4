//! Lockstep CLI — run validation participants for testing and deployment.
//!
//! Modes:
//!   demo                — in-process fleet: N instances of a toy kernel (default)
//!   instance [steps]    — one env-var-driven participant, for real multi-process runs

use lockstep::{fingerprint, Config, Endpoint, Error, Validator};
use tracing::info;

const DEMO_STEPS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("");

    match mode {
        "demo" | "" => demo_mode().await,
        "instance" => {
            let steps = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEMO_STEPS);
            instance_mode(steps).await
        }
        _ => {
            eprintln!("usage: lockstep <demo|instance>");
            eprintln!("  demo              — in-process fleet of N instances (default)");
            eprintln!("  instance [steps]  — one participant driven by the environment");
            eprintln!();
            eprintln!("env vars:");
            eprintln!("  CROSS_VALIDATION_INSTANCE_ID    — this instance's id (instance mode)");
            eprintln!("  CROSS_VALIDATION_NUM_INSTANCES  — participant count");
            eprintln!("  CROSS_VALIDATION_SERVER_ADDR    — coordinator host or unix:/path");
            eprintln!("  CROSS_VALIDATION_SERVER_PORT    — coordinator port (default 5000)");
            std::process::exit(1);
        }
    }
}

/// Spawn the whole fleet in one process and run the toy kernel in lockstep.
async fn demo_mode() -> Result<(), Box<dyn std::error::Error>> {
    let num_instances: usize = std::env::var(lockstep::config::ENV_NUM_INSTANCES)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2);
    let endpoint = Endpoint::parse("127.0.0.1", 5000)?;

    eprintln!("=== lockstep demo ===");
    eprintln!("  instances: {num_instances}");
    eprintln!("  endpoint:  {endpoint}");
    eprintln!("  steps:     {DEMO_STEPS}");
    eprintln!("=====================");

    let mut fleet = Vec::new();
    for instance_id in 0..num_instances as i32 {
        let config = Config::new(instance_id, num_instances, endpoint.clone())?;
        fleet.push(tokio::spawn(run_kernel(config, DEMO_STEPS)));
    }
    for task in fleet {
        task.await??;
    }

    eprintln!("demo complete: {DEMO_STEPS} sync points, all matched");
    Ok(())
}

/// Run one real participant, configured entirely from the environment.
async fn instance_mode(steps: u32) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    run_kernel(config, steps).await?;
    Ok(())
}

/// A deterministic stand-in for the hosted computation: every replica runs
/// the same update and validates the same observable after each step.
async fn run_kernel(config: Config, steps: u32) -> Result<(), Error> {
    let instance_id = config.instance_id;
    let mut validator = Validator::init(config).await?;

    let mut positions: Vec<f64> = (0..64).map(|i| f64::from(i) * 0.5).collect();
    for step in 1..=steps {
        for p in positions.iter_mut() {
            *p += (*p * 0.001).sin();
        }
        let energy: f64 =
            positions.iter().map(|p| p * p).sum::<f64>() / positions.len() as f64;

        let fp = fingerprint!("step={step} energy={energy:.12}");
        validator.validate("timestep", &fp).await;
    }

    info!(instance = instance_id, steps, "kernel finished");
    validator.cleanup().await;
    Ok(())
}
