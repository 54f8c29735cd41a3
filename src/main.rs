use jobgrid::coordinator::config::CoordinatorConfig;
use jobgrid::coordinator::coordinator::Coordinator;
use jobgrid::environment::types::{CounterEnvironment, EnvironmentConfig};
use jobgrid::job::registry::JobHandlerRegistry;
use jobgrid::worker::agent::{WorkerAgent, WorkerConfig};

use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage:");
        eprintln!("  {} --coordinator --bind <addr:port> [--summary <file>]", args[0]);
        eprintln!("  {} --worker --connect <addr:port> [--slots <n>]", args[0]);
        eprintln!("Example: {} --coordinator --bind 127.0.0.1:7000", args[0]);
        eprintln!("Example: {} --worker --connect 127.0.0.1:7000 --slots 4", args[0]);

        std::process::exit(1);
    }

    let mut role_coordinator = false;
    let mut role_worker = false;
    let mut bind_addr: Option<String> = None;
    let mut connect_addr: Option<String> = None;
    let mut summary_path: Option<String> = None;
    let mut slots: usize = 4;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--coordinator" => {
                role_coordinator = true;
                i += 1;
            }
            "--worker" => {
                role_worker = true;
                i += 1;
            }
            "--bind" => {
                bind_addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--connect" => {
                connect_addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--summary" => {
                summary_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--slots" => {
                slots = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    if role_coordinator {
        let bind_addr = bind_addr.expect("--bind is required for the coordinator");
        run_coordinator(bind_addr, summary_path).await
    } else if role_worker {
        let connect_addr = connect_addr.expect("--connect is required for a worker");
        run_worker(connect_addr, slots).await
    } else {
        eprintln!("Pick a role: --coordinator or --worker");
        std::process::exit(1);
    }
}

async fn run_coordinator(bind_addr: String, summary_path: Option<String>) -> anyhow::Result<()> {
    let mut config = CoordinatorConfig::new(bind_addr);
    if let Some(path) = summary_path {
        config = config.summary(path, Duration::from_secs(5));
    }

    let coordinator = Coordinator::new(config, Box::new(CounterEnvironment::default()));
    let addr = coordinator.start().await?;
    tracing::info!("Coordinator up on {}", addr);

    // Demo load: seed the counter, then keep submitting increment jobs and
    // logging what comes back.
    let demo = coordinator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;

        let seed = EnvironmentConfig::new("set", &5i64).expect("serialize seed value");
        match demo.update_environment(vec![seed]).await {
            Ok(true) => tracing::info!("Seeded environment with x = 5"),
            Ok(false) => tracing::warn!("Could not seed environment, tasks outstanding"),
            Err(e) => tracing::error!("Environment seed failed: {}", e),
        }

        let mut round = 0u64;
        loop {
            round += 1;
            let payload = bincode::serialize(&round).expect("serialize payload");
            let future = demo.execute("increment", payload).await;

            match future.wait_timeout(Duration::from_secs(30)).await {
                Ok(Some(output)) => {
                    let value: i64 = bincode::deserialize(&output.output).unwrap_or(-1);
                    tracing::info!(
                        "Round {}: {} computed {} (log: {})",
                        round,
                        output.worker,
                        value,
                        output.log.trim()
                    );
                }
                Ok(None) => tracing::warn!("Round {} still unresolved after 30s", round),
                Err(e) => tracing::error!("Round {} failed: {}", round, e),
            }

            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    coordinator.shutdown_workers().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

async fn run_worker(connect_addr: String, slots: usize) -> anyhow::Result<()> {
    let registry = JobHandlerRegistry::new();

    // x + delta against the replicated counter environment.
    registry.register("increment", |payload, ctx| async move {
        let delta: i64 = bincode::deserialize(&payload)?;
        let x = ctx
            .env()
            .read(|env| {
                env.as_any()
                    .downcast_ref::<CounterEnvironment>()
                    .map(|counter| counter.x)
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("environment is not a CounterEnvironment"))?;

        ctx.log(format!("computed {} + {}", x, delta));
        Ok(bincode::serialize(&(x + delta))?)
    });

    let config = WorkerConfig::new(connect_addr).slots(slots);
    tracing::info!("Starting {} with {} slots", config.name, slots);

    let agent = WorkerAgent::new(config, registry, Box::new(CounterEnvironment::default()));
    agent.run().await
}
