// SPDX-License-Identifier: Apache-2.0

//! Demo binary: wires configuration, structured logging, and the engine
//! together, starts a single-loop engine, and dispatches one request
//! through the partitioned router to show the whole stack end to end.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use prometheus::Registry;

use tpc_buffer::SerialPool;
use tpc_config::EngineConfig;
use tpc_engine::Engine;
use tpc_service::{call_id, set_call_id, ConnectionId, RequestKey, RequestOp, RequestRouter};
use tpc_telemetry::EngineMetrics;

#[derive(Parser, Debug)]
#[command(name = "tpc_engine", about = "Thread-per-core event-loop engine demo")]
struct Cli {
    /// Path to a YAML engine configuration. Defaults to the built-in
    /// configuration when omitted.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Overrides the configured event loop count.
    #[arg(long)]
    loops: Option<usize>,
}

struct EchoOp {
    connection: ConnectionId,
}

impl RequestOp for EchoOp {
    fn execute(self: Box<Self>, frame: tpc_buffer::Frame) {
        let key = RequestKey::from_frame(self.connection, &frame);
        tracing::info!(call_id = key.call_id, connection = self.connection.raw(), "echoed request");
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)?;
            EngineConfig::from_yaml(&yaml)?
        }
        None => EngineConfig::default(),
    };
    if let Some(loops) = cli.loops {
        config.eventloop_count = loops;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = tpc_telemetry::init_tracing() {
        eprintln!("failed to install tracing subscriber: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "engine demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    let registry = Registry::new();
    let metrics = Arc::new(EngineMetrics::new(&registry)?);

    let engine = Arc::new(Engine::new(config, metrics)?);
    engine.start()?;
    tracing::info!(loops = engine.eventloop_count(), "engine started");

    let router = RequestRouter::new(engine.clone());
    let pool = SerialPool::new(64);
    let frame = pool.allocate();
    set_call_id(&frame, 1);
    tracing::info!(call_id = call_id(&frame), "dispatching demo request");

    router.dispatch(0, EchoOp { connection: ConnectionId::new(0) }, frame)?;

    std::thread::sleep(Duration::from_millis(50));

    engine.shutdown()?;
    engine.await_termination(Some(Duration::from_secs(5)));
    tracing::info!("engine terminated");
    Ok(())
}
