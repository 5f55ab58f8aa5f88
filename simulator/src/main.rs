use anyhow::Context;
use bridge::server::BridgeServer;
use clap::Parser;
use generator::profile::TrafficGenerator;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod bridge;
mod generator;
mod workflow;

/// How long open sessions get to poll the namespace disconnect on Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(author, version, about = "Demo traffic backend for the MetroPulse live view")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Address to serve the Socket.IO and video routes on
    #[arg(long)]
    bind: Option<SocketAddr>,
    #[arg(long)]
    seed: Option<u64>,
    /// Milliseconds between vehicle_data events
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Directory of JPEG files to cycle on /video_feed
    #[arg(long)]
    frames: Option<PathBuf>,
    /// Print this many readings as JSON lines and exit
    #[arg(long)]
    offline: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::default()
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(seed) = args.seed {
        config.generator.seed = seed;
    }
    if let Some(interval) = args.interval_ms {
        config.emit_interval_ms = interval;
    }
    if args.frames.is_some() {
        config.frames_dir = args.frames.clone();
    }

    if let Some(count) = args.offline {
        let mut generator = TrafficGenerator::new(config.generator.clone())?;
        for _ in 0..count {
            let reading = generator.next_reading();
            println!(
                "{}",
                serde_json::to_string(&reading).context("serializing reading")?
            );
        }
        return Ok(());
    }

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating runtime for the bridge")?;
    runtime.block_on(serve(config))
}

async fn serve(config: WorkflowConfig) -> anyhow::Result<()> {
    let bridge = BridgeServer::spawn(&config)?;
    info!("monitor endpoint: {}", bridge.endpoint());
    if let Some(name) = config.generator.scenario.as_deref() {
        info!("scenario: {name}");
    }
    let runner = Runner::new(config)?;

    tokio::select! {
        result = runner.run(bridge.hub.clone()) => result?,
        result = signal::ctrl_c() => {
            result.context("awaiting Ctrl+C to exit")?;
            info!("shutting down, notifying {} sessions", bridge.hub.session_count());
            bridge.hub.disconnect_all();
            if !bridge.hub.flush(SHUTDOWN_GRACE).await {
                warn!("shutting down before every session saw the disconnect");
            }
            // The last poll responses still have to be written out.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(())
}
