use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use pulsecore::auth::{AuthProvider, DemoAuthProvider, UserProfile};
use pulsecore::channel::EventChannelClient;
use pulsecore::config::{IngestConfig, ReconnectPolicy};
use pulsecore::prelude::VEHICLE_DATA_EVENT;
use pulsecore::snapshot::{SnapshotAggregator, StatusStyle, TrafficSnapshot};
use pulsecore::stream::ImageStreamViewer;
use pulsecore::telemetry::MetricsRecorder;
use std::collections::VecDeque;
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

mod config;

const HISTORY_LEN: usize = 20;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless live view for the MetroPulse traffic backend")]
struct Args {
    /// Load the ingest config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base URL of the vision backend
    #[arg(long)]
    endpoint: Option<String>,
    /// Full URL of the MJPEG feed (defaults to <endpoint>/video_feed)
    #[arg(long)]
    stream_url: Option<String>,
    /// Skip the image stream
    #[arg(long, default_value_t = false)]
    no_stream: bool,
    /// Stop at the first event channel failure
    #[arg(long, default_value_t = false)]
    no_reconnect: bool,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    password: String,
}

fn build_config(args: &Args) -> anyhow::Result<IngestConfig> {
    let mut config = match &args.config {
        Some(path) => config::load(path)?,
        None => IngestConfig::default(),
    };
    if let Some(endpoint) = &args.endpoint {
        config.channel.endpoint = endpoint.clone();
    }
    if let Some(url) = &args.stream_url {
        config.stream_url = Some(url.clone());
    }
    if args.no_stream {
        config.stream_enabled = false;
    }
    if args.no_reconnect {
        config.channel.reconnect = ReconnectPolicy::disabled();
    }
    Ok(config)
}

#[derive(Debug, Clone)]
enum Message {
    Snapshot(TrafficSnapshot),
    Frame { sequence: u64, bytes: usize },
    StreamLost(String),
    ChannelEnded(Result<(), String>),
}

#[derive(Debug)]
struct Monitor {
    user: UserProfile,
    snapshot: TrafficSnapshot,
    status: String,
    frames: u64,
    history: VecDeque<String>,
}

impl Monitor {
    fn new(user: UserProfile) -> Self {
        Self {
            user,
            snapshot: TrafficSnapshot::default(),
            status: "Waiting for telemetry...".into(),
            frames: 0,
            history: VecDeque::new(),
        }
    }

    fn update(&mut self, message: Message) {
        match message {
            Message::Snapshot(snapshot) => {
                let line = format_snapshot(&snapshot);
                match snapshot.style() {
                    StatusStyle::Critical => warn!("{line}"),
                    _ => info!("{line}"),
                }
                self.status = format!("Telemetry received: {}", snapshot.status);
                self.push_history(line);
                self.snapshot = snapshot;
            }
            Message::Frame { sequence, bytes } => {
                self.frames += 1;
                log::debug!("frame {sequence}: {bytes} bytes");
            }
            Message::StreamLost(url) => {
                self.status = format!("Video feed unavailable ({url})");
                self.push_history("Video feed hidden".into());
            }
            Message::ChannelEnded(Ok(())) => {
                self.status = "Backend ended the session".into();
                self.push_history(self.status.clone());
            }
            Message::ChannelEnded(Err(err)) => {
                self.status = format!("Telemetry error: {err}");
                self.push_history(self.status.clone());
            }
        }
    }

    fn push_history(&mut self, entry: String) {
        self.history.push_back(entry);
        while self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }
    }
}

fn format_snapshot(snapshot: &TrafficSnapshot) -> String {
    let classes = snapshot
        .objects
        .iter()
        .map(|(class, count)| format!("{class} {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "[{:?}] {} | {} vehicles | density {}% | {} | {}",
        snapshot.style(),
        snapshot.status,
        snapshot.vehicle_count,
        snapshot.density,
        classes,
        snapshot.text
    )
}

/// Attaches the image stream if enabled. A stream that is already unavailable
/// is reported right away and not returned.
async fn attach_stream(
    config: &IngestConfig,
    metrics: Arc<MetricsRecorder>,
    monitor: &mut Monitor,
) -> Option<ImageStreamViewer> {
    if !config.stream_enabled {
        return None;
    }
    let url = config.resolved_stream_url();
    let viewer = ImageStreamViewer::attach_with_metrics(url, &config.stream, metrics).await;
    if viewer.is_unavailable() {
        monitor.update(Message::StreamLost(viewer.stream_url().to_string()));
        return None;
    }
    Some(viewer)
}

async fn next_frame(viewer: &mut Option<ImageStreamViewer>) -> Option<(u64, usize)> {
    match viewer {
        Some(viewer) if !viewer.is_unavailable() => viewer
            .next_frame()
            .await
            .map(|frame| (frame.sequence, frame.data.len())),
        _ => pending().await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = build_config(&args)?;

    let user = DemoAuthProvider
        .sign_in(&args.email, &args.password)
        .await
        .context("signing in")?;
    info!("signed in as {}", user.email);
    let mut monitor = Monitor::new(user);

    let metrics = Arc::new(MetricsRecorder::new());
    let mut channel = EventChannelClient::new(config.channel.clone())
        .context("configuring event channel")?
        .with_metrics(metrics.clone());
    let aggregator = SnapshotAggregator::new();
    let mut view = aggregator.watch();
    channel.subscribe(VEHICLE_DATA_EVENT, aggregator.into_handler());

    let mut viewer = attach_stream(&config, metrics.clone(), &mut monitor).await;
    let stream_url = config.resolved_stream_url();

    {
        let channel_task = channel.run();
        tokio::pin!(channel_task);
        loop {
            tokio::select! {
                result = &mut channel_task => {
                    monitor.update(Message::ChannelEnded(result.map_err(|e| e.to_string())));
                    break;
                }
                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = view.borrow_and_update().clone();
                    monitor.update(Message::Snapshot(snapshot));
                }
                frame = next_frame(&mut viewer) => match frame {
                    Some((sequence, bytes)) => monitor.update(Message::Frame { sequence, bytes }),
                    None => monitor.update(Message::StreamLost(stream_url.clone())),
                },
                result = signal::ctrl_c() => {
                    result.context("awaiting Ctrl+C to exit")?;
                    break;
                }
            }
        }
    }

    channel.unsubscribe(VEHICLE_DATA_EVENT);
    channel.disconnect().await;

    let totals = metrics.snapshot();
    info!(
        "{} for {}: {} events, {} frames, {} transport failures",
        monitor.status,
        monitor.user.email,
        totals.events_dispatched,
        monitor.frames,
        totals.transport_failures
    );
    info!("last reading: {}", format_snapshot(&monitor.snapshot));
    Ok(())
}
