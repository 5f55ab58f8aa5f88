use crate::bridge::hub::SessionHub;
use crate::generator::profile::{TrafficGenerator, VehicleData};
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::{debug, info};
use pulsecore::prelude::VEHICLE_DATA_EVENT;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

/// Drives the generator and pushes each reading to connected sessions.
pub struct Runner {
    config: WorkflowConfig,
    generator: TrafficGenerator,
    emitted: u64,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> anyhow::Result<Self> {
        let generator = TrafficGenerator::new(config.generator.clone())
            .context("building traffic generator")?;
        Ok(Self {
            config,
            generator,
            emitted: 0,
        })
    }

    /// Produces one reading and broadcasts it. Returns the reading and how
    /// many sessions received it.
    pub fn step(&mut self, hub: &SessionHub) -> anyhow::Result<(VehicleData, usize)> {
        let reading = self.generator.next_reading();
        let payload = serde_json::to_value(&reading).context("serializing reading")?;
        let receivers = hub.broadcast(VEHICLE_DATA_EVENT, &payload);
        self.emitted += 1;
        debug!(
            "reading #{}: {} vehicles ({}) -> {} sessions",
            self.emitted, reading.vehicle_count, reading.status, receivers
        );
        Ok((reading, receivers))
    }

    /// Emits readings on the configured interval until the future is dropped.
    pub async fn run(mut self, hub: Arc<SessionHub>) -> anyhow::Result<()> {
        let mut ticker = interval(self.config.emit_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "emitting {} every {:?}",
            VEHICLE_DATA_EVENT,
            self.config.emit_interval()
        );
        loop {
            ticker.tick().await;
            self.step(&hub)?;
        }
    }
}
