use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub bind: SocketAddr,
    /// Milliseconds between emitted readings.
    pub emit_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// Directory of `.jpg` files served on `/video_feed`.
    pub frames_dir: Option<PathBuf>,
    /// Milliseconds between MJPEG parts.
    pub frame_interval_ms: u64,
    pub generator: GeneratorConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            emit_interval_ms: 1_000,
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            frames_dir: None,
            frame_interval_ms: 100,
            generator: GeneratorConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}
