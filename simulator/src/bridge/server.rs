use crate::bridge::frames::FrameLibrary;
use crate::bridge::hub::SessionHub;
use crate::bridge::routes::routes;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

/// Running HTTP bridge: the bound address and the session hub behind it.
pub struct BridgeServer {
    pub addr: SocketAddr,
    pub hub: Arc<SessionHub>,
}

impl BridgeServer {
    /// Binds the routes and spawns the server on the current runtime.
    pub fn spawn(config: &WorkflowConfig) -> anyhow::Result<Self> {
        let frames = match &config.frames_dir {
            Some(dir) => FrameLibrary::load(dir)?,
            None => FrameLibrary::empty(),
        };
        let hub = Arc::new(SessionHub::new(
            config.ping_interval(),
            config.ping_timeout(),
        ));
        if !frames.is_empty() {
            info!("serving {} frames on /video_feed", frames.len());
        }
        let filter = routes(hub.clone(), frames, config.frame_interval());
        let (addr, server) = warp::serve(filter)
            .try_bind_ephemeral(config.bind)
            .with_context(|| format!("binding bridge to {}", config.bind))?;
        tokio::spawn(server);
        info!("bridge listening on http://{addr}");
        Ok(Self { addr, hub })
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }
}
