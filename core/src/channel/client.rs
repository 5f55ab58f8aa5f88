use crate::channel::codec::{
    decode_payload, encode_payload, EnginePacket, HandshakeData, SocketPacket, SocketPacketKind,
};
use crate::channel::router::EventRouter;
use crate::config::ChannelConfig;
use crate::prelude::{IngestError, IngestResult};
use crate::telemetry::MetricsRecorder;
use log::{debug, info, warn};
use reqwest::{header, Client, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const ENGINE_PROTOCOL: &str = "4";

struct Session {
    sid: String,
    ping_interval: Duration,
    ping_timeout: Duration,
    namespace_connected: bool,
}

/// Long-polling client for a single Socket.IO endpoint.
///
/// The client is owned by whoever consumes the events; there is no shared
/// global connection. Handlers run on the task that drives [`poll`] or
/// [`run`], in the order packets arrive.
///
/// [`poll`]: EventChannelClient::poll
/// [`run`]: EventChannelClient::run
pub struct EventChannelClient {
    http: Client,
    config: ChannelConfig,
    base: Url,
    session: Option<Session>,
    router: EventRouter,
    metrics: Arc<MetricsRecorder>,
    request_seq: u64,
}

impl EventChannelClient {
    pub fn new(config: ChannelConfig) -> IngestResult<Self> {
        let base = Url::parse(&config.endpoint)
            .and_then(|endpoint| endpoint.join(&config.path))
            .map_err(|e| IngestError::InvalidEndpoint(format!("{}: {}", config.endpoint, e)))?;
        Ok(Self {
            http: Client::new(),
            config,
            base,
            session: None,
            router: EventRouter::new(),
            metrics: Arc::new(MetricsRecorder::new()),
            request_seq: 0,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// True once the server has acknowledged the namespace.
    pub fn is_joined(&self) -> bool {
        self.session
            .as_ref()
            .map_or(false, |session| session.namespace_connected)
    }

    pub fn subscribe<F>(&mut self, event: impl Into<String>, handler: F) -> bool
    where
        F: FnMut(&Value) + 'static,
    {
        self.router.subscribe(event, handler)
    }

    pub fn unsubscribe(&mut self, event: &str) -> bool {
        self.router.unsubscribe(event)
    }

    /// Opens an Engine.IO session and requests the configured namespace.
    pub async fn connect(&mut self) -> IngestResult<()> {
        let url = self.poll_url(None);
        let body = self.get_text(url, None).await?;
        let packets = decode_payload(&body)?;
        let data = packets
            .iter()
            .find_map(|packet| match packet {
                EnginePacket::Open(data) => Some(data),
                _ => None,
            })
            .ok_or_else(|| IngestError::Handshake("no open packet in response".into()))?;
        let handshake =
            HandshakeData::parse(data).map_err(|e| IngestError::Handshake(e.to_string()))?;

        info!(
            "event channel session {} opened at {} (ping every {} ms)",
            handshake.sid, self.base, handshake.ping_interval
        );
        self.session = Some(Session {
            sid: handshake.sid,
            ping_interval: Duration::from_millis(handshake.ping_interval),
            ping_timeout: Duration::from_millis(handshake.ping_timeout),
            namespace_connected: false,
        });

        let join = SocketPacket::connect(&self.config.namespace).encode();
        if let Err(err) = self.send(&[EnginePacket::Message(join)]).await {
            self.session = None;
            return Err(err);
        }
        Ok(())
    }

    /// Runs one long-poll round and delivers every event it carried.
    ///
    /// Returns the number of events handed to a handler.
    pub async fn poll(&mut self) -> IngestResult<usize> {
        let (sid, wait) = {
            let session = self.session.as_ref().ok_or(IngestError::NotConnected)?;
            let grace = self
                .config
                .poll_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(session.ping_timeout);
            (session.sid.clone(), session.ping_interval + grace)
        };

        let url = self.poll_url(Some(&sid));
        let body = match self.get_text(url, Some(wait)).await {
            Ok(body) => body,
            Err(err) => {
                self.session = None;
                return Err(err);
            }
        };

        let mut delivered = 0;
        for raw in body.split(crate::channel::codec::RECORD_SEPARATOR) {
            if raw.is_empty() {
                continue;
            }
            let packet = match EnginePacket::decode(raw) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("skipping undecodable packet: {err}");
                    self.metrics.record_malformed();
                    continue;
                }
            };
            match packet {
                EnginePacket::Ping(data) => {
                    debug!("ping from server");
                    self.send(&[EnginePacket::Pong(data)]).await?;
                }
                EnginePacket::Message(message) => {
                    if self.handle_message(&message)? {
                        delivered += 1;
                    }
                }
                EnginePacket::Close => {
                    info!("server closed event channel session {sid}");
                    self.session = None;
                    return Err(IngestError::Closed);
                }
                EnginePacket::Binary(_) => debug!("ignoring binary packet"),
                EnginePacket::Open(_)
                | EnginePacket::Pong(_)
                | EnginePacket::Upgrade
                | EnginePacket::Noop => {}
            }
        }
        Ok(delivered)
    }

    /// Polls until the server ends the session or reconnection gives up.
    ///
    /// Transport failures keep the last delivered state untouched and are
    /// retried according to [`ChannelConfig::reconnect`].
    pub async fn run(&mut self) -> IngestResult<()> {
        let mut attempts = 0u32;
        loop {
            if !self.is_connected() {
                if let Err(err) = self.connect().await {
                    self.back_off(&mut attempts, err).await?;
                    continue;
                }
            }
            match self.poll().await {
                Ok(_) => attempts = 0,
                Err(IngestError::ServerDisconnect) => return Ok(()),
                Err(err @ IngestError::ConnectRejected(_)) => return Err(err),
                Err(err) => self.back_off(&mut attempts, err).await?,
            }
        }
    }

    /// Leaves the namespace, closes the session and drops every handler.
    pub async fn disconnect(&mut self) {
        if self.session.is_some() {
            let leave = SocketPacket::disconnect(&self.config.namespace).encode();
            if let Err(err) = self
                .send(&[EnginePacket::Message(leave), EnginePacket::Close])
                .await
            {
                debug!("close notification failed: {err}");
            }
            self.session = None;
            info!("event channel disconnected from {}", self.base);
        }
        self.router.clear();
    }

    fn handle_message(&mut self, message: &str) -> IngestResult<bool> {
        let packet = match SocketPacket::decode(message) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("skipping malformed socket packet: {err}");
                self.metrics.record_malformed();
                return Ok(false);
            }
        };
        if packet.namespace != self.config.namespace {
            debug!("ignoring packet for namespace {}", packet.namespace);
            return Ok(false);
        }

        match packet.kind {
            SocketPacketKind::Connect => {
                if let Some(session) = self.session.as_mut() {
                    session.namespace_connected = true;
                }
                info!("joined namespace {}", self.config.namespace);
                Ok(false)
            }
            SocketPacketKind::ConnectError => {
                let reason = packet
                    .data
                    .as_ref()
                    .and_then(|data| data.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                self.session = None;
                Err(IngestError::ConnectRejected(reason))
            }
            SocketPacketKind::Disconnect => {
                info!("server left namespace {}", self.config.namespace);
                self.session = None;
                Err(IngestError::ServerDisconnect)
            }
            SocketPacketKind::Event => match packet.event_parts() {
                Some((name, payload)) => {
                    if self.router.dispatch(name, payload) {
                        self.metrics.record_event();
                        Ok(true)
                    } else {
                        debug!("no handler for {name}");
                        self.metrics.record_unhandled();
                        Ok(false)
                    }
                }
                None => {
                    self.metrics.record_malformed();
                    Ok(false)
                }
            },
            SocketPacketKind::Ack | SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck => {
                debug!("ignoring {:?} packet", packet.kind);
                Ok(false)
            }
        }
    }

    async fn back_off(&mut self, attempts: &mut u32, err: IngestError) -> IngestResult<()> {
        self.metrics.record_transport_failure();
        self.session = None;
        let policy = &self.config.reconnect;
        if !policy.allows(*attempts) {
            warn!("event channel failure, not reconnecting: {err}");
            return Err(if *attempts == 0 {
                err
            } else {
                IngestError::ReconnectExhausted(*attempts)
            });
        }
        let delay = policy.delay_for(*attempts);
        *attempts += 1;
        warn!(
            "event channel failure ({err}); reconnect attempt {} in {:?}",
            attempts, delay
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn send(&mut self, packets: &[EnginePacket]) -> IngestResult<()> {
        let sid = self
            .session
            .as_ref()
            .map(|session| session.sid.clone())
            .ok_or(IngestError::NotConnected)?;
        let url = self.poll_url(Some(&sid));
        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(encode_payload(packets))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(IngestError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }

    async fn get_text(&self, url: Url, timeout: Option<Duration>) -> IngestResult<String> {
        let mut request = self.http.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::HttpStatus(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }

    fn poll_url(&mut self, sid: Option<&str>) -> Url {
        self.request_seq += 1;
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("EIO", ENGINE_PROTOCOL)
                .append_pair("transport", "polling");
            if let Some(sid) = sid {
                query.append_pair("sid", sid);
            }
            query.append_pair("t", &self.request_seq.to_string());
        }
        url
    }
}
