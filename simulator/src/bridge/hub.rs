use anyhow::{anyhow, bail, Context};
use log::{debug, info};
use pulsecore::channel::codec::RECORD_SEPARATOR;
use pulsecore::channel::{
    decode_payload, EnginePacket, HandshakeData, SocketPacket, SocketPacketKind,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

struct Session {
    outbound: VecDeque<String>,
    wake: Arc<Notify>,
    joined: bool,
    last_seen: Instant,
}

impl Session {
    fn push(&mut self, packet: EnginePacket) {
        self.outbound.push_back(packet.encode());
        self.wake.notify_one();
    }

    fn drain(&mut self) -> String {
        self.outbound
            .drain(..)
            .collect::<Vec<_>>()
            .join(&RECORD_SEPARATOR.to_string())
    }
}

/// Server side of the polling transport: one outbound queue per session.
///
/// Sessions that make no request for longer than the ping interval plus the
/// ping timeout are dropped along with their queues.
pub struct SessionHub {
    sessions: Mutex<HashMap<String, Session>>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl SessionHub {
    pub fn new(ping_interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ping_interval,
            ping_timeout,
        }
    }

    /// Creates a session and returns its id with the `open` response body.
    pub fn open(&self) -> (String, String) {
        let sid = format!("{:016x}", rand::random::<u64>());
        let handshake = HandshakeData {
            sid: sid.clone(),
            upgrades: Vec::new(),
            ping_interval: self.ping_interval.as_millis() as u64,
            ping_timeout: self.ping_timeout.as_millis() as u64,
            max_payload: 1_000_000,
        };
        let body = EnginePacket::Open(json!(handshake).to_string()).encode();
        let mut sessions = self.lock();
        self.expire(&mut sessions);
        sessions.insert(
            sid.clone(),
            Session {
                outbound: VecDeque::new(),
                wake: Arc::new(Notify::new()),
                joined: false,
                last_seen: Instant::now(),
            },
        );
        info!("session {sid} opened");
        (sid, body)
    }

    /// Applies a client POST body to the session.
    pub fn handle_post(&self, sid: &str, body: &str) -> anyhow::Result<()> {
        let packets = decode_payload(body).map_err(|e| anyhow!("bad payload: {e}"))?;
        let mut sessions = self.lock();
        for packet in packets {
            let session = sessions
                .get_mut(sid)
                .with_context(|| format!("unknown session {sid}"))?;
            session.last_seen = Instant::now();
            match packet {
                EnginePacket::Message(message) => {
                    let packet =
                        SocketPacket::decode(&message).map_err(|e| anyhow!("bad packet: {e}"))?;
                    Self::handle_socket_packet(sid, session, packet);
                }
                EnginePacket::Ping(data) => session.push(EnginePacket::Pong(data)),
                EnginePacket::Close => {
                    sessions.remove(sid);
                    info!("session {sid} closed by client");
                    return Ok(());
                }
                EnginePacket::Pong(_) | EnginePacket::Noop => {}
                other => bail!("unexpected packet from client: {other:?}"),
            }
        }
        Ok(())
    }

    fn handle_socket_packet(sid: &str, session: &mut Session, packet: SocketPacket) {
        match packet.kind {
            SocketPacketKind::Connect if packet.namespace == "/" => {
                session.joined = true;
                let ack = SocketPacket {
                    data: Some(json!({ "sid": sid })),
                    ..SocketPacket::connect("/")
                };
                session.push(EnginePacket::Message(ack.encode()));
                info!("session {sid} joined");
            }
            SocketPacketKind::Connect => {
                let refusal = SocketPacket {
                    kind: SocketPacketKind::ConnectError,
                    data: Some(json!({ "message": "Invalid namespace" })),
                    ..SocketPacket::connect(&packet.namespace)
                };
                session.push(EnginePacket::Message(refusal.encode()));
            }
            SocketPacketKind::Disconnect => {
                session.joined = false;
                info!("session {sid} left");
            }
            kind => debug!("ignoring {kind:?} from {sid}"),
        }
    }

    /// Long-poll: returns queued packets, or a ping once the interval lapses.
    pub async fn poll(&self, sid: &str) -> anyhow::Result<String> {
        let deadline = Instant::now() + self.ping_interval;
        loop {
            let wake = {
                let mut sessions = self.lock();
                let session = sessions
                    .get_mut(sid)
                    .with_context(|| format!("unknown session {sid}"))?;
                session.last_seen = Instant::now();
                if !session.outbound.is_empty() {
                    return Ok(session.drain());
                }
                session.wake.clone()
            };
            // Wake-ups may come from a stale permit; recheck the queue.
            if timeout_at(deadline, wake.notified()).await.is_err() {
                break;
            }
        }

        let mut sessions = self.lock();
        let session = sessions
            .get_mut(sid)
            .with_context(|| format!("session {sid} closed while polling"))?;
        session.last_seen = Instant::now();
        if session.outbound.is_empty() {
            session.outbound.push_back(EnginePacket::Ping(String::new()).encode());
        }
        Ok(session.drain())
    }

    /// Queues an event for every joined session. Returns how many got it.
    pub fn broadcast(&self, event: &str, payload: &Value) -> usize {
        let message = SocketPacket::event("/", event, vec![payload.clone()]).encode();
        let mut sessions = self.lock();
        self.expire(&mut sessions);
        let mut receivers = 0;
        for session in sessions.values_mut().filter(|session| session.joined) {
            session.push(EnginePacket::Message(message.clone()));
            receivers += 1;
        }
        receivers
    }

    /// Sends a namespace disconnect to every joined session.
    pub fn disconnect_all(&self) {
        let leave = SocketPacket::disconnect("/").encode();
        for session in self.lock().values_mut().filter(|session| session.joined) {
            session.joined = false;
            session.push(EnginePacket::Message(leave.clone()));
        }
    }

    /// Waits until every queued packet has been picked up by a poll, or
    /// until `grace` runs out. Returns whether all queues drained.
    pub async fn flush(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let pending = self
                .lock()
                .values()
                .any(|session| !session.outbound.is_empty());
            if !pending {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn session_count(&self) -> usize {
        let mut sessions = self.lock();
        self.expire(&mut sessions);
        sessions.len()
    }

    fn expire(&self, sessions: &mut HashMap<String, Session>) {
        let idle_limit = self.ping_interval + self.ping_timeout;
        sessions.retain(|sid, session| {
            let alive = session.last_seen.elapsed() <= idle_limit;
            if !alive {
                info!("session {sid} expired after {idle_limit:?} without a request");
            }
            alive
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> SessionHub {
        SessionHub::new(Duration::from_millis(20), Duration::from_millis(20))
    }

    #[test]
    fn open_returns_handshake() {
        let hub = hub();
        let (sid, body) = hub.open();
        let packets = decode_payload(&body).unwrap();
        let EnginePacket::Open(data) = &packets[0] else {
            panic!("expected open packet");
        };
        let handshake = HandshakeData::parse(data).unwrap();
        assert_eq!(handshake.sid, sid);
        assert_eq!(handshake.ping_interval, 20);
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn join_is_acknowledged_then_events_flow() {
        let hub = hub();
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "40").unwrap();
        hub.broadcast("vehicle_data", &json!({"vehicle_count": 5}));

        let body = hub.poll(&sid).await.unwrap();
        let packets = decode_payload(&body).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(
            packets[0],
            EnginePacket::Message(format!(r#"0{{"sid":"{sid}"}}"#))
        );
        assert_eq!(
            packets[1],
            EnginePacket::Message(r#"2["vehicle_data",{"vehicle_count":5}]"#.into())
        );
    }

    #[tokio::test]
    async fn idle_poll_returns_ping() {
        let hub = hub();
        let (sid, _) = hub.open();
        assert_eq!(hub.poll(&sid).await.unwrap(), "2");
    }

    #[test]
    fn unknown_namespace_is_refused() {
        let hub = hub();
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "40/admin,").unwrap();
        assert_eq!(hub.broadcast("vehicle_data", &json!({})), 0);
    }

    #[tokio::test]
    async fn idle_sessions_expire_with_their_queues() {
        let hub = hub();
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "40").unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        for _ in 0..100 {
            assert_eq!(hub.broadcast("vehicle_data", &json!({"vehicle_count": 1})), 0);
        }
        assert_eq!(hub.session_count(), 0);
        assert!(hub.poll(&sid).await.is_err());
    }

    #[tokio::test]
    async fn polling_keeps_a_session_alive() {
        let hub = hub();
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "40").unwrap();
        for _ in 0..4 {
            hub.poll(&sid).await.unwrap();
        }
        assert_eq!(hub.broadcast("vehicle_data", &json!({})), 1);
    }

    #[tokio::test]
    async fn poll_after_delivery_waits_for_the_interval() {
        let hub = SessionHub::new(Duration::from_millis(150), Duration::from_millis(150));
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "40").unwrap();
        assert!(hub.poll(&sid).await.unwrap().starts_with("40"));

        let started = Instant::now();
        assert_eq!(hub.poll(&sid).await.unwrap(), "2");
        assert!(started.elapsed() >= Duration::from_millis(140));
    }

    #[tokio::test]
    async fn flush_waits_for_the_disconnect_to_be_polled() {
        let hub = Arc::new(SessionHub::new(
            Duration::from_millis(200),
            Duration::from_millis(200),
        ));
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "40").unwrap();
        hub.poll(&sid).await.unwrap();

        hub.disconnect_all();
        assert!(!hub.flush(Duration::from_millis(30)).await);

        let poller = hub.clone();
        let polled = tokio::spawn(async move { poller.poll(&sid).await });
        assert!(hub.flush(Duration::from_secs(2)).await);
        assert_eq!(polled.await.unwrap().unwrap(), "41");
    }

    #[test]
    fn close_removes_session() {
        let hub = hub();
        let (sid, _) = hub.open();
        hub.handle_post(&sid, "1").unwrap();
        assert_eq!(hub.session_count(), 0);
        assert!(hub.handle_post(&sid, "3").is_err());
    }
}
