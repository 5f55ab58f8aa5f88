pub mod client;
pub mod codec;
pub mod router;

pub use client::EventChannelClient;
pub use codec::{
    decode_payload, encode_payload, CodecError, EnginePacket, HandshakeData, SocketPacket,
    SocketPacketKind,
};
pub use router::EventRouter;
