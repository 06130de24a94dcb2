pub mod net;

pub use net::{
    Arena, Buttons, ClientConfig, Clock, ConnectionState, DEFAULT_PORT, DEFAULT_TICK_RATE,
    DisconnectReason, DiscoveryConfig, DiscoveryEvent, EntityKind, HostConfig, HostEvent,
    Identifier, Message, MessageBody, MessageType, NetworkStats, PROTOCOL_REVISION,
    PacketLossSimulation, RejectReason, ServerConnection, ServerDiscovery, ServerHost, ServerInfo,
};
