mod clock;
mod codec;
mod config;
mod connection;
mod delivery;
mod discovery;
mod host;
mod identifier;
mod message;
mod packet;
mod protocol;
mod queue;
mod simulator;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CodecError, RECORD_HEADER_SIZE, read_record, write_record};
pub use config::{ClientConfig, DiscoveryConfig, HostConfig};
pub use connection::{ConnectionState, ServerConnection};
pub use delivery::DeliveryManager;
pub use discovery::{
    BEACON_SIZE, BeaconError, DiscoveryEvent, ServerAnnouncer, ServerDiscovery, ServerInfo,
    read_beacon, write_beacon,
};
pub use host::{
    ClientPeer, ConnectionManager, DisconnectReason, HostEvent, KEEPALIVE_INTERVAL_MS,
    ServerHost,
};
pub use identifier::{Arena, Identifier};
pub use message::{
    Buttons, EntityKind, MAX_BATCH_ITEMS, MAX_CHAT_LENGTH, MAX_NAME_LENGTH, Message, MessageBody,
    MessageType, RELIABLE_THRESHOLD, RejectReason,
};
pub use packet::{PacketSummary, read_packet};
pub use protocol::{
    APP_IDENTIFIER, DEFAULT_BEACON_FREQUENCY, DEFAULT_PORT, DEFAULT_TICK_RATE, DISCOVERY_GROUP,
    DISCOVERY_PORT, DROPPED_TIMEOUT_MS, HEADER_SIZE, LAG_THRESHOLD_MS, MAX_PACKET_SIZE,
    PROTOCOL_REVISION, PacketHeader,
};
pub use queue::{MessageQueue, PendingRecord};
pub use simulator::{MemoryNetwork, MemoryTransport};
pub use transport::{
    LossyTransport, NetworkStats, PacketLossSimulation, Transport, UdpTransport,
};
