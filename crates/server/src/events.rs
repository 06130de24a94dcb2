use std::net::SocketAddr;

use skirmish::{DisconnectReason, Identifier, RejectReason};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started {
        addr: SocketAddr,
    },
    ClientConnected {
        player_id: Identifier,
        name: String,
        addr: SocketAddr,
    },
    ClientDisconnected {
        player_id: Identifier,
        name: String,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: RejectReason,
    },
    Chat {
        player_id: Identifier,
        name: String,
        text: String,
    },
}

impl ServerEvent {
    pub fn describe(&self) -> String {
        match self {
            ServerEvent::Started { addr } => format!("Server started on {addr}"),
            ServerEvent::ClientConnected {
                player_id,
                name,
                addr,
            } => format!("{name} ({player_id}) connected from {addr}"),
            ServerEvent::ClientDisconnected {
                player_id,
                name,
                reason,
            } => format!("{name} ({player_id}) {}", reason.as_str()),
            ServerEvent::ConnectionDenied { addr, reason } => {
                let reason = match reason {
                    RejectReason::Full => "server full",
                    RejectReason::VersionMismatch => "version mismatch",
                };
                format!("Connection denied to {addr}: {reason}")
            }
            ServerEvent::Chat { name, text, .. } => format!("<{name}> {text}"),
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, ServerEvent::ConnectionDenied { .. })
    }
}
