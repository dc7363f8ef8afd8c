use std::collections::BTreeMap;

use bytes::Bytes;

use crate::constants::WIRE_VERSION;
use crate::peer::{PeerAddress, PeerId};

/// Commands the transport core recognizes.
///
/// Anything else passes through opaquely as [`Command::Other`]; the
/// dispatcher routes those to registered handlers by raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness probe, also used for relay selection.
    Ping,
    /// Routing-table neighbor exchange.
    Neighbor,
    /// Direct data transfer between peers.
    DirectData,
    /// Reverse-connection setup through a relay.
    Rcon,
    /// UDP hole-punch coordination through a relay.
    Holep,
    /// Application-defined command, opaque to the core.
    Other(u8),
}

impl Command {
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Ping => 1,
            Command::Neighbor => 2,
            Command::DirectData => 3,
            Command::Rcon => 4,
            Command::Holep => 5,
            Command::Other(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Command::Ping,
            2 => Command::Neighbor,
            3 => Command::DirectData,
            4 => Command::Rcon,
            5 => Command::Holep,
            other => Command::Other(other),
        }
    }
}

/// Message kind: four request variants plus the response verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request1 = 0,
    Request2 = 1,
    Request3 = 2,
    Request4 = 3,
    Ok = 4,
    Denied = 5,
    NotFound = 6,
    Exception = 7,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MessageType::Request1),
            1 => Some(MessageType::Request2),
            2 => Some(MessageType::Request3),
            3 => Some(MessageType::Request4),
            4 => Some(MessageType::Ok),
            5 => Some(MessageType::Denied),
            6 => Some(MessageType::NotFound),
            7 => Some(MessageType::Exception),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::Request1
                | MessageType::Request2
                | MessageType::Request3
                | MessageType::Request4
        )
    }

    pub fn is_response(self) -> bool {
        !self.is_request()
    }
}

/// One wire message.
///
/// Mutable until first send; NAT orchestrators clone it (with a fresh id)
/// when the same payload has to travel more than once.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: u32,
    pub version: u8,
    pub sender: PeerAddress,
    pub recipient: PeerAddress,
    pub command: Command,
    pub kind: MessageType,
    pub udp: bool,
    pub keep_alive: bool,
    /// Small integers, mostly port numbers for hole punching.
    pub ints: Vec<u32>,
    /// Raw payload buffers, opaque to the core.
    pub buffers: Vec<Bytes>,
    /// Keyed payload entries, e.g. tracker data keyed by peer id.
    pub data_map: BTreeMap<PeerId, Bytes>,
    /// Detached signature over the serialized frame prefix.
    pub signature: Option<Bytes>,
}

impl Message {
    /// Creates a request with a fresh random message id.
    pub fn request(command: Command, sender: PeerAddress, recipient: PeerAddress) -> Self {
        Self {
            message_id: rand::Rng::random(&mut rand::rng()),
            version: WIRE_VERSION,
            sender,
            recipient,
            command,
            kind: MessageType::Request1,
            udp: false,
            keep_alive: false,
            ints: Vec::new(),
            buffers: Vec::new(),
            data_map: BTreeMap::new(),
            signature: None,
        }
    }

    /// Builds the response to this request: same id and command, sender and
    /// recipient swapped, payload sections empty.
    pub fn reply(&self, kind: MessageType) -> Self {
        Self {
            message_id: self.message_id,
            version: self.version,
            sender: self.recipient.clone(),
            recipient: self.sender.clone(),
            command: self.command,
            kind,
            udp: self.udp,
            keep_alive: false,
            ints: Vec::new(),
            buffers: Vec::new(),
            data_map: BTreeMap::new(),
            signature: None,
        }
    }

    /// Clones the message under a fresh message id. Payload buffers are
    /// shared (`Bytes` is cheap to clone and positionless), everything else
    /// is copied.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.message_id = rand::Rng::random(&mut rand::rng());
        copy.signature = None;
        copy
    }
}
