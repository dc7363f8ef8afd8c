//! UDP hole-punch reply validation and message duplication.
//!
//! The exchange: we send a HOLEP hint through a relay carrying candidate
//! local ports; the remote peer punches holes in its NAT and answers with
//! pairs of `[local_port, remote_port]`. For each pair we fire a duplicate
//! of the original message from `local_port` at `remote_port`, hoping at
//! least one transient NAT binding lets it through.

use super::error::TransportError;
use crate::message::{Command, Message, MessageType};

/// Pure view of one hole-punch attempt, driven by the hint reply.
#[derive(Debug, Clone, Copy)]
pub(super) struct HolePunchState {
    original_command: Command,
}

impl HolePunchState {
    pub(super) fn new(original_command: Command) -> Self {
        Self { original_command }
    }

    pub(super) fn original_command(&self) -> Command {
        self.original_command
    }

    /// Validates the hint reply and extracts the port pairs.
    ///
    /// The int list alternates local and remote ports, so an odd count can
    /// only mean a corrupt or hostile reply; nothing is sent in that case.
    pub(super) fn evaluate(
        &self,
        reply: &Message,
    ) -> Result<Vec<(u16, u16)>, TransportError> {
        if reply.kind == MessageType::Denied {
            return Err(TransportError::Denied);
        }
        if reply.command != Command::Holep || reply.kind != MessageType::Ok {
            return Err(TransportError::HolePunchMalformed("unexpected reply"));
        }
        if reply.ints.is_empty() {
            return Err(TransportError::HolePunchMalformed("missing port list"));
        }
        if reply.ints.len() % 2 != 0 {
            return Err(TransportError::HolePunchMalformed("odd port list"));
        }
        let mut pairs = Vec::with_capacity(reply.ints.len() / 2);
        for chunk in reply.ints.chunks(2) {
            pairs.push((chunk[0] as u16, chunk[1] as u16));
        }
        Ok(pairs)
    }
}

/// Duplicates the original message for one punched port pair.
///
/// The duplicate travels outside any relay: both descriptors get their NAT
/// and relay flags cleared, the TCP ports zeroed, and the UDP ports
/// rewritten to the punched pair. Payload buffers are shared (`Bytes`
/// clones read independently); the id is fresh.
pub(super) fn punch_duplicate(original: &Message, local_port: u16, remote_port: u16) -> Message {
    let mut dup = original.duplicate();
    dup.sender = original
        .sender
        .with_ports(0, local_port)
        .with_firewalled_tcp(false)
        .with_firewalled_udp(false)
        .with_relayed(false);
    dup.recipient = original
        .recipient
        .with_ports(0, remote_port)
        .with_firewalled_tcp(false)
        .with_firewalled_udp(false)
        .with_relayed(false);
    dup.udp = true;
    dup
}
