use super::error::TransportError;
use crate::message::{Command, Message};

/// Delivery strategy for one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyVerdict {
    /// Dial the recipient's own socket.
    Direct,
    /// Ask a relay to make the recipient dial us back (TCP only).
    Rcon,
    /// Route the message through one of the recipient's relays.
    Relay,
    /// Coordinate a UDP hole punch through a relay.
    HolePunch,
}

/// Picks the TCP delivery strategy from the message's descriptors.
///
/// A pure function of (recipient flags, sender flags); the same inputs
/// always yield the same verdict.
pub fn tcp_strategy(message: &Message) -> Result<StrategyVerdict, TransportError> {
    if !message.recipient.relayed {
        return Ok(StrategyVerdict::Direct);
    }
    check_relays(message)?;
    if !message.sender.relayed {
        Ok(StrategyVerdict::Rcon)
    } else {
        Ok(StrategyVerdict::Relay)
    }
}

/// Picks the UDP delivery strategy.
///
/// UDP can never use a reverse connection; hole punching applies only to
/// `DIRECT_DATA` between two relayed peers.
pub fn udp_strategy(message: &Message) -> Result<StrategyVerdict, TransportError> {
    if !message.recipient.relayed {
        return Ok(StrategyVerdict::Direct);
    }
    check_relays(message)?;
    if message.sender.relayed && message.command == Command::DirectData {
        Ok(StrategyVerdict::HolePunch)
    } else {
        Ok(StrategyVerdict::Relay)
    }
}

/// Selects by the message's own udp flag, rejecting impossible pairs.
pub fn select_strategy(message: &Message) -> Result<StrategyVerdict, TransportError> {
    if message.udp {
        let verdict = udp_strategy(message)?;
        if verdict == StrategyVerdict::Rcon {
            return Err(TransportError::InvalidStrategy(
                "UDP messages cannot use a reverse connection",
            ));
        }
        Ok(verdict)
    } else {
        tcp_strategy(message)
    }
}

fn check_relays(message: &Message) -> Result<(), TransportError> {
    if message.recipient.relays.is_empty() {
        return Err(TransportError::RelayUnavailable);
    }
    Ok(())
}
