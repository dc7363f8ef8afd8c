use thiserror::Error;

use crate::message::CodecError;

/// Errors surfaced through a [`ResponseCompletion`](super::ResponseCompletion).
///
/// Orchestrators never translate a leaf failure into a broader kind; the
/// reason a send failed is the reason the caller sees.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// The selector refused the strategy combination (e.g. UDP over RCON).
    #[error("invalid send strategy: {0}")]
    InvalidStrategy(&'static str),

    /// Channel pool exhausted or socket bind failed.
    #[error("channel creation failed: {0}")]
    ChannelCreation(String),

    /// TCP connect failed, including connect timeout.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Outbound write failed after the channel was up.
    #[error("write failed: {0}")]
    Write(String),

    /// No inbound activity within the idle budget.
    #[error("idle timeout")]
    IdleTimeout,

    /// The remote answered DENIED; not retryable at this layer.
    #[error("denied by peer")]
    Denied,

    /// No relay of the recipient could be reached.
    #[error("no relay could be contacted")]
    RelayUnavailable,

    /// Hole-punch reply missing its port list, odd count, or wrong command.
    #[error("malformed hole-punch reply: {0}")]
    HolePunchMalformed(&'static str),

    /// The caller or an upstream orchestrator cancelled the request.
    #[error("cancelled")]
    Cancelled,

    /// The node is shutting down with this send still in flight.
    #[error("shutting down")]
    Shutdown,

    /// Frame encoding or decoding failed.
    #[error("codec: {0}")]
    Codec(String),
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        TransportError::Codec(e.to_string())
    }
}

impl TransportError {
    /// Failures that demote the peer in the caller's routing table.
    ///
    /// Only transport-level faults count; protocol verdicts like DENIED and
    /// local conditions (cancellation, shutdown) do not.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            TransportError::ChannelCreation(_)
                | TransportError::Connect(_)
                | TransportError::Write(_)
                | TransportError::IdleTimeout
        )
    }

    /// Connect-races that are expected during cancellation and teardown;
    /// logged at debug instead of warn.
    pub fn is_expected_race(&self) -> bool {
        match self {
            TransportError::Cancelled | TransportError::Shutdown => true,
            TransportError::Connect(reason) => {
                reason.contains("refused") || reason.contains("closed")
            }
            _ => false,
        }
    }
}
