use thiserror::Error;

/// Errors from encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated frame: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("unsupported wire version: {0}")]
    BadVersion(u8),

    #[error("invalid message kind: {0}")]
    InvalidKind(u8),

    #[error("invalid address kind: {0}")]
    InvalidAddressKind(u8),

    #[error("signature error: {0}")]
    Signature(String),
}
