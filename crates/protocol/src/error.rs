//! Protocol error types

use thiserror::Error;

/// ABI decoding and encoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too small for the structure being decoded or encoded
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Word width other than 4 or 8 bytes
    #[error("Unsupported word size: {0} bytes (expected 4 or 8)")]
    UnsupportedWordSize(usize),

    /// Envelope magic does not identify the emulated driver
    #[error("Magic mismatch: {found:#x} (expected {expected:#x})")]
    MagicMismatch { found: u64, expected: u64 },

    /// Port transfer command that is neither a byte read nor a byte write
    #[error("Unsupported transfer command: {0}")]
    UnsupportedCommand(u64),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
