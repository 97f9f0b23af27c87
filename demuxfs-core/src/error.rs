//! Error types for the demultiplexing pipeline.

use thiserror::Error;

/// Errors raised while decoding wire data or installing parsed tables.
///
/// Parsers never panic on malformed input; they return one of these and the
/// pipeline drops the offending packet or section and keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    /// Packet does not start with the TS sync byte.
    #[error("invalid sync byte: expected 0x47, got {0:#04x}")]
    InvalidSyncByte(u8),

    /// Packet is shorter than the fixed TS packet size.
    #[error("packet too short: {0} bytes")]
    PacketTooShort(usize),

    /// Section length field exceeds the maximum allowed by the standard.
    #[error("section length out of range: {0:#06x} (max 0x03fd)")]
    SectionLengthOutOfRange(u16),

    /// Section buffer is shorter than its declared length.
    #[error("incomplete section: expected {expected} bytes, got {actual}")]
    IncompleteSection { expected: usize, actual: usize },

    /// CRC-32 over the section does not match the stored value.
    #[error("CRC-32 mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    CrcMismatch { computed: u32, stored: u32 },

    /// A parser was handed a section with a table id it does not handle.
    #[error("unexpected table id {0:#04x}")]
    UnexpectedTableId(u8),

    /// A declared field extends past the end of its enclosing structure.
    #[error("truncated {what}: need {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Building the output tree failed.
    #[error("filesystem tree error: {0}")]
    Fs(#[from] FsError),
}

/// Errors raised by dentry tree operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Dentry names must be nonempty.
    #[error("empty dentry name")]
    EmptyName,

    /// A sibling with the same name already exists.
    #[error("duplicate child name {0:?}")]
    DuplicateName(String),

    /// Children can only be attached to directories.
    #[error("{0:?} is not a directory")]
    NotADirectory(String),
}
