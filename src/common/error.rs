use thiserror::Error;

use super::types::PageId;

/// Errors raised by the storage engine and the table layer
#[derive(Error, Debug)]
pub enum EdfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    Format(String),

    #[error("Thread count mismatch: header records {expected}, readable records {found}")]
    ThreadCountMismatch { expected: u32, found: u32 },

    #[error("Corrupt thread block at {page}: {reason}")]
    CorruptThreadBlock { page: PageId, reason: String },

    #[error("Corrupt table of contents at {page}: {reason}")]
    CorruptToc { page: PageId, reason: String },

    #[error("Thread {0} is not registered")]
    UnknownThread(u32),

    #[error("Thread already registered: {0}")]
    ThreadExists(String),

    #[error("Invalid thread: {0}")]
    InvalidThread(String),

    #[error("Allocation of {pages} page(s) failed: {reason}")]
    Allocation { pages: u64, reason: String },

    #[error("Address space exhausted: {requested} bytes requested, {reserved} reserved")]
    AddressSpaceExhausted { requested: u64, reserved: u64 },

    #[error("Row {row} out of range ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("Attribute index {index} out of range ({count} attributes)")]
    AttributeOutOfRange { index: usize, count: usize },

    #[error("Byte range {start}..{end} lies outside the mapped file ({len} bytes)")]
    RangeOutOfBounds { start: u64, end: u64, len: u64 },

    #[error("Byte range {start}..{end} spans {segments} segments")]
    RangeStraddle { start: u64, end: u64, segments: usize },

    #[error("Mapping is read-only")]
    ReadOnly,

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cannot encode {value:?} for attribute {attribute}: {reason}")]
    Encode {
        attribute: String,
        value: String,
        reason: String,
    },

    #[error("Cannot decode stored value for attribute {attribute}: {reason}")]
    Decode { attribute: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EdfError>;
