use std::fmt;

/// Page identifier - the index of a page within an EDF file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// The 8-byte system representation of a single cell
pub type SysVal = [u8; 8];

/// How a mapping is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Verify the header; every modification fails
    ReadOnly,
    /// Verify the header; reads and writes allowed
    ReadWrite,
    /// Truncate the backing store and write a fresh header
    Create,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

/// Whether unmapping flushes first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapMode {
    /// The caller already synchronized
    NoSync,
    /// Flush dirty pages, then unmap
    Sync,
}

/// Row ordering requested from a sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}
