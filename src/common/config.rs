use super::error::{EdfError, Result};

/// Magic bytes at the start of every EDF file
pub const EDF_MAGIC: [u8; 4] = *b"XEDF";

/// On-disk format version understood by this crate
pub const EDF_VERSION: u32 = 1;

/// Header field offsets (page 0). All header integers are big-endian.
pub const MAGIC_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const PAGE_SIZE_OFFSET: usize = 8;
pub const THREAD_COUNT_OFFSET: usize = 12;
pub const HEADER_SIZE: usize = 16;

/// Page holding the file header
pub const HEADER_PAGE: u64 = 0;

/// Page holding the first table-of-contents block
pub const TOC_HEAD_PAGE: u64 = 1;

/// Page holding the first thread block
pub const THREAD_BLOCK_PAGE: u64 = 2;

/// Size of a freshly created file, in pages
pub const INITIAL_PAGES: u64 = 4;

/// Every TOC and thread block starts with a pointer to its successor (0 = none)
pub const NEXT_POINTER_SIZE: usize = 8;

/// TOC entry: thread id (4) + start page (4) + end page, exclusive (4)
pub const TOC_ENTRY_SIZE: usize = 12;

/// Longest thread name a record may carry
pub const MAX_THREAD_NAME_LEN: usize = 255;

/// Reserved thread for allocator and registry bookkeeping
pub const SYSTEM_THREAD_ID: u32 = 1;
pub const SYSTEM_THREAD_NAME: &str = "SYSTEM";

/// Reserved thread for fixed-width row data
pub const FIXED_THREAD_ID: u32 = 2;
pub const FIXED_THREAD_NAME: &str = "FIXED";

/// Width of every stored cell in bytes
pub const CELL_SIZE: usize = 8;

/// Largest extent the row store will request, in pages
pub const MAX_EXTENT_PAGES: u64 = 64;

/// Default reservation for file-backed mappings: 16 x 256 MiB
pub const DEFAULT_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;
pub const DEFAULT_SEGMENT_COUNT: usize = 16;

/// Default reservation for anonymous mappings. Pages are only committed when
/// touched, so ephemeral tables reserve as much as file-backed ones.
pub const ANONYMOUS_SEGMENT_SIZE: u64 = DEFAULT_SEGMENT_SIZE;
pub const ANONYMOUS_SEGMENT_COUNT: usize = DEFAULT_SEGMENT_COUNT;

/// Fallback when the host cannot report its page size
const FALLBACK_PAGE_SIZE: u32 = 4096;

/// Geometry of one EDF mapping.
///
/// The page size is stored in the file header and checked on every open, so a
/// file is only portable between hosts that agree on it. The address space is
/// reserved up front as `segment_count` mappings of `segment_size` bytes each,
/// which lets the backing file grow without remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdfConfig {
    page_size: u32,
    segment_size: u64,
    segment_count: usize,
}

impl EdfConfig {
    /// Configuration for a file-backed mapping using the host page size.
    pub fn host() -> Self {
        Self {
            page_size: host_page_size(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            segment_count: DEFAULT_SEGMENT_COUNT,
        }
    }

    /// Configuration for an anonymous (ephemeral) mapping.
    pub fn anonymous() -> Self {
        Self {
            page_size: host_page_size(),
            segment_size: ANONYMOUS_SEGMENT_SIZE,
            segment_count: ANONYMOUS_SEGMENT_COUNT,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_segment_count(mut self, segment_count: usize) -> Self {
        self.segment_count = segment_count;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Pages per segment.
    pub fn segment_pages(&self) -> u64 {
        self.segment_size / self.page_size as u64
    }

    /// Total bytes of address space reserved by a mapping with this geometry.
    pub fn reservation(&self) -> u64 {
        self.segment_size * self.segment_count as u64
    }

    /// Checks the geometry is usable.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < 64 {
            return Err(EdfError::Config(format!(
                "page size {} must be a power of two of at least 64 bytes",
                self.page_size
            )));
        }
        if self.segment_size == 0 || self.segment_size % self.page_size as u64 != 0 {
            return Err(EdfError::Config(format!(
                "segment size {} is not a whole multiple of the page size {}",
                self.segment_size, self.page_size
            )));
        }
        if self.segment_count == 0 {
            return Err(EdfError::Config("at least one segment is required".into()));
        }
        if self.segment_size * (self.segment_count as u64) < INITIAL_PAGES * self.page_size as u64 {
            return Err(EdfError::Config(format!(
                "reservation of {} bytes cannot hold the initial {} pages",
                self.reservation(),
                INITIAL_PAGES
            )));
        }
        if usize::try_from(self.segment_size).is_err() {
            return Err(EdfError::Config(format!(
                "segment size {} does not fit the address space",
                self.segment_size
            )));
        }
        Ok(())
    }
}

impl Default for EdfConfig {
    fn default() -> Self {
        Self::host()
    }
}

/// Queries the runtime page size.
#[cfg(unix)]
pub fn host_page_size() -> u32 {
    // SAFETY: sysconf has no preconditions and only reads process state.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        FALLBACK_PAGE_SIZE
    } else {
        size as u32
    }
}

#[cfg(not(unix))]
pub fn host_page_size() -> u32 {
    FALLBACK_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_is_valid() {
        let config = EdfConfig::host();
        assert!(config.validate().is_ok());
        assert!(config.page_size().is_power_of_two());
        assert_eq!(config.reservation(), DEFAULT_SEGMENT_SIZE * DEFAULT_SEGMENT_COUNT as u64);
    }

    #[test]
    fn test_anonymous_reservation_matches_file_backed() {
        let config = EdfConfig::anonymous();
        assert!(config.validate().is_ok());
        assert_eq!(config.reservation(), EdfConfig::host().reservation());
        assert!(config.reservation() > 64 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let config = EdfConfig::host().with_page_size(1000);
        assert!(matches!(config.validate(), Err(EdfError::Config(_))));

        let config = EdfConfig::host().with_page_size(32);
        assert!(matches!(config.validate(), Err(EdfError::Config(_))));
    }

    #[test]
    fn test_rejects_unaligned_segment() {
        let config = EdfConfig::host()
            .with_page_size(4096)
            .with_segment_size(4096 * 3 + 1);
        assert!(matches!(config.validate(), Err(EdfError::Config(_))));
    }

    #[test]
    fn test_rejects_tiny_reservation() {
        let config = EdfConfig::host()
            .with_page_size(4096)
            .with_segment_size(4096)
            .with_segment_count(2);
        assert!(matches!(config.validate(), Err(EdfError::Config(_))));
    }

    #[test]
    fn test_segment_pages() {
        let config = EdfConfig::host()
            .with_page_size(4096)
            .with_segment_size(4096 * 8)
            .with_segment_count(4);
        assert_eq!(config.segment_pages(), 8);
        assert_eq!(config.reservation(), 4096 * 32);
    }
}
