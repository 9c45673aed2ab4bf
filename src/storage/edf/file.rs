//! The address-space manager.
//!
//! An [`EdfFile`] owns one reservation of `segment_count` fixed-size mappings
//! over a backing file (or anonymous memory). The reservation is made once,
//! up front, so the backing file grows by truncation and never needs to be
//! remapped. Only bytes below the current file length are ever handed out;
//! everything else in the reservation is inaccessible.
//!
//! Views returned by [`EdfFile::view`] and [`EdfFile::view_mut`] borrow the
//! file, so they cannot outlive [`EdfFile::unmap`], which consumes it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, info};

use crate::common::{
    EdfConfig, EdfError, OpenMode, Result, UnmapMode, EDF_MAGIC, EDF_VERSION,
    FIXED_THREAD_ID, FIXED_THREAD_NAME, HEADER_SIZE, INITIAL_PAGES, MAGIC_OFFSET,
    PAGE_SIZE_OFFSET, SYSTEM_THREAD_ID, SYSTEM_THREAD_NAME, THREAD_BLOCK_PAGE,
    THREAD_COUNT_OFFSET, VERSION_OFFSET,
};
use crate::storage::codec::{read_u32_be, write_u32_be};

use super::alloc::ContentEntry;
use super::range::{Range, RangeView, RangeViewMut};
use super::thread::Thread;

enum Backing {
    File { file: File, path: Option<PathBuf> },
    Anonymous,
}

enum Segment {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Segment {
    fn bytes(&self) -> &[u8] {
        match self {
            Segment::ReadOnly(map) => &map[..],
            Segment::ReadWrite(map) => &map[..],
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match self {
            Segment::ReadOnly(_) => Err(EdfError::ReadOnly),
            Segment::ReadWrite(map) => Ok(&mut map[..]),
        }
    }

    fn flush(&self, len: usize) -> std::io::Result<()> {
        match self {
            Segment::ReadOnly(_) => Ok(()),
            Segment::ReadWrite(map) => map.flush_range(0, len),
        }
    }
}

/// A memory-mapped extensible data file.
pub struct EdfFile {
    backing: Backing,
    segments: Vec<Segment>,
    config: EdfConfig,
    mode: OpenMode,
    len: u64,
}

impl EdfFile {
    /// Opens (or creates) the file at `path` and maps it.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, config: EdfConfig) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true);
        match mode {
            OpenMode::ReadOnly => {}
            OpenMode::ReadWrite => {
                options.write(true);
            }
            OpenMode::Create => {
                options.write(true).create(true).truncate(true);
            }
        }
        let file = options.open(path)?;
        Self::map_with_path(file, Some(path.to_path_buf()), mode, config)
    }

    /// Maps an already opened file.
    ///
    /// `Create` truncates the file to the initial size and writes a fresh
    /// header; the other modes verify the existing header.
    pub fn map(file: File, mode: OpenMode, config: EdfConfig) -> Result<Self> {
        Self::map_with_path(file, None, mode, config)
    }

    fn map_with_path(
        file: File,
        path: Option<PathBuf>,
        mode: OpenMode,
        config: EdfConfig,
    ) -> Result<Self> {
        config.validate()?;

        if mode == OpenMode::Create {
            file.set_len(0)?;
        }

        let segment_size = config.segment_size() as usize;
        let mut segments = Vec::with_capacity(config.segment_count());
        for i in 0..config.segment_count() {
            let offset = i as u64 * config.segment_size();
            // SAFETY: the mapping may extend past the end of the file. Bytes
            // beyond the current length are never exposed: every access goes
            // through `view`/`view_mut`, which bound-check against `len`, and
            // the file only ever grows while mapped.
            let segment = unsafe {
                if mode.is_writable() {
                    Segment::ReadWrite(
                        MmapOptions::new()
                            .offset(offset)
                            .len(segment_size)
                            .map_mut(&file)?,
                    )
                } else {
                    Segment::ReadOnly(
                        MmapOptions::new()
                            .offset(offset)
                            .len(segment_size)
                            .map(&file)?,
                    )
                }
            };
            segments.push(segment);
        }

        let len = file.metadata()?.len();
        let mut edf = Self {
            backing: Backing::File { file, path },
            segments,
            config,
            mode,
            len,
        };

        if mode == OpenMode::Create {
            edf.initialize()?;
            info!(path = ?edf.path(), page_size = config.page_size(), "created EDF file");
        } else {
            edf.verify_header()?;
            info!(path = ?edf.path(), pages = edf.page_count(), ?mode, "opened EDF file");
        }
        Ok(edf)
    }

    /// Creates an ephemeral EDF backed by anonymous memory.
    pub fn anonymous(config: EdfConfig) -> Result<Self> {
        config.validate()?;
        let segment_size = config.segment_size() as usize;
        let segments = (0..config.segment_count())
            .map(|_| {
                MmapOptions::new()
                    .len(segment_size)
                    .map_anon()
                    .map(Segment::ReadWrite)
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut edf = Self {
            backing: Backing::Anonymous,
            segments,
            config,
            mode: OpenMode::Create,
            len: 0,
        };
        edf.initialize()?;
        debug!(reservation = config.reservation(), "created anonymous EDF");
        Ok(edf)
    }

    /// Writes the header, the TOC head and the reserved threads.
    fn initialize(&mut self) -> Result<()> {
        let page_size = self.page_size() as u64;
        self.grow_to(INITIAL_PAGES * page_size)?;

        let mut header = [0u8; HEADER_SIZE];
        header[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&EDF_MAGIC);
        write_u32_be(&mut header, VERSION_OFFSET, EDF_VERSION);
        write_u32_be(&mut header, PAGE_SIZE_OFFSET, self.page_size());
        write_u32_be(&mut header, THREAD_COUNT_OFFSET, 0);
        self.page_mut(0)?[..HEADER_SIZE].copy_from_slice(&header);

        // The first thread block is tracked like any other SYSTEM page.
        self.add_to_toc(ContentEntry::new(
            SYSTEM_THREAD_ID,
            THREAD_BLOCK_PAGE as u32,
            THREAD_BLOCK_PAGE as u32 + 1,
        ))?;
        self.write_thread(&Thread::new(SYSTEM_THREAD_NAME, SYSTEM_THREAD_ID)?)?;
        self.write_thread(&Thread::new(FIXED_THREAD_NAME, FIXED_THREAD_ID)?)?;
        self.sync()
    }

    /// Checks magic bytes, format version and page size.
    pub fn verify_header(&self) -> Result<()> {
        let page_size = self.page_size() as u64;
        if self.len < HEADER_SIZE as u64 {
            return Err(EdfError::Format(format!(
                "file is {} bytes, too small for a header",
                self.len
            )));
        }

        let header = self.view(&self.range(0, HEADER_SIZE as u64)?)?.to_vec();
        if header[MAGIC_OFFSET..MAGIC_OFFSET + 4] != EDF_MAGIC {
            return Err(EdfError::Format(format!(
                "invalid magic bytes {:?}",
                &header[MAGIC_OFFSET..MAGIC_OFFSET + 4]
            )));
        }

        let version = read_u32_be(&header, VERSION_OFFSET);
        if version != EDF_VERSION {
            return Err(EdfError::Format(format!("unsupported version {}", version)));
        }

        let recorded = read_u32_be(&header, PAGE_SIZE_OFFSET);
        if recorded != self.page_size() {
            return Err(EdfError::Format(format!(
                "unsupported page size (file: {}, configured: {})",
                recorded,
                self.page_size()
            )));
        }

        if self.len % page_size != 0 || self.len < INITIAL_PAGES * page_size {
            return Err(EdfError::Format(format!(
                "file length {} is not a valid multiple of the page size {}",
                self.len, page_size
            )));
        }
        if self.len > self.config.reservation() {
            return Err(EdfError::Format(format!(
                "file length {} exceeds the configured reservation {}",
                self.len,
                self.config.reservation()
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &EdfConfig {
        &self.config
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Path of the backing file, if it has one.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => path.as_deref(),
            Backing::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.backing, Backing::Anonymous)
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size()
    }

    /// Current length of the backing store in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current length of the backing store in pages.
    pub fn page_count(&self) -> u64 {
        self.len / self.page_size() as u64
    }

    /// Resolves the byte span `byte_start..byte_end`.
    pub fn range(&self, byte_start: u64, byte_end: u64) -> Result<Range> {
        if byte_start > byte_end {
            return Err(EdfError::RangeOutOfBounds {
                start: byte_start,
                end: byte_end,
                len: self.len,
            });
        }
        Ok(Range::new(byte_start, byte_end, self.config.segment_size()))
    }

    /// Resolves pages `page_start..=page_end`.
    pub fn page_range(&self, page_start: u64, page_end: u64) -> Result<Range> {
        let page_size = self.page_size() as u64;
        self.range(page_start * page_size, (page_end + 1) * page_size)
    }

    fn check_live(&self, range: &Range) -> Result<()> {
        if range.end() > self.len {
            return Err(EdfError::RangeOutOfBounds {
                start: range.start(),
                end: range.end(),
                len: self.len,
            });
        }
        if range.segment_span() > 2 {
            return Err(EdfError::RangeStraddle {
                start: range.start(),
                end: range.end(),
                segments: range.segment_span(),
            });
        }
        Ok(())
    }

    /// Borrows the bytes of a resolved range.
    pub fn view(&self, range: &Range) -> Result<RangeView<'_>> {
        self.check_live(range)?;
        if range.is_empty() {
            return Ok(RangeView::Contiguous(&[]));
        }
        let first = self.segments[range.segment_start].bytes();
        if !range.is_split() {
            return Ok(RangeView::Contiguous(
                &first[range.byte_start..range.byte_end],
            ));
        }
        let second = self.segments[range.segment_end].bytes();
        Ok(RangeView::Split(
            &first[range.byte_start..],
            &second[..range.byte_end],
        ))
    }

    /// Mutably borrows the bytes of a resolved range.
    pub fn view_mut(&mut self, range: &Range) -> Result<RangeViewMut<'_>> {
        self.ensure_writable()?;
        self.check_live(range)?;
        if range.is_empty() {
            return Ok(RangeViewMut::Contiguous(&mut []));
        }
        if !range.is_split() {
            let bytes = self.segments[range.segment_start].bytes_mut()?;
            return Ok(RangeViewMut::Contiguous(
                &mut bytes[range.byte_start..range.byte_end],
            ));
        }
        let (head, tail) = self.segments.split_at_mut(range.segment_end);
        let first = head[range.segment_start].bytes_mut()?;
        let second = tail[0].bytes_mut()?;
        Ok(RangeViewMut::Split(
            &mut first[range.byte_start..],
            &mut second[..range.byte_end],
        ))
    }

    /// Borrows a single page. Pages never straddle segments.
    pub(crate) fn page(&self, page: u64) -> Result<&[u8]> {
        let range = self.page_range(page, page)?;
        match self.view(&range)? {
            RangeView::Contiguous(bytes) => Ok(bytes),
            RangeView::Split(..) => Err(EdfError::RangeStraddle {
                start: range.start(),
                end: range.end(),
                segments: range.segment_span(),
            }),
        }
    }

    pub(crate) fn page_mut(&mut self, page: u64) -> Result<&mut [u8]> {
        let range = self.page_range(page, page)?;
        match self.view_mut(&range)? {
            RangeViewMut::Contiguous(bytes) => Ok(bytes),
            RangeViewMut::Split(..) => Err(EdfError::RangeStraddle {
                start: range.start(),
                end: range.end(),
                segments: range.segment_span(),
            }),
        }
    }

    pub(crate) fn header_u32(&self, offset: usize) -> Result<u32> {
        Ok(read_u32_be(self.page(0)?, offset))
    }

    pub(crate) fn set_header_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        write_u32_be(self.page_mut(0)?, offset, value);
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(EdfError::ReadOnly)
        }
    }

    /// Grows the backing store by `additional_bytes`.
    ///
    /// The reservation never changes, so no existing range is invalidated.
    pub fn extend(&mut self, additional_bytes: u64) -> Result<()> {
        let new_len = self.len.checked_add(additional_bytes).ok_or(
            EdfError::AddressSpaceExhausted {
                requested: u64::MAX,
                reserved: self.config.reservation(),
            },
        )?;
        self.grow_to(new_len)
    }

    fn grow_to(&mut self, new_len: u64) -> Result<()> {
        self.ensure_writable()?;
        if new_len > self.config.reservation() {
            return Err(EdfError::AddressSpaceExhausted {
                requested: new_len,
                reserved: self.config.reservation(),
            });
        }
        if new_len < self.len {
            return Err(EdfError::Allocation {
                pages: 0,
                reason: format!("cannot shrink from {} to {} bytes", self.len, new_len),
            });
        }

        if let Backing::File { file, .. } = &self.backing {
            file.set_len(new_len)?;
            let actual = file.metadata()?.len();
            if actual != new_len {
                return Err(EdfError::Allocation {
                    pages: (new_len - self.len) / self.page_size() as u64,
                    reason: format!("file is {} bytes after growing to {}", actual, new_len),
                });
            }
        }
        debug!(from = self.len, to = new_len, "grew EDF backing store");
        self.len = new_len;
        Ok(())
    }

    /// Flushes every live byte to the backing file.
    pub fn sync(&self) -> Result<()> {
        if self.is_anonymous() || !self.mode.is_writable() {
            return Ok(());
        }
        let segment_size = self.config.segment_size();
        for (i, segment) in self.segments.iter().enumerate() {
            let start = i as u64 * segment_size;
            if start >= self.len {
                break;
            }
            let live = (self.len - start).min(segment_size);
            segment.flush(live as usize)?;
        }
        Ok(())
    }

    /// Releases the mapping. All views derived from it are gone with it.
    pub fn unmap(mut self, mode: UnmapMode) -> Result<()> {
        if mode == UnmapMode::Sync {
            self.sync()?;
        }
        self.segments.clear();
        debug!(path = ?self.path(), "unmapped EDF");
        Ok(())
    }
}

impl Drop for EdfFile {
    fn drop(&mut self) {
        if !self.segments.is_empty() {
            let _ = self.sync();
        }
    }
}

impl std::fmt::Debug for EdfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdfFile")
            .field("path", &self.path())
            .field("mode", &self.mode)
            .field("len", &self.len)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn small_config() -> EdfConfig {
        let page_size = crate::common::host_page_size();
        EdfConfig::host()
            .with_segment_size(page_size as u64 * 4)
            .with_segment_count(16)
    }

    #[test]
    fn test_anonymous_header() {
        let edf = EdfFile::anonymous(EdfConfig::anonymous()).unwrap();
        let header = edf.view(&edf.range(0, 16).unwrap()).unwrap().to_vec();
        assert_eq!(&header[..4], b"XEDF");
        assert_eq!(read_u32_be(&header, 4), EDF_VERSION);
        assert_eq!(read_u32_be(&header, 8), edf.page_size());
        assert_eq!(edf.page_count(), INITIAL_PAGES);
        assert!(edf.is_anonymous());
    }

    #[test]
    fn test_create_sets_initial_size() {
        let temp = NamedTempFile::new().unwrap();
        let edf = EdfFile::open(temp.path(), OpenMode::Create, small_config()).unwrap();
        let expected = INITIAL_PAGES * edf.page_size() as u64;
        assert_eq!(edf.len(), expected);
        assert_eq!(std::fs::metadata(temp.path()).unwrap().len(), expected);
    }

    #[test]
    fn test_view_rejects_bytes_past_end() {
        let edf = EdfFile::anonymous(small_config()).unwrap();
        let range = edf.range(edf.len() - 4, edf.len() + 4).unwrap();
        assert!(matches!(
            edf.view(&range),
            Err(EdfError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_view_rejects_three_segments() {
        let mut edf = EdfFile::anonymous(small_config()).unwrap();
        let segment = edf.config().segment_size();
        edf.extend(segment * 3).unwrap();
        let range = edf.range(segment - 8, segment * 2 + 8).unwrap();
        assert!(matches!(
            edf.view(&range),
            Err(EdfError::RangeStraddle { segments: 3, .. })
        ));
    }

    #[test]
    fn test_split_write_lands_in_both_segments() {
        let mut edf = EdfFile::anonymous(small_config()).unwrap();
        let segment = edf.config().segment_size();
        edf.extend(segment).unwrap();

        let range = edf.range(segment - 3, segment + 5).unwrap();
        {
            let mut view = edf.view_mut(&range).unwrap();
            assert!(view.is_split());
            view.write_cell(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        }
        let view = edf.view(&range).unwrap();
        assert_eq!(view.read_cell(0).unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);

        let tail = edf.view(&edf.range(segment, segment + 5).unwrap()).unwrap();
        assert!(!tail.is_split());
        assert_eq!(tail.to_vec(), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_extend_beyond_reservation_fails() {
        let mut edf = EdfFile::anonymous(small_config()).unwrap();
        let reservation = edf.config().reservation();
        assert!(matches!(
            edf.extend(reservation),
            Err(EdfError::AddressSpaceExhausted { .. })
        ));
    }
}
