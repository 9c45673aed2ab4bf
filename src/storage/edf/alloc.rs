//! Page allocation driven by the on-disk table of contents.
//!
//! ## TOC block format
//!
//! ```text
//! +-------------------+-----------+-----------+-----+
//! | next block (u64)  | entry 0   | entry 1   | ... |
//! +-------------------+-----------+-----------+-----+
//! ```
//!
//! Each entry is `thread id | start page | end page (exclusive)`, three
//! big-endian u32s. A zero thread id marks an empty slot. The head block
//! lives at a fixed page; further blocks are chained through the next
//! pointer and are themselves recorded as SYSTEM entries.

use tracing::debug;

use crate::common::{
    EdfError, PageId, Result, FIXED_THREAD_ID, HEADER_PAGE, NEXT_POINTER_SIZE, SYSTEM_THREAD_ID,
    TOC_ENTRY_SIZE, TOC_HEAD_PAGE,
};
use crate::storage::codec::{read_u32_be, read_u64_be, write_u32_be, write_u64_be};

use super::file::EdfFile;
use super::range::Range;

/// One extent of pages owned by a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentEntry {
    pub thread: u32,
    pub start: u32,
    pub end: u32,
}

impl ContentEntry {
    pub fn new(thread: u32, start: u32, end: u32) -> Self {
        Self { thread, start, end }
    }

    pub fn pages(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    fn read(block: &[u8], slot: usize) -> Self {
        let offset = slot_offset(slot);
        Self {
            thread: read_u32_be(block, offset),
            start: read_u32_be(block, offset + 4),
            end: read_u32_be(block, offset + 8),
        }
    }

    fn write(&self, block: &mut [u8], slot: usize) {
        let offset = slot_offset(slot);
        write_u32_be(block, offset, self.thread);
        write_u32_be(block, offset + 4, self.start);
        write_u32_be(block, offset + 8, self.end);
    }
}

fn slot_offset(slot: usize) -> usize {
    NEXT_POINTER_SIZE + slot * TOC_ENTRY_SIZE
}

impl EdfFile {
    /// Entries that fit in one TOC block.
    pub fn toc_entries_per_block(&self) -> usize {
        (self.page_size() as usize - NEXT_POINTER_SIZE) / TOC_ENTRY_SIZE
    }

    /// Pages of the TOC chain, head first.
    pub fn toc_blocks(&self) -> Result<Vec<u64>> {
        let page_count = self.page_count();
        let mut blocks = vec![TOC_HEAD_PAGE];
        let mut current = TOC_HEAD_PAGE;
        loop {
            let next = read_u64_be(self.page(current)?, 0);
            if next == 0 {
                return Ok(blocks);
            }
            if next >= page_count || next <= TOC_HEAD_PAGE || blocks.contains(&next) {
                return Err(EdfError::CorruptToc {
                    page: PageId::new(current),
                    reason: format!("next pointer {} is invalid", next),
                });
            }
            blocks.push(next);
            current = next;
        }
    }

    /// Every occupied TOC entry, in chain order.
    pub fn contents(&self) -> Result<Vec<ContentEntry>> {
        Ok(self
            .toc_slots()?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    fn toc_slots(&self) -> Result<Vec<(u64, ContentEntry)>> {
        let per_block = self.toc_entries_per_block();
        let mut slots = Vec::new();
        for block in self.toc_blocks()? {
            let page = self.page(block)?;
            for slot in 0..per_block {
                let entry = ContentEntry::read(page, slot);
                if entry.thread != 0 {
                    slots.push((block, entry));
                }
            }
        }
        Ok(slots)
    }

    /// One flag per page of the file; `true` means the page is in use.
    fn free_bitmap(&self) -> Result<Vec<bool>> {
        let page_count = self.page_count() as usize;
        let mut used = vec![false; page_count];
        used[HEADER_PAGE as usize] = true;
        used[TOC_HEAD_PAGE as usize] = true;

        for (block, entry) in self.toc_slots()? {
            let (start, end) = (entry.start as usize, entry.end as usize);
            if start >= end || end > page_count {
                return Err(EdfError::CorruptToc {
                    page: PageId::new(block),
                    reason: format!(
                        "entry {}..{} does not fit {} pages",
                        start, end, page_count
                    ),
                });
            }
            if let Some(page) = (start..end).find(|&p| used[p]) {
                return Err(EdfError::CorruptToc {
                    page: PageId::new(block),
                    reason: format!("page {} is claimed twice", page),
                });
            }
            used[start..end].iter_mut().for_each(|p| *p = true);
        }
        Ok(used)
    }

    /// First page of the first run of `pages` free pages, if any.
    pub fn find_contiguous_free_run(&self, pages: u64) -> Result<Option<u64>> {
        let used = self.free_bitmap()?;
        let mut run_start = 0;
        let mut run_len = 0;
        for (page, &in_use) in used.iter().enumerate() {
            if in_use {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = page;
            }
            run_len += 1;
            if run_len as u64 == pages {
                return Ok(Some(run_start as u64));
            }
        }
        Ok(None)
    }

    /// Hands `pages` contiguous pages to `thread`.
    ///
    /// When no free run exists the file grows by exactly `pages` pages and
    /// the search is repeated once.
    pub fn alloc_pages(&mut self, pages: u64, thread: u32) -> Result<Range> {
        self.ensure_writable()?;
        let segment_pages = self.config().segment_pages();
        if pages == 0 || pages > segment_pages {
            return Err(EdfError::Allocation {
                pages,
                reason: format!("extents must be 1..={} pages", segment_pages),
            });
        }
        if self.thread_by_id(thread)?.is_none() {
            return Err(EdfError::UnknownThread(thread));
        }

        let start = match self.find_contiguous_free_run(pages)? {
            Some(start) => start,
            None => {
                self.extend(pages * self.page_size() as u64)?;
                self.find_contiguous_free_run(pages)?
                    .ok_or_else(|| EdfError::Allocation {
                        pages,
                        reason: "no free run after growing the file".into(),
                    })?
            }
        };

        let end = start + pages;
        let entry = ContentEntry::new(thread, to_page_u32(start)?, to_page_u32(end)?);
        self.add_to_toc(entry)?;
        debug!(thread, start, end, "allocated pages");
        self.page_range(start, end - 1)
    }

    /// Allocates enough whole pages on the FIXED thread to hold `bytes`.
    pub fn fixed_alloc(&mut self, bytes: u64) -> Result<Range> {
        let pages = bytes.div_ceil(self.page_size() as u64);
        self.alloc_pages(pages, FIXED_THREAD_ID)
    }

    /// Records `entry` in the first empty TOC slot, chaining a new block if
    /// every slot is taken.
    pub(crate) fn add_to_toc(&mut self, entry: ContentEntry) -> Result<()> {
        let blocks = self.toc_blocks()?;
        let per_block = self.toc_entries_per_block();

        for &block in &blocks {
            let page = self.page(block)?;
            let free_slot = (0..per_block).find(|&slot| ContentEntry::read(page, slot).thread == 0);
            if let Some(slot) = free_slot {
                entry.write(self.page_mut(block)?, slot);
                return Ok(());
            }
        }

        // Every slot is taken. The new block comes from a raw extension so
        // the TOC is never consulted while it is being grown.
        let last = blocks[blocks.len() - 1];
        let new_block = self.page_count();
        self.extend(self.page_size() as u64)?;
        let own = ContentEntry::new(
            SYSTEM_THREAD_ID,
            to_page_u32(new_block)?,
            to_page_u32(new_block + 1)?,
        );
        {
            let page = self.page_mut(new_block)?;
            page.fill(0);
            own.write(page, 0);
            entry.write(page, 1);
        }
        write_u64_be(self.page_mut(last)?, 0, new_block);
        debug!(from = last, to = new_block, "chained TOC block");
        Ok(())
    }
}

fn to_page_u32(page: u64) -> Result<u32> {
    u32::try_from(page).map_err(|_| EdfError::Allocation {
        pages: page,
        reason: "page index does not fit a TOC entry".into(),
    })
}
