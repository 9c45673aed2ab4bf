use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, warn};

use crate::common::{
    EdfError, PageId, Result, MAX_THREAD_NAME_LEN, NEXT_POINTER_SIZE, SYSTEM_THREAD_ID,
    THREAD_BLOCK_PAGE, THREAD_COUNT_OFFSET,
};
use crate::storage::codec::{read_u32_be, read_u64_be, write_u64_be};

use super::file::EdfFile;

/// A named, numbered stream multiplexed inside one EDF file.
///
/// ## Record format
///
/// ```text
/// +--------------+----------------+------------+
/// | name length  | name (UTF-8)   | thread id  |
/// | u32, BE      | length bytes   | u32, BE    |
/// +--------------+----------------+------------+
/// ```
///
/// A zero name length marks the end of the records in a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Thread {
    name: String,
    id: u32,
}

impl Thread {
    pub fn new(name: impl Into<String>, id: u32) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_THREAD_NAME_LEN {
            return Err(EdfError::InvalidThread(format!(
                "name must be 1..={} bytes, got {}",
                MAX_THREAD_NAME_LEN,
                name.len()
            )));
        }
        if id == 0 {
            return Err(EdfError::InvalidThread(format!(
                "thread {:?} needs an id of at least 1",
                name
            )));
        }
        Ok(Self { name, id })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Bytes this record occupies in a thread block.
    pub fn space_needed(&self) -> usize {
        4 + self.name.len() + 4
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32(self.id);
    }

    /// Parses one record from the front of `data`, returning it with the
    /// number of bytes consumed. `None` if the record is truncated or invalid.
    pub fn deserialize(data: &[u8]) -> Option<(Self, usize)> {
        let mut buf = data;
        if buf.remaining() < 4 {
            return None;
        }
        let len = buf.get_u32() as usize;
        if len == 0 || len > MAX_THREAD_NAME_LEN || buf.remaining() < len + 4 {
            return None;
        }
        let name = std::str::from_utf8(&buf[..len]).ok()?.to_string();
        buf.advance(len);
        let id = buf.get_u32();
        if id == 0 {
            return None;
        }
        Some((Self { name, id }, 8 + len))
    }
}

/// Where the next record goes
struct ThreadCursor {
    block: u64,
    offset: usize,
}

impl EdfFile {
    /// Number of threads recorded in the header.
    pub fn thread_count(&self) -> Result<u32> {
        self.header_u32(THREAD_COUNT_OFFSET)
    }

    pub(crate) fn set_thread_count(&mut self, count: u32) -> Result<()> {
        self.set_header_u32(THREAD_COUNT_OFFSET, count)
    }

    pub(crate) fn increment_thread_count(&mut self) -> Result<u32> {
        let count = self.thread_count()? + 1;
        self.set_thread_count(count)?;
        Ok(count)
    }

    /// Reads every thread record, in the order they were written.
    pub fn threads(&self) -> Result<Vec<Thread>> {
        self.scan_threads().map(|(threads, _)| threads)
    }

    /// Thread ids mapped to their names.
    pub fn list_threads(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .threads()?
            .into_iter()
            .map(|thread| (thread.id, thread.name))
            .collect())
    }

    pub fn thread_by_name(&self, name: &str) -> Result<Option<Thread>> {
        Ok(self.threads()?.into_iter().find(|t| t.name == name))
    }

    pub fn thread_by_id(&self, id: u32) -> Result<Option<Thread>> {
        Ok(self.threads()?.into_iter().find(|t| t.id == id))
    }

    /// Appends a thread record and bumps the header count.
    pub fn write_thread(&mut self, thread: &Thread) -> Result<()> {
        self.ensure_writable()?;
        let page_size = self.page_size() as usize;
        if thread.space_needed() > page_size - NEXT_POINTER_SIZE {
            return Err(EdfError::InvalidThread(format!(
                "record for {:?} needs {} bytes, a thread block holds {}",
                thread.name,
                thread.space_needed(),
                page_size - NEXT_POINTER_SIZE
            )));
        }
        let (threads, mut cursor) = self.scan_threads()?;
        if let Some(existing) = threads
            .iter()
            .find(|t| t.name == thread.name || t.id == thread.id)
        {
            return Err(EdfError::ThreadExists(format!(
                "{:?} (id {}) conflicts with {:?} (id {})",
                thread.name, thread.id, existing.name, existing.id
            )));
        }

        if cursor.offset + thread.space_needed() > page_size {
            cursor = self.grow_thread_chain(cursor.block)?;
        }

        let mut record = BytesMut::with_capacity(thread.space_needed());
        thread.serialize(&mut record);
        let page = self.page_mut(cursor.block)?;
        page[cursor.offset..cursor.offset + record.len()].copy_from_slice(&record);

        let count = self.increment_thread_count()?;
        debug!(name = %thread.name, id = thread.id, count, "registered thread");
        Ok(())
    }

    /// Registers `name` under the next free id.
    pub fn register_thread(&mut self, name: &str) -> Result<Thread> {
        let next_id = self
            .threads()?
            .iter()
            .map(Thread::id)
            .max()
            .unwrap_or(0)
            + 1;
        let thread = Thread::new(name, next_id)?;
        self.write_thread(&thread)?;
        Ok(thread)
    }

    /// Links a fresh SYSTEM page after `last_block` and returns its cursor.
    fn grow_thread_chain(&mut self, last_block: u64) -> Result<ThreadCursor> {
        let range = self.alloc_pages(1, SYSTEM_THREAD_ID)?;
        let block = range.start() / self.page_size() as u64;
        self.page_mut(block)?.fill(0);
        write_u64_be(self.page_mut(last_block)?, 0, block);
        debug!(from = last_block, to = block, "chained thread block");
        Ok(ThreadCursor {
            block,
            offset: NEXT_POINTER_SIZE,
        })
    }

    /// Walks the thread blocks until the header count is satisfied.
    fn scan_threads(&self) -> Result<(Vec<Thread>, ThreadCursor)> {
        let expected = self.thread_count()?;
        let page_size = self.page_size() as usize;
        let page_count = self.page_count();
        let mut threads = Vec::with_capacity(expected as usize);
        let mut cursor = ThreadCursor {
            block: THREAD_BLOCK_PAGE,
            offset: NEXT_POINTER_SIZE,
        };
        let mut hops = 0u64;

        while threads.len() < expected as usize {
            let page = self.page(cursor.block)?;
            let exhausted = cursor.offset + 4 > page_size || read_u32_be(page, cursor.offset) == 0;
            if exhausted {
                let next = read_u64_be(page, 0);
                if next == 0 {
                    warn!(
                        expected,
                        found = threads.len(),
                        "thread records run out before the header count"
                    );
                    return Err(EdfError::ThreadCountMismatch {
                        expected,
                        found: threads.len() as u32,
                    });
                }
                hops += 1;
                if next >= page_count || hops > page_count {
                    return Err(EdfError::CorruptThreadBlock {
                        page: PageId::new(cursor.block),
                        reason: format!("next pointer {} is invalid", next),
                    });
                }
                cursor = ThreadCursor {
                    block: next,
                    offset: NEXT_POINTER_SIZE,
                };
                continue;
            }

            match Thread::deserialize(&page[cursor.offset..]) {
                Some((thread, used)) => {
                    threads.push(thread);
                    cursor.offset += used;
                }
                None => {
                    warn!(block = cursor.block, offset = cursor.offset, "unreadable thread record");
                    return Err(EdfError::CorruptThreadBlock {
                        page: PageId::new(cursor.block),
                        reason: format!("unreadable record at offset {}", cursor.offset),
                    });
                }
            }
        }

        Ok((threads, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EdfConfig;

    #[test]
    fn test_serialize_system_thread() {
        let thread = Thread::new("SYSTEM", 1).unwrap();
        let mut buf = BytesMut::new();
        thread.serialize(&mut buf);
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 6, b'S', b'Y', b'S', b'T', b'E', b'M', 0, 0, 0, 1]
        );
        assert_eq!(thread.space_needed(), buf.len());
    }

    #[test]
    fn test_deserialize_reports_consumed_bytes() {
        let bytes = [0, 0, 0, 5, b'F', b'I', b'X', b'E', b'D', 0, 0, 0, 2, 0xff];
        let (thread, used) = Thread::deserialize(&bytes).unwrap();
        assert_eq!(thread.name(), "FIXED");
        assert_eq!(thread.id(), 2);
        assert_eq!(used, 13);
    }

    #[test]
    fn test_deserialize_rejects_truncated_record() {
        assert!(Thread::deserialize(&[0, 0, 0, 6, b'S', b'Y', b'S']).is_none());
        assert!(Thread::deserialize(&[0, 0, 0, 0]).is_none());
        assert!(Thread::deserialize(&[0, 0]).is_none());
    }

    #[test]
    fn test_invalid_threads() {
        assert!(Thread::new("", 3).is_err());
        assert!(Thread::new("X", 0).is_err());
        assert!(Thread::new("x".repeat(256), 3).is_err());
        assert!(Thread::new("x".repeat(255), 3).is_ok());
    }

    #[test]
    fn test_fresh_file_has_reserved_threads() {
        let edf = EdfFile::anonymous(EdfConfig::anonymous()).unwrap();
        assert_eq!(edf.thread_count().unwrap(), 2);
        let threads = edf.list_threads().unwrap();
        assert_eq!(threads.get(&1).map(String::as_str), Some("SYSTEM"));
        assert_eq!(threads.get(&2).map(String::as_str), Some("FIXED"));
    }

    #[test]
    fn test_duplicate_thread_is_rejected() {
        let mut edf = EdfFile::anonymous(EdfConfig::anonymous()).unwrap();
        let result = edf.write_thread(&Thread::new("FIXED", 9).unwrap());
        assert!(matches!(result, Err(EdfError::ThreadExists(_))));
        let result = edf.write_thread(&Thread::new("OTHER", 1).unwrap());
        assert!(matches!(result, Err(EdfError::ThreadExists(_))));
        assert_eq!(edf.thread_count().unwrap(), 2);
    }

    #[test]
    fn test_thread_chain_grows_past_one_block() {
        let config = EdfConfig::anonymous().with_page_size(64).with_segment_size(64 * 64);
        let mut edf = EdfFile::anonymous(config).unwrap();
        for i in 0..20 {
            edf.register_thread(&format!("stream-{:02}", i)).unwrap();
        }
        let threads = edf.threads().unwrap();
        assert_eq!(threads.len(), 22);
        assert_eq!(threads[2].name(), "stream-00");
        assert_eq!(threads[21].name(), "stream-19");
        assert_eq!(threads[21].id(), 22);
    }

    #[test]
    fn test_record_larger_than_block_is_rejected() {
        let config = EdfConfig::anonymous().with_page_size(256).with_segment_size(256 * 16);
        let mut edf = EdfFile::anonymous(config).unwrap();
        let contents_before = edf.contents().unwrap();

        let result = edf.register_thread(&"n".repeat(250));
        assert!(matches!(result, Err(EdfError::InvalidThread(_))));
        assert_eq!(edf.thread_count().unwrap(), 2);
        assert_eq!(edf.contents().unwrap(), contents_before);
        assert_eq!(edf.page_count(), 4);

        // 240 bytes of name plus 8 bytes of framing fills a block exactly.
        edf.register_thread(&"n".repeat(240)).unwrap();
        assert_eq!(edf.thread_count().unwrap(), 3);
    }
}
