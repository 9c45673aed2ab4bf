use crate::common::{EdfError, Result, SysVal, CELL_SIZE};

/// Where a logical byte span lives inside a segmented mapping.
///
/// `byte_start` is an offset into `segment_start`; `byte_end` is an exclusive
/// offset into `segment_end`. A span whose segments differ straddles a
/// segment boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub segment_start: usize,
    pub segment_end: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    start: u64,
    end: u64,
}

impl Range {
    pub(crate) fn new(start: u64, end: u64, segment_size: u64) -> Self {
        debug_assert!(start <= end);
        let segment_start = (start / segment_size) as usize;
        let byte_start = (start % segment_size) as usize;
        let (segment_end, byte_end) = if start == end {
            (segment_start, byte_start)
        } else {
            let last = end - 1;
            ((last / segment_size) as usize, (last % segment_size) as usize + 1)
        };
        Self {
            segment_start,
            segment_end,
            byte_start,
            byte_end,
            start,
            end,
        }
    }

    /// Absolute offset of the first byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Absolute offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of segments this span touches.
    pub fn segment_span(&self) -> usize {
        self.segment_end - self.segment_start + 1
    }

    /// True if the span crosses a segment boundary.
    pub fn is_split(&self) -> bool {
        self.segment_start != self.segment_end
    }
}

/// A borrowed, read-only view of a resolved [`Range`].
///
/// The borrow ties the view to the mapping, so a view cannot outlive an
/// unmap or be held across a write.
#[derive(Debug, Clone, Copy)]
pub enum RangeView<'a> {
    Contiguous(&'a [u8]),
    Split(&'a [u8], &'a [u8]),
}

impl<'a> RangeView<'a> {
    fn pieces(&self) -> (&'a [u8], &'a [u8]) {
        match *self {
            RangeView::Contiguous(bytes) => (bytes, &[]),
            RangeView::Split(first, second) => (first, second),
        }
    }

    pub fn len(&self) -> usize {
        let (first, second) = self.pieces();
        first.len() + second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_split(&self) -> bool {
        matches!(self, RangeView::Split(..))
    }

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let (first, second) = self.pieces();
        let (a, b) = split_span(first.len(), second.len(), offset, out.len())?;
        let head = a.len();
        out[..head].copy_from_slice(&first[a]);
        out[head..].copy_from_slice(&second[b]);
        Ok(())
    }

    /// Reads one 8-byte cell at `offset`.
    pub fn read_cell(&self, offset: usize) -> Result<SysVal> {
        let mut cell = [0u8; CELL_SIZE];
        self.read_at(offset, &mut cell)?;
        Ok(cell)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let (first, second) = self.pieces();
        let mut out = Vec::with_capacity(first.len() + second.len());
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        out
    }
}

/// A borrowed, writable view of a resolved [`Range`].
#[derive(Debug)]
pub enum RangeViewMut<'a> {
    Contiguous(&'a mut [u8]),
    Split(&'a mut [u8], &'a mut [u8]),
}

impl<'a> RangeViewMut<'a> {
    fn pieces(&self) -> (&[u8], &[u8]) {
        match self {
            RangeViewMut::Contiguous(bytes) => (bytes, &[]),
            RangeViewMut::Split(first, second) => (first, second),
        }
    }

    fn pieces_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        match self {
            RangeViewMut::Contiguous(bytes) => (bytes, &mut []),
            RangeViewMut::Split(first, second) => (first, second),
        }
    }

    pub fn len(&self) -> usize {
        let (first, second) = self.pieces();
        first.len() + second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_split(&self) -> bool {
        matches!(self, RangeViewMut::Split(..))
    }

    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let (first, second) = self.pieces();
        let (a, b) = split_span(first.len(), second.len(), offset, out.len())?;
        let head = a.len();
        out[..head].copy_from_slice(&first[a]);
        out[head..].copy_from_slice(&second[b]);
        Ok(())
    }

    /// Copies `data` into the view starting at `offset`.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let (first, second) = self.pieces_mut();
        let (a, b) = split_span(first.len(), second.len(), offset, data.len())?;
        let head = a.len();
        first[a].copy_from_slice(&data[..head]);
        second[b].copy_from_slice(&data[head..]);
        Ok(())
    }

    pub fn write_cell(&mut self, offset: usize, cell: &SysVal) -> Result<()> {
        self.write_at(offset, cell)
    }

    pub fn fill(&mut self, byte: u8) {
        let (first, second) = self.pieces_mut();
        first.fill(byte);
        second.fill(byte);
    }
}

/// Splits `offset..offset + len` of a two-piece view into the part held by
/// the first piece and the part held by the second.
fn split_span(
    first_len: usize,
    second_len: usize,
    offset: usize,
    len: usize,
) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let total = first_len + second_len;
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= total)
        .ok_or(EdfError::RangeOutOfBounds {
            start: offset as u64,
            end: offset as u64 + len as u64,
            len: total as u64,
        })?;
    let a = offset.min(first_len)..end.min(first_len);
    let b = offset.saturating_sub(first_len)..end.saturating_sub(first_len);
    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_within_one_segment() {
        let r = Range::new(100, 200, 4096);
        assert_eq!(r.segment_start, 0);
        assert_eq!(r.segment_end, 0);
        assert_eq!(r.byte_start, 100);
        assert_eq!(r.byte_end, 200);
        assert_eq!(r.len(), 100);
        assert!(!r.is_split());
    }

    #[test]
    fn test_range_ending_on_boundary_stays_in_segment() {
        let r = Range::new(4000, 4096, 4096);
        assert_eq!(r.segment_end, 0);
        assert_eq!(r.byte_end, 4096);
        assert_eq!(r.segment_span(), 1);
    }

    #[test]
    fn test_range_straddling_boundary() {
        let r = Range::new(4092, 4100, 4096);
        assert_eq!(r.segment_start, 0);
        assert_eq!(r.segment_end, 1);
        assert_eq!(r.byte_start, 4092);
        assert_eq!(r.byte_end, 4);
        assert!(r.is_split());
    }

    #[test]
    fn test_empty_range() {
        let r = Range::new(8192, 8192, 4096);
        assert!(r.is_empty());
        assert_eq!(r.segment_start, 2);
        assert_eq!(r.segment_end, 2);
    }

    #[test]
    fn test_split_view_reads_across_pieces() {
        let first = [1u8, 2, 3, 4];
        let second = [5u8, 6, 7, 8, 9, 10];
        let view = RangeView::Split(&first, &second);
        assert_eq!(view.len(), 10);

        let cell = view.read_cell(1).unwrap();
        assert_eq!(cell, [2, 3, 4, 5, 6, 7, 8, 9]);

        let mut tail = [0u8; 2];
        view.read_at(8, &mut tail).unwrap();
        assert_eq!(tail, [9, 10]);

        assert_eq!(view.to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_split_view_writes_across_pieces() {
        let mut first = [0u8; 3];
        let mut second = [0u8; 7];
        {
            let mut view = RangeViewMut::Split(&mut first, &mut second);
            view.write_cell(1, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        }
        assert_eq!(first, [0, 1, 2]);
        assert_eq!(second, [3, 4, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn test_view_bounds_are_checked() {
        let bytes = [0u8; 8];
        let view = RangeView::Contiguous(&bytes);
        assert!(matches!(
            view.read_cell(1),
            Err(EdfError::RangeOutOfBounds { .. })
        ));

        let mut bytes = [0u8; 8];
        let mut view = RangeViewMut::Contiguous(&mut bytes);
        assert!(view.write_at(6, &[1, 2, 3]).is_err());
        assert!(view.write_at(5, &[1, 2, 3]).is_ok());
    }
}
