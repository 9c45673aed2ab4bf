use rand::Rng;
use tracing::debug;

use crate::common::{
    EdfError, Result, SortDirection, SysVal, CELL_SIZE, FIXED_THREAD_ID, MAX_EXTENT_PAGES,
};
use crate::storage::codec::{order_preserving_key, pack_f64, unpack_f64};
use crate::storage::edf::{EdfFile, Range};

use super::radix::sorted_order;

/// Fixed-width rows of 8-byte cells laid out across FIXED extents.
///
/// Each extent holds `rows_per_extent` whole rows. Extents are only ever
/// appended, so a row index resolves to an extent by plain division.
///
/// ## Row layout
///
/// ```text
/// +---------+---------+-----+-----------+
/// | cell 0  | cell 1  | ... | cell n-1  |   n = column count
/// +---------+---------+-----+-----------+
///   8 bytes   8 bytes         8 bytes
/// ```
///
/// A row may straddle two mapped segments; every read and write goes
/// through [`crate::storage::RangeView`], which copies across the boundary.
pub struct RowStore {
    edf: EdfFile,
    cols: usize,
    row_size: usize,
    pages_per_extent: u64,
    rows_per_extent: usize,
    extents: Vec<Range>,
    rows: usize,
}

impl RowStore {
    /// Creates an empty store with `cols` cells per row. Nothing is
    /// allocated until the first row is added.
    pub fn new(edf: EdfFile, cols: usize) -> Result<Self> {
        let mut store = Self {
            edf,
            cols: 0,
            row_size: 0,
            pages_per_extent: 0,
            rows_per_extent: 0,
            extents: Vec::new(),
            rows: 0,
        };
        store.reshape(cols)?;
        Ok(store)
    }

    /// Changes the column count. Only possible while nothing is allocated.
    pub fn reshape(&mut self, cols: usize) -> Result<()> {
        if !self.extents.is_empty() || self.rows > 0 {
            return Err(EdfError::Schema(
                "cannot change the column count once rows are allocated".into(),
            ));
        }
        if cols == 0 {
            return Err(EdfError::Schema("a row needs at least one cell".into()));
        }
        let row_size = cols * CELL_SIZE;
        let (pages, rows) = extent_geometry(
            row_size,
            self.edf.page_size() as u64,
            self.edf.config().segment_pages(),
        )?;
        self.cols = cols;
        self.row_size = row_size;
        self.pages_per_extent = pages;
        self.rows_per_extent = rows;
        Ok(())
    }

    /// (columns, rows)
    pub fn size(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn rows_per_extent(&self) -> usize {
        self.rows_per_extent
    }

    pub fn pages_per_extent(&self) -> u64 {
        self.pages_per_extent
    }

    pub fn extent_count(&self) -> usize {
        self.extents.len()
    }

    /// Rows that fit in the extents allocated so far.
    pub fn capacity(&self) -> usize {
        self.extents.len() * self.rows_per_extent
    }

    pub fn edf(&self) -> &EdfFile {
        &self.edf
    }

    /// Gives back the underlying file.
    pub fn into_edf(self) -> EdfFile {
        self.edf
    }

    /// Requests one more extent from the allocator.
    pub fn extend_allocation(&mut self) -> Result<()> {
        let range = self.edf.alloc_pages(self.pages_per_extent, FIXED_THREAD_ID)?;
        self.edf.view_mut(&range)?.fill(0);
        self.extents.push(range);
        debug!(
            extents = self.extents.len(),
            start = range.start(),
            rows_per_extent = self.rows_per_extent,
            "allocated row extent"
        );
        Ok(())
    }

    /// Adds `count` zeroed rows, allocating extents as needed.
    pub fn extend_rows(&mut self, count: usize) -> Result<()> {
        let target = self.rows + count;
        while self.capacity() < target {
            self.extend_allocation()?;
        }
        self.rows = target;
        Ok(())
    }

    /// Appends one row of cells and returns its index.
    pub fn append_cells(&mut self, cells: &[SysVal]) -> Result<usize> {
        if cells.len() != self.cols {
            return Err(EdfError::Schema(format!(
                "row has {} cells, expected {}",
                cells.len(),
                self.cols
            )));
        }
        if self.rows == self.capacity() {
            self.extend_allocation()?;
        }
        let row = self.rows;
        let range = self.row_range(row)?;
        let mut view = self.edf.view_mut(&range)?;
        for (col, cell) in cells.iter().enumerate() {
            view.write_cell(col * CELL_SIZE, cell)?;
        }
        self.rows += 1;
        Ok(row)
    }

    /// Appends one row of floats and returns its index.
    pub fn append_row(&mut self, values: &[f64]) -> Result<usize> {
        let cells: Vec<SysVal> = values.iter().map(|&v| pack_f64(v)).collect();
        self.append_cells(&cells)
    }

    pub fn get_cell(&self, row: usize, col: usize) -> Result<SysVal> {
        let range = self.cell_range(row, col)?;
        self.edf.view(&range)?.read_cell(0)
    }

    pub fn set_cell(&mut self, row: usize, col: usize, cell: &SysVal) -> Result<()> {
        let range = self.cell_range(row, col)?;
        self.edf.view_mut(&range)?.write_cell(0, cell)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        Ok(unpack_f64(&self.get_cell(row, col)?))
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.set_cell(row, col, &pack_f64(value))
    }

    /// Copies out every cell of `row`.
    pub fn read_row(&self, row: usize) -> Result<Vec<SysVal>> {
        self.check_row(row)?;
        let bytes = self.edf.view(&self.row_range(row)?)?.to_vec();
        Ok(bytes.chunks_exact(CELL_SIZE).map(to_cell).collect())
    }

    pub fn write_row(&mut self, row: usize, cells: &[SysVal]) -> Result<()> {
        self.check_row(row)?;
        if cells.len() != self.cols {
            return Err(EdfError::Schema(format!(
                "row has {} cells, expected {}",
                cells.len(),
                self.cols
            )));
        }
        let range = self.row_range(row)?;
        let mut view = self.edf.view_mut(&range)?;
        for (col, cell) in cells.iter().enumerate() {
            view.write_cell(col * CELL_SIZE, cell)?;
        }
        Ok(())
    }

    /// Exchanges the contents of two rows.
    pub fn swap_rows(&mut self, a: usize, b: usize) -> Result<()> {
        let mut scratch = Vec::new();
        self.swap_rows_with(a, b, &mut scratch)
    }

    /// Fisher-Yates shuffle of every row.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let mut scratch = Vec::new();
        for i in 0..self.rows {
            let j = rng.gen_range(0..=i);
            self.swap_rows_with(i, j, &mut scratch)?;
        }
        Ok(())
    }

    /// `swap_rows` staging both rows in `scratch`, which is grown to two
    /// rows once and reused across calls.
    fn swap_rows_with(&mut self, a: usize, b: usize, scratch: &mut Vec<u8>) -> Result<()> {
        self.check_row(a)?;
        self.check_row(b)?;
        if a == b {
            return Ok(());
        }
        scratch.resize(2 * self.row_size, 0);
        let (row_a, row_b) = scratch.split_at_mut(self.row_size);
        let range_a = self.row_range(a)?;
        let range_b = self.row_range(b)?;

        self.edf.view(&range_a)?.read_at(0, row_a)?;
        self.edf.view(&range_b)?.read_at(0, row_b)?;
        self.edf.view_mut(&range_a)?.write_at(0, row_b)?;
        self.edf.view_mut(&range_b)?.write_at(0, row_a)
    }

    /// Calls `f` with each row index and the cells of `cols`, in row order,
    /// until it returns `Ok(false)`.
    pub fn map_over_rows<F>(&self, cols: &[usize], mut f: F) -> Result<()>
    where
        F: FnMut(usize, &[SysVal]) -> Result<bool>,
    {
        for &col in cols {
            self.check_col(col)?;
        }
        let mut row_bytes = vec![0u8; self.row_size];
        let mut cells = Vec::with_capacity(cols.len());
        for row in 0..self.rows {
            self.edf.view(&self.row_range(row)?)?.read_at(0, &mut row_bytes)?;
            cells.clear();
            cells.extend(
                cols.iter()
                    .map(|&col| to_cell(&row_bytes[col * CELL_SIZE..(col + 1) * CELL_SIZE])),
            );
            if !f(row, &cells)? {
                break;
            }
        }
        Ok(())
    }

    /// Reorders rows by the values of `cols`, the first column being the
    /// most significant.
    ///
    /// Rows with equal keys keep their relative order in both directions,
    /// but the sort makes no promise about columns outside `cols`.
    pub fn sort(&mut self, direction: SortDirection, cols: &[usize]) -> Result<()> {
        if cols.is_empty() {
            return Err(EdfError::Schema("sort needs at least one column".into()));
        }
        let key_len = cols.len() * CELL_SIZE;
        let mut keys = Vec::with_capacity(self.rows * key_len);
        self.map_over_rows(cols, |_, cells| {
            for cell in cells {
                keys.extend_from_slice(&order_preserving_key(unpack_f64(cell)));
            }
            Ok(true)
        })?;

        let initial: Vec<usize> = match direction {
            SortDirection::Ascending => (0..self.rows).collect(),
            SortDirection::Descending => (0..self.rows).rev().collect(),
        };
        let mut order = sorted_order(&keys, key_len, initial);
        if direction == SortDirection::Descending {
            order.reverse();
        }
        self.apply_permutation(&order)?;
        debug!(rows = self.rows, ?direction, ?cols, "sorted rows");
        Ok(())
    }

    /// Moves the row at `order[i]` to position `i`, following cycles.
    fn apply_permutation(&mut self, order: &[usize]) -> Result<()> {
        let mut visited = vec![false; order.len()];
        let mut scratch = Vec::new();
        for start in 0..order.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut current = start;
            loop {
                let next = order[current];
                if next == start {
                    break;
                }
                self.swap_rows_with(current, next, &mut scratch)?;
                visited[next] = true;
                current = next;
            }
        }
        Ok(())
    }

    /// Flushes the backing file.
    pub fn sync(&self) -> Result<()> {
        self.edf.sync()
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.rows {
            return Err(EdfError::RowOutOfRange {
                row,
                rows: self.rows,
            });
        }
        Ok(())
    }

    fn check_col(&self, col: usize) -> Result<()> {
        if col >= self.cols {
            return Err(EdfError::AttributeOutOfRange {
                index: col,
                count: self.cols,
            });
        }
        Ok(())
    }

    /// Byte span of `row`, which must lie within the allocated capacity.
    fn row_range(&self, row: usize) -> Result<Range> {
        let extent = self
            .extents
            .get(row / self.rows_per_extent)
            .ok_or(EdfError::RowOutOfRange {
                row,
                rows: self.capacity(),
            })?;
        let start = extent.start() + ((row % self.rows_per_extent) * self.row_size) as u64;
        self.edf.range(start, start + self.row_size as u64)
    }

    fn cell_range(&self, row: usize, col: usize) -> Result<Range> {
        self.check_row(row)?;
        self.check_col(col)?;
        let row_start = self.row_range(row)?.start();
        let start = row_start + (col * CELL_SIZE) as u64;
        self.edf.range(start, start + CELL_SIZE as u64)
    }
}

fn to_cell(bytes: &[u8]) -> SysVal {
    let mut cell = [0u8; CELL_SIZE];
    cell.copy_from_slice(bytes);
    cell
}

/// Picks the extent size, in pages, that wastes the fewest bytes on a
/// partial row. Returns (pages, rows per extent).
fn extent_geometry(row_size: usize, page_size: u64, segment_pages: u64) -> Result<(u64, usize)> {
    let row_size = row_size as u64;
    let min_pages = row_size.div_ceil(page_size).max(1);
    let max_pages = MAX_EXTENT_PAGES.min(segment_pages);
    if min_pages > max_pages {
        return Err(EdfError::Schema(format!(
            "a {}-byte row does not fit in an extent of {} pages",
            row_size, max_pages
        )));
    }

    let mut best = (min_pages, (min_pages * page_size) % row_size);
    for pages in min_pages..=max_pages {
        let waste = (pages * page_size) % row_size;
        if waste < best.1 {
            best = (pages, waste);
        }
        if waste == 0 {
            break;
        }
    }
    let (pages, _) = best;
    Ok((pages, ((pages * page_size) / row_size) as usize))
}
