//! Integration tests for the row store

use edfgrid::common::{EdfConfig, EdfError, FIXED_THREAD_ID};
use edfgrid::storage::codec::pack_f64;
use edfgrid::storage::{EdfFile, RowStore};

fn store(cols: usize) -> RowStore {
    let config = EdfConfig::anonymous().with_page_size(4096);
    RowStore::new(EdfFile::anonymous(config).unwrap(), cols).unwrap()
}

fn fixed_extents(store: &RowStore) -> Vec<u32> {
    store
        .edf()
        .contents()
        .unwrap()
        .iter()
        .filter(|e| e.thread == FIXED_THREAD_ID)
        .map(|e| e.pages())
        .collect()
}

#[test]
fn test_appends_allocate_extents_on_demand() {
    let mut store = store(5);
    let per_extent = store.rows_per_extent();
    assert_eq!(per_extent, 512);

    for i in 0..per_extent {
        store.append_row(&[i as f64; 5]).unwrap();
    }
    assert_eq!(store.extent_count(), 1);

    store.append_row(&[0.0; 5]).unwrap();
    assert_eq!(store.extent_count(), 2);

    while store.rows() < 3 * per_extent + 1 {
        store.append_row(&[1.0; 5]).unwrap();
    }
    assert_eq!(store.extent_count(), 4);
    assert_eq!(store.capacity(), 4 * per_extent);
    assert_eq!(fixed_extents(&store), vec![5, 5, 5, 5]);
    assert_eq!(store.get(511, 4).unwrap(), 511.0);
}

#[test]
fn test_rows_straddling_segments() {
    // Two-page segments; three-column rows give two-page extents, the first
    // of which starts on an odd page and so crosses a segment boundary.
    let config = EdfConfig::anonymous()
        .with_page_size(4096)
        .with_segment_size(8192)
        .with_segment_count(64);
    let mut store = RowStore::new(EdfFile::anonymous(config).unwrap(), 3).unwrap();
    assert_eq!(store.pages_per_extent(), 2);
    assert_eq!(store.rows_per_extent(), 341);

    let rows = 1000;
    for i in 0..rows {
        let x = i as f64;
        store.append_row(&[x, -x, x * 0.5]).unwrap();
    }
    for i in 0..rows {
        let x = i as f64;
        assert_eq!(store.get(i, 0).unwrap(), x);
        assert_eq!(store.get(i, 1).unwrap(), -x);
        assert_eq!(store.get(i, 2).unwrap(), x * 0.5);
    }

    // Row 170 spans bytes 4080..4104 of the first extent
    store.set(170, 1, 42.0).unwrap();
    assert_eq!(store.get(170, 1).unwrap(), 42.0);
    assert_eq!(store.get(170, 0).unwrap(), 170.0);
    assert_eq!(store.get(170, 2).unwrap(), 85.0);

    store.swap_rows(170, 999).unwrap();
    assert_eq!(store.get(999, 1).unwrap(), 42.0);
    assert_eq!(store.get(170, 0).unwrap(), 999.0);
}

#[test]
fn test_random_access_out_of_range() {
    let mut store = store(2);
    assert!(matches!(
        store.get(0, 0),
        Err(EdfError::RowOutOfRange { row: 0, rows: 0 })
    ));
    store.append_row(&[1.0, 2.0]).unwrap();
    assert!(matches!(
        store.set(5, 0, 1.0),
        Err(EdfError::RowOutOfRange { row: 5, rows: 1 })
    ));
    assert!(matches!(
        store.get(0, 3),
        Err(EdfError::AttributeOutOfRange { index: 3, count: 2 })
    ));
    assert!(matches!(
        store.swap_rows(0, 1),
        Err(EdfError::RowOutOfRange { .. })
    ));
}

#[test]
fn test_extend_rows_zero_fills() {
    let mut store = store(4);
    store.append_row(&[9.0; 4]).unwrap();
    store.extend_rows(600).unwrap();
    assert_eq!(store.size(), (4, 601));
    // 32-byte rows pack a page exactly: 128 rows per one-page extent
    assert_eq!(store.rows_per_extent(), 128);
    assert_eq!(store.extent_count(), 5);
    assert_eq!(store.get(600, 3).unwrap(), 0.0);
    assert_eq!(store.read_row(0).unwrap(), vec![pack_f64(9.0); 4]);
}

#[test]
fn test_map_over_rows_projects_columns() {
    let mut store = store(3);
    for i in 0..5 {
        let x = i as f64;
        store.append_row(&[x, x * 10.0, x * 100.0]).unwrap();
    }

    let mut seen = Vec::new();
    store
        .map_over_rows(&[2, 0], |row, cells| {
            seen.push((row, cells.to_vec()));
            Ok(true)
        })
        .unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[3], (3, vec![pack_f64(300.0), pack_f64(3.0)]));

    assert!(matches!(
        store.map_over_rows(&[3], |_, _| Ok(true)),
        Err(EdfError::AttributeOutOfRange { .. })
    ));
}

#[test]
fn test_map_over_rows_propagates_errors() {
    let mut store = store(1);
    store.append_row(&[1.0]).unwrap();
    store.append_row(&[2.0]).unwrap();
    let result = store.map_over_rows(&[0], |row, _| {
        if row == 1 {
            Err(EdfError::Schema("stop".into()))
        } else {
            Ok(true)
        }
    });
    assert!(matches!(result, Err(EdfError::Schema(_))));
}
