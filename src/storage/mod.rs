pub mod codec;
pub mod edf;
pub mod rows;

pub use edf::{ContentEntry, EdfFile, Range, RangeView, RangeViewMut, Thread};
pub use rows::RowStore;
