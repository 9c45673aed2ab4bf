mod alloc;
mod file;
mod range;
mod thread;

pub use alloc::ContentEntry;
pub use file::EdfFile;
pub use range::{Range, RangeView, RangeViewMut};
pub use thread::Thread;
