mod radix;
mod row_store;

pub use radix::sorted_order;
pub use row_store::RowStore;
