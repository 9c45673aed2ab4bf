//! Edfgrid - memory-mapped tabular storage in Rust
//!
//! This crate stores tables of fixed-width numeric cells in an extensible
//! data file (EDF): a memory-mapped file that grows on demand inside one
//! up-front address-space reservation, so rows are read and written in place
//! without ever being copied into ordinary process memory.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): The EDF file and everything built on it
//!   - `EdfFile`: Maps the file, resolves byte ranges and grows the backing store
//!   - `Thread`: Named streams multiplexed inside one file (SYSTEM, FIXED, ...)
//!   - `ContentEntry`: Table-of-contents records driving page allocation
//!   - `RowStore`: Fixed-width rows addressed by (row, column), with radix sort
//!
//! - **Table Layer** (`table`): Typed columns over a row store
//!   - `Attribute`: Float, categorical, binary, string, identifier and timestamp columns
//!   - `Dictionary`: Shared interning pool for categorical and string values
//!   - `Table`: Append, iterate, sort, shuffle, decompose and render rows
//!
//! # Example
//!
//! ```rust,no_run
//! use edfgrid::common::{EdfConfig, SortDirection, UnmapMode};
//! use edfgrid::table::{Attribute, Table};
//!
//! let length = Attribute::float("petal length");
//! let species = Attribute::categorical("species");
//!
//! // Create a file-backed table
//! let mut table = Table::create(
//!     "iris.edf",
//!     vec![length.clone(), species.clone()],
//!     EdfConfig::host(),
//! )
//! .unwrap();
//! table.set_class_attribute(&species).unwrap();
//!
//! table.append_row_strings(&["4.7", "Iris-versicolor"]).unwrap();
//! table.append_row_strings(&["1.4", "Iris-setosa"]).unwrap();
//!
//! // Sort by petal length and print the result
//! table.sort(SortDirection::Ascending, &[length]).unwrap();
//! println!("{}", table);
//!
//! // Flush and release the mapping
//! table.unmap(UnmapMode::Sync).unwrap();
//! ```

pub mod common;
pub mod storage;
pub mod table;

// Re-export commonly used types at the crate root
pub use common::{EdfConfig, EdfError, OpenMode, PageId, Result, SortDirection, UnmapMode};
pub use storage::{EdfFile, RowStore};
pub use table::{Attribute, AttributeKind, AttributeSpec, Dictionary, Table};
