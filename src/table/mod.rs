mod attribute;
mod dictionary;
mod table;

pub use attribute::{Attribute, AttributeKind};
pub use dictionary::Dictionary;
pub use table::{AttributeSpec, Table};
