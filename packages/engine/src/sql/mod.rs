pub(crate) mod expr;
pub mod identifiers;
pub mod normalize;
pub mod pk;
pub(crate) mod scan;

pub use scan::split_statements;
