pub mod filter;
pub mod history;
pub mod root;
