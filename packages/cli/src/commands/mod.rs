pub mod build;
pub mod combine;
pub mod history;
pub mod sanitize;
