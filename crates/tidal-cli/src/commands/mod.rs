pub mod cache;
pub mod common;
pub mod config;
pub mod conflicts;
pub mod records;
pub mod sync;
