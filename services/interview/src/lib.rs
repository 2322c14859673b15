pub mod config;
pub mod console;
pub mod file_store;
pub mod speech;
