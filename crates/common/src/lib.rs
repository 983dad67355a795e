pub mod config;
pub mod error;
pub mod serde_utils;
pub mod types;
