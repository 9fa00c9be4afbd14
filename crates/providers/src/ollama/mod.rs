pub mod client;
pub mod config;
pub mod ndjson;

pub use client::OllamaClient;
pub use config::{FileConfig, OllamaConfig};
