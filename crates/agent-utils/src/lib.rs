//! Shared utilities for the stock analysis workspace
//!
//! Logging setup and configuration loading used by every crate and binary.

pub mod config;
pub mod logging;

pub use config::{Config, load_json_file};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
