//! Storage infrastructure: configuration and image persistence.
//!
//! - `config` reads and writes the TOML configuration file from the
//!   platform-appropriate directory, with defaults on first run.
//! - `image_store` writes images received in image-range responses to the
//!   configured output directory.

pub mod config;
pub mod image_store;
