//! # mihomo-panel
//!
//! A small HTTP control panel for a mihomo proxy service. It runs the reload
//! script and follows the service journal with output streamed live to the
//! browser, and edits a whitelisted set of keys in the service's env file.
//!
//! ## Modules
//!
//! - `app` - Configuration, logging and the server runtime
//! - `cli` - Command-line arguments
//! - `server` - Routes, authorization and HTTP handlers
//! - `settings` - The `KEY=VALUE` env file
//! - `subprocess` - Process runner abstraction and live output streaming
pub mod app;
pub mod cli;
pub mod error;
pub mod server;
pub mod settings;
pub mod subprocess;

pub use error::{Error, Result};
