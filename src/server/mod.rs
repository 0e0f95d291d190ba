//! Server module for drawpile-srv
//!
//! Contains the server initialization and runtime logic.
//!
//! # Module Structure
//!
//! - `config`: Application configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Startup configuration checks
//! - `init`: Store setup, session server and admin API startup, run loop

pub mod config;
mod init;
mod loader;
mod validation;

// Re-export public API
pub use init::run;
pub use loader::load_config;
