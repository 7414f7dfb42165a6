// rigtest Core - Domain Logic, Ports & Application Services
// NO infrastructure dependencies: processes and file formats live in infra crates

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
