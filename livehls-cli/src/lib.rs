pub mod cli;
pub mod config;
pub mod edge;
pub mod error;
pub mod play;

pub use error::{AppError, Result};
