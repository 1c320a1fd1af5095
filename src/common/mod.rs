//! Common utilities shared between the CLI, the coordinator and targets

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
