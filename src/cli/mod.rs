//! Command-line interface for inbound.

mod commands;
pub mod icons;

pub use commands::{is_verbose, run};
