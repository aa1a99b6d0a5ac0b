//! CLI command implementations.

pub mod clean;
pub mod config;
pub mod countries;
pub mod list;
pub mod status;
pub mod sync;

mod common;
