//! MapManager - offline map dataset lifecycle
//!
//! This library keeps the datasets of an offline map service (map regions,
//! geocoder indices, postal databases) in sync with a remote manifest. It
//! tracks what is installed, what the user subscribed to and what the server
//! offers, downloads the difference one file at a time and reclaims storage
//! taken by files nothing refers to anymore.
//!
//! # Modules
//!
//! - [`catalog`] - durable registry of installed files and their versions
//! - [`feature`] - manifest records and the feature dependency graph
//! - [`manager`] - reconciliation, downloads, update checks, retention and the facade
//! - [`config`] - `config.ini` handling
//! - [`logging`] - tracing subscriber setup

pub mod catalog;
pub mod config;
pub mod feature;
pub mod logging;
pub mod manager;

mod fsutil;

pub use catalog::{CatalogEntry, CatalogError, CatalogStore};
pub use manager::{Manager, ManagerError, ManagerEvent, ManagerResult, ManagerSettings};
