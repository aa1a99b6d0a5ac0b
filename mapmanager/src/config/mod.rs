//! Configuration file handling.
//!
//! - [`file`] - loading and saving `~/.mapmanager/config.ini`
//! - [`size`] - human readable byte sizes

mod file;
mod size;

pub use file::{
    config_directory, config_file_path, ConfigFile, ConfigFileError, DEFAULT_TIMEOUT_SECS,
};
pub use size::format_size;
