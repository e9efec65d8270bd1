//! Settings management for `segrelay set` / `segrelay unset`.
//!
//! Each configuration key has a [`SettingHandler`]; the
//! [`SettingRegistry`] maps keys to handlers and fixes the display order.

pub mod error;
pub mod handlers;
pub mod registry;


pub use error::SettingError;
pub use registry::SettingRegistry;

use crate::core::config::data::Config;

/// Handles one configuration key.
pub trait SettingHandler: Send + Sync {
    fn key(&self) -> &'static str;

    /// Apply `args` (everything after the key). Returns the success message.
    fn set(&self, args: &[String], config: &Config) -> Result<String, SettingError>;

    /// Clear the value. `arg` is the optional word after the key, e.g. the
    /// provider for `default-model`.
    fn unset(&self, arg: Option<&str>, config: &Config) -> Result<String, SettingError>;

    /// One line for the `segrelay set` overview.
    fn format(&self, config: &Config) -> String;
}

/// Persist a change through [`Config::mutate`] and return `message`.
pub(crate) fn mutate_config_with_message<F>(f: F, message: String) -> Result<String, SettingError>
where
    F: FnOnce(&mut Config) -> Result<(), Box<dyn std::error::Error>>,
{
    Config::mutate(f)
        .map(|()| message)
        .map_err(|e| SettingError::ConfigError(e.to_string()))
}

pub(crate) fn success_set(key: &str, value: &str) -> String {
    format!("✅ Set {key} to: {value}")
}

pub(crate) fn success_unset(key: &str) -> String {
    format!("✅ Unset {key}")
}
