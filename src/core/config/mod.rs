pub mod data;
pub mod defaults;
pub mod io;

pub use data::{Config, CustomProvider};
pub use io::ConfigError;
