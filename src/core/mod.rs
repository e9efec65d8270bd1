pub mod builtin_providers;
pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod keyring;
pub mod message;
pub mod providers;
pub mod relay;
