use std::str::FromStr;

use tracing::warn;

use crate::core::config::data::Config;
use crate::core::constants::{
    CONTINUE_PROMPT, DEFAULT_LISTEN_ADDR, MAX_RESPONSE_SEGMENTS, MAX_TOKENS, OUTPUT_BUFFER_CHUNKS,
};
use crate::core::relay::RelaySettings;

pub const MAX_RESPONSE_SEGMENTS_ENV: &str = "SEGRELAY_MAX_RESPONSE_SEGMENTS";
pub const MAX_TOKENS_ENV: &str = "SEGRELAY_MAX_TOKENS";

impl Config {
    pub fn get_default_model(&self, provider: &str) -> Option<&String> {
        let normalized = provider.to_lowercase();
        self.default_models
            .get(&normalized)
            .or_else(|| self.default_models.get(provider))
    }

    pub fn set_default_model(&mut self, provider: String, model: String) {
        let normalized = provider.to_lowercase();
        self.default_models.insert(normalized.clone(), model);
        if normalized != provider {
            self.default_models.remove(&provider);
        }
    }

    pub fn unset_default_model(&mut self, provider: &str) {
        let normalized = provider.to_lowercase();
        self.default_models.remove(&normalized);
        if normalized != provider {
            self.default_models.remove(provider);
        }
    }

    /// Continuation budget: environment, then config file, then built-in default.
    pub fn effective_max_response_segments(&self) -> u32 {
        env_override(MAX_RESPONSE_SEGMENTS_ENV)
            .or(self.max_response_segments)
            .unwrap_or(MAX_RESPONSE_SEGMENTS)
    }

    pub fn effective_max_tokens(&self) -> u32 {
        env_override(MAX_TOKENS_ENV)
            .or(self.max_tokens)
            .filter(|tokens| *tokens > 0)
            .unwrap_or(MAX_TOKENS)
    }

    pub fn listen_addr(&self) -> &str {
        self.listen
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .unwrap_or(DEFAULT_LISTEN_ADDR)
    }

    /// Settings for one relay session. Sessions get their own copy so a
    /// config change never leaks into a response already in flight.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            max_response_segments: self.effective_max_response_segments(),
            continue_prompt: self
                .continue_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| CONTINUE_PROMPT.to_string()),
            output_buffer: OUTPUT_BUFFER_CHUNKS,
        }
    }
}

fn env_override<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
