//! Handlers for every `set`/`unset` key.

use super::error::SettingError;
use super::{mutate_config_with_message, success_set, success_unset, SettingHandler};
use crate::core::config::data::Config;
use crate::core::constants::{DEFAULT_LISTEN_ADDR, MAX_RESPONSE_SEGMENTS, MAX_TOKENS};
use crate::core::providers::provider_catalogue;

/// Resolve `input` to the canonical id of a built-in or custom provider.
pub fn validate_provider(config: &Config, input: &str) -> Result<String, SettingError> {
    provider_catalogue(config)
        .into_iter()
        .find(|provider| provider.id.eq_ignore_ascii_case(input.trim()))
        .map(|provider| provider.id)
        .ok_or_else(|| SettingError::UnknownProvider {
            input: input.to_string(),
        })
}

pub struct DefaultProviderHandler;

impl SettingHandler for DefaultProviderHandler {
    fn key(&self) -> &'static str {
        "default-provider"
    }

    fn set(&self, args: &[String], config: &Config) -> Result<String, SettingError> {
        if args.is_empty() {
            return Err(SettingError::MissingArgs {
                hint: "To set a default provider, specify the provider:",
                example: "segrelay set default-provider openai",
            });
        }

        let provider = validate_provider(config, &args.join(" "))?;
        let message = success_set("default-provider", &provider);
        mutate_config_with_message(
            move |config| {
                config.default_provider = Some(provider);
                Ok(())
            },
            message,
        )
    }

    fn unset(&self, _arg: Option<&str>, _config: &Config) -> Result<String, SettingError> {
        mutate_config_with_message(
            |config| {
                config.default_provider = None;
                Ok(())
            },
            success_unset("default-provider"),
        )
    }

    fn format(&self, config: &Config) -> String {
        match &config.default_provider {
            Some(provider) => format!("  default-provider: {provider}"),
            None => "  default-provider: (unset)".to_string(),
        }
    }
}

pub struct DefaultModelHandler;

impl SettingHandler for DefaultModelHandler {
    fn key(&self) -> &'static str {
        "default-model"
    }

    fn set(&self, args: &[String], config: &Config) -> Result<String, SettingError> {
        let [provider, model @ ..] = args else {
            return Err(missing_provider_model());
        };
        if model.is_empty() {
            return Err(missing_provider_model());
        }

        let provider = validate_provider(config, provider)?;
        let model = model.join(" ");
        let message = format!("✅ Set default-model for provider '{provider}' to: {model}");
        mutate_config_with_message(
            move |config| {
                config.set_default_model(provider, model);
                Ok(())
            },
            message,
        )
    }

    fn unset(&self, arg: Option<&str>, _config: &Config) -> Result<String, SettingError> {
        let Some(provider) = arg else {
            return Err(SettingError::MissingArgs {
                hint: "To unset a default model, specify the provider:",
                example: "segrelay unset default-model openai",
            });
        };
        let provider = provider.to_string();
        let message = format!("✅ Unset default-model for provider: {provider}");
        mutate_config_with_message(
            move |config| {
                config.unset_default_model(&provider);
                Ok(())
            },
            message,
        )
    }

    fn format(&self, config: &Config) -> String {
        if config.default_models.is_empty() {
            return "  default-model: (none set)".to_string();
        }
        let mut models: Vec<_> = config.default_models.iter().collect();
        models.sort();
        let mut out = "  default-model:".to_string();
        for (provider, model) in models {
            out.push_str(&format!("\n    {provider}: {model}"));
        }
        out
    }
}

fn missing_provider_model() -> SettingError {
    SettingError::MissingArgs {
        hint: "To set a default model, specify the provider and model:",
        example: "segrelay set default-model openai gpt-4o",
    }
}

/// A non-negative integer setting.
pub struct U32Handler {
    key: &'static str,
    example: &'static str,
    default: u32,
    min: u32,
    get: fn(&Config) -> Option<u32>,
    put: fn(&mut Config, Option<u32>),
}

pub fn max_response_segments_handler() -> U32Handler {
    U32Handler {
        key: "max-response-segments",
        example: "segrelay set max-response-segments 4",
        default: MAX_RESPONSE_SEGMENTS,
        min: 0,
        get: |config| config.max_response_segments,
        put: |config, value| config.max_response_segments = value,
    }
}

pub fn max_tokens_handler() -> U32Handler {
    U32Handler {
        key: "max-tokens",
        example: "segrelay set max-tokens 4096",
        default: MAX_TOKENS,
        min: 1,
        get: |config| config.max_tokens,
        put: |config, value| config.max_tokens = value,
    }
}

impl SettingHandler for U32Handler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], _config: &Config) -> Result<String, SettingError> {
        let [raw] = args else {
            return Err(SettingError::MissingArgs {
                hint: "Provide a single whole number:",
                example: self.example,
            });
        };
        let value = raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|value| *value >= self.min)
            .ok_or_else(|| SettingError::InvalidValue {
                key: self.key,
                input: raw.clone(),
            })?;

        let put = self.put;
        mutate_config_with_message(
            move |config| {
                put(config, Some(value));
                Ok(())
            },
            success_set(self.key, &value.to_string()),
        )
    }

    fn unset(&self, _arg: Option<&str>, _config: &Config) -> Result<String, SettingError> {
        let put = self.put;
        mutate_config_with_message(
            move |config| {
                put(config, None);
                Ok(())
            },
            format!("✅ Unset {} (will use default: {})", self.key, self.default),
        )
    }

    fn format(&self, config: &Config) -> String {
        match (self.get)(config) {
            Some(value) => format!("  {}: {value}", self.key),
            None => format!("  {}: (unset, default: {})", self.key, self.default),
        }
    }
}

/// A free-text setting.
pub struct StringHandler {
    key: &'static str,
    example: &'static str,
    default: Option<&'static str>,
    get: fn(&Config) -> Option<&str>,
    put: fn(&mut Config, Option<String>),
}

fn get_listen(config: &Config) -> Option<&str> {
    config.listen.as_deref()
}

fn get_system_prompt(config: &Config) -> Option<&str> {
    config.system_prompt.as_deref()
}

pub fn listen_handler() -> StringHandler {
    StringHandler {
        key: "listen",
        example: "segrelay set listen 0.0.0.0:8787",
        default: Some(DEFAULT_LISTEN_ADDR),
        get: get_listen,
        put: |config, value| config.listen = value,
    }
}

pub fn system_prompt_handler() -> StringHandler {
    StringHandler {
        key: "system-prompt",
        example: "segrelay set system-prompt \"You are a concise assistant.\"",
        default: None,
        get: get_system_prompt,
        put: |config, value| config.system_prompt = value,
    }
}

impl SettingHandler for StringHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], _config: &Config) -> Result<String, SettingError> {
        let value = args.join(" ");
        if value.trim().is_empty() {
            return Err(SettingError::MissingArgs {
                hint: "Provide a value:",
                example: self.example,
            });
        }

        let display = truncate_with_ellipsis(&value, 50);
        let put = self.put;
        mutate_config_with_message(
            move |config| {
                put(config, Some(value));
                Ok(())
            },
            success_set(self.key, &display),
        )
    }

    fn unset(&self, _arg: Option<&str>, _config: &Config) -> Result<String, SettingError> {
        let put = self.put;
        mutate_config_with_message(
            move |config| {
                put(config, None);
                Ok(())
            },
            success_unset(self.key),
        )
    }

    fn format(&self, config: &Config) -> String {
        match ((self.get)(config), self.default) {
            (Some(value), _) => format!(
                "  {}: {}",
                self.key,
                truncate_with_ellipsis(&value.replace('\n', " "), 50)
            ),
            (None, Some(default)) => format!("  {}: (unset, default: {default})", self.key),
            (None, None) => format!("  {}: (unset)", self.key),
        }
    }
}

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
