//! Provider-specific authentication headers for outgoing requests.

use crate::core::providers::AuthMode;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Add the headers `auth_mode` expects:
/// - Anthropic: `x-api-key` plus `anthropic-version`
/// - everything else: `Authorization: Bearer`
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    auth_mode: AuthMode,
    api_key: &str,
) -> reqwest::RequestBuilder {
    match auth_mode {
        AuthMode::Anthropic => request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION),
        AuthMode::OpenAi => request.header("Authorization", format!("Bearer {api_key}")),
    }
}
