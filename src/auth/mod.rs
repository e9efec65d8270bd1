use crate::core::config::data::Config;
use crate::core::keyring::KeyringStore;
use crate::core::providers::{
    provider_catalogue, resolve_model_config, ModelConfig, ProviderAuthSource, ProviderMetadata,
    ProviderRequest, ResolveSessionError,
};
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Mutex, OnceLock};
use tracing::debug;

/// Credential state of one catalogue entry, as shown by `segrelay providers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub env_key: Option<String>,
    pub has_stored_key: bool,
    pub has_env_key: bool,
    pub requires_key: bool,
}

impl ProviderStatus {
    pub fn is_ready(&self) -> bool {
        !self.requires_key || self.has_stored_key || self.has_env_key
    }
}

pub struct AuthManager {
    providers: Vec<ProviderMetadata>,
    config: Config,
    store: Option<KeyringStore>,
}

impl AuthManager {
    pub fn load(use_keyring: bool) -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        Ok(Self::new(config, use_keyring))
    }

    /// Build a manager over an already-loaded config. Pass `use_keyring =
    /// false` to resolve from request values and environment only.
    pub fn new(config: Config, use_keyring: bool) -> Self {
        Self {
            providers: provider_catalogue(&config),
            config,
            store: use_keyring.then(KeyringStore::default),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn providers(&self) -> &[ProviderMetadata] {
        &self.providers
    }

    pub fn find_provider(&self, name: &str) -> Option<&ProviderMetadata> {
        self.providers
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(name))
    }

    /// Resolve credentials and model for one request.
    pub fn resolve(&self, request: &ProviderRequest) -> Result<ModelConfig, ResolveSessionError> {
        resolve_model_config(self, &self.config, request)
    }

    fn keyring(&self) -> Result<&KeyringStore, Box<dyn Error>> {
        self.store
            .as_ref()
            .ok_or_else(|| "Keyring access is disabled (--env-only)".into())
    }

    pub fn store_token(&self, provider_name: &str, token: &str) -> Result<(), Box<dyn Error>> {
        let provider = self
            .find_provider(provider_name)
            .ok_or_else(|| format!("Unknown provider: {provider_name}"))?;
        let token = token.trim();
        if token.is_empty() {
            return Err("API key cannot be empty".into());
        }
        self.keyring()?.write(&provider.id, token)?;
        cache_token(&provider.id, Some(token.to_string()));
        Ok(())
    }

    /// Look up a stored key. Successful lookups are cached for the life of
    /// the process; failures are retried on the next call.
    pub fn get_token(
        &self,
        provider_name: &str,
    ) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let provider_name = provider_name.to_lowercase();
        if let Some(cached) = cached_token(&provider_name) {
            return Ok(cached);
        }

        debug!(provider = %provider_name, "looking up stored API key");
        match store.read(&provider_name) {
            Ok(token) => {
                cache_token(&provider_name, token.clone());
                Ok(token)
            }
            Err(err) => {
                debug!(provider = %provider_name, error = %err, "keyring lookup failed");
                Err(Box::new(err))
            }
        }
    }

    /// Remove a stored key. Removing a key that was never stored succeeds.
    pub fn remove_token(&self, provider_name: &str) -> Result<(), Box<dyn Error>> {
        let provider_name = provider_name.to_lowercase();
        self.keyring()?.delete(&provider_name)?;
        cache_token(&provider_name, None);
        Ok(())
    }

    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|provider| ProviderStatus {
                id: provider.id.clone(),
                display_name: provider.display_name.clone(),
                base_url: provider.base_url.clone(),
                env_key: provider.env_key.clone(),
                has_stored_key: self.get_token(&provider.id).ok().flatten().is_some(),
                has_env_key: provider
                    .env_key
                    .as_deref()
                    .and_then(|key| self.env_var(key))
                    .is_some(),
                requires_key: provider.requires_key,
            })
            .collect()
    }
}

fn cached_token(provider_name: &str) -> Option<Option<String>> {
    let cache = token_cache().lock().ok()?;
    cache.get(provider_name).cloned()
}

fn cache_token(provider_name: &str, token: Option<String>) {
    if let Ok(mut cache) = token_cache().lock() {
        cache.insert(provider_name.to_string(), token);
    }
}

fn token_cache() -> &'static Mutex<HashMap<String, Option<String>>> {
    static TOKEN_CACHE: OnceLock<Mutex<HashMap<String, Option<String>>>> = OnceLock::new();
    TOKEN_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

impl ProviderAuthSource for AuthManager {
    fn uses_keyring(&self) -> bool {
        self.store.is_some()
    }

    fn find_provider_metadata(&self, provider: &str) -> Option<ProviderMetadata> {
        self.find_provider(provider).cloned()
    }

    fn get_stored_key(&self, provider: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        self.get_token(provider)
    }
}
