use crate::core::builtin_providers::load_builtin_providers;
use crate::core::config::Config;
use crate::core::constants::DEFAULT_PROVIDER;
use crate::core::keyring::KeyringAccessError;
use std::error::Error;
use std::fmt;
use tracing::warn;

/// Provider id that accepts any OpenAI-compatible endpoint given per request.
pub const CUSTOM_PROVIDER_ID: &str = "custom";

const QUICK_FIXES: &[&str] = &[
    "segrelay auth <provider>          # Store an API key in the system keyring",
    "segrelay providers                # Check provider status",
    "export ANTHROPIC_API_KEY=...      # Use the provider's environment variable",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// `Authorization: Bearer <key>`
    OpenAi,
    /// `x-api-key: <key>` plus `anthropic-version`
    Anthropic,
}

impl AuthMode {
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            Some(mode) if mode.eq_ignore_ascii_case("anthropic") => AuthMode::Anthropic,
            _ => AuthMode::OpenAi,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub auth_mode: AuthMode,
    pub env_key: Option<String>,
    pub default_model: String,
    pub requires_key: bool,
    /// Whether a per-request base URL may replace `base_url`. Off for
    /// hosted providers so server-held keys only go to their own endpoint.
    pub accepts_base_url: bool,
}

/// Catalogue entries: built-in providers first, then custom providers from
/// the config file. A custom entry with a built-in id replaces it.
pub fn provider_catalogue(config: &Config) -> Vec<ProviderMetadata> {
    let mut providers: Vec<ProviderMetadata> = load_builtin_providers()
        .into_iter()
        .filter(|builtin| config.get_custom_provider(&builtin.id).is_none())
        .map(|builtin| ProviderMetadata {
            auth_mode: AuthMode::from_mode(Some(builtin.auth_mode())),
            requires_key: builtin.requires_key(),
            accepts_base_url: builtin.accepts_base_url(),
            id: builtin.id,
            display_name: builtin.display_name,
            base_url: builtin.base_url,
            env_key: builtin.env_key,
            default_model: builtin.default_model,
        })
        .collect();

    providers.extend(config.list_custom_providers().into_iter().map(|custom| {
        ProviderMetadata {
            id: custom.id.to_lowercase(),
            display_name: custom.display_name.clone(),
            base_url: custom.base_url.clone(),
            auth_mode: AuthMode::from_mode(custom.mode.as_deref()),
            env_key: custom.env_key.clone(),
            default_model: custom
                .default_model
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            requires_key: true,
            accepts_base_url: true,
        }
    }));

    providers
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSession {
    pub api_key: String,
    pub base_url: String,
    pub provider_id: String,
    pub provider_display_name: String,
    pub auth_mode: AuthMode,
    pub default_model: String,
}

/// Everything a generation backend needs to issue one request.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub provider_id: String,
    pub provider_display_name: String,
    pub api_key: String,
    pub base_url: String,
    pub auth_mode: AuthMode,
    pub model: String,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn new(session: ProviderSession, model: String, max_tokens: u32) -> Self {
        Self {
            provider_id: session.provider_id,
            provider_display_name: session.provider_display_name,
            api_key: session.api_key,
            base_url: session.base_url,
            auth_mode: session.auth_mode,
            model,
            max_tokens,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider_id", &self.provider_id)
            .field("base_url", &self.base_url)
            .field("auth_mode", &self.auth_mode)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Caller-supplied overrides. Empty strings count as absent.
#[derive(Clone, Debug, Default)]
pub struct ProviderRequest {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// No usable credential or model configuration. Raised before any output
/// is streamed and never retried.
#[derive(Debug)]
pub struct ConfigurationError {
    message: String,
    quick_fixes: &'static [&'static str],
    exit_code: i32,
}

impl ConfigurationError {
    pub fn missing_credentials(provider: &str, env_key: Option<&str>) -> Self {
        let hint = env_key
            .map(|key| format!(" or set {key}"))
            .unwrap_or_default();
        Self::new(
            format!(
                "API key not provided for provider '{provider}'. Run 'segrelay auth {provider}'{hint}."
            ),
            QUICK_FIXES,
            2,
        )
    }

    pub fn unknown_provider(provider: &str) -> Self {
        Self::new(
            format!("Unsupported provider: '{provider}'. Run 'segrelay providers' to list known providers."),
            QUICK_FIXES,
            2,
        )
    }

    pub fn missing_base_url(provider: &str) -> Self {
        Self::new(
            format!("Base URL is required for provider '{provider}'."),
            &[],
            2,
        )
    }

    pub fn empty_conversation() -> Self {
        Self::new("Conversation has no messages.", &[], 1)
    }

    fn new(
        message: impl Into<String>,
        quick_fixes: &'static [&'static str],
        exit_code: i32,
    ) -> Self {
        Self {
            message: message.into(),
            quick_fixes,
            exit_code,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        self.quick_fixes
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ConfigurationError {}

#[derive(Debug)]
pub enum ResolveSessionError {
    Provider(ConfigurationError),
    Source(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for ResolveSessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveSessionError::Provider(err) => write!(f, "{err}"),
            ResolveSessionError::Source(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolveSessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolveSessionError::Provider(err) => Some(err),
            ResolveSessionError::Source(err) => Some(err.as_ref()),
        }
    }
}

pub trait ProviderAuthSource {
    fn uses_keyring(&self) -> bool;
    fn find_provider_metadata(&self, provider: &str) -> Option<ProviderMetadata>;
    fn get_stored_key(&self, provider: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>>;

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}

pub fn resolve_session<S: ProviderAuthSource + ?Sized>(
    source: &S,
    config: &Config,
    request: &ProviderRequest,
) -> Result<ProviderSession, ResolveSessionError> {
    let provider_id = non_empty(request.provider.as_deref())
        .or_else(|| non_empty(config.default_provider.as_deref()))
        .unwrap_or(DEFAULT_PROVIDER)
        .to_lowercase();
    let base_url_override = non_empty(request.base_url.as_deref());

    let metadata = if provider_id == CUSTOM_PROVIDER_ID {
        let base_url = base_url_override.ok_or_else(|| {
            ResolveSessionError::Provider(ConfigurationError::missing_base_url(&provider_id))
        })?;
        ProviderMetadata {
            id: CUSTOM_PROVIDER_ID.to_string(),
            display_name: "Custom".to_string(),
            base_url: base_url.to_string(),
            auth_mode: AuthMode::OpenAi,
            env_key: None,
            default_model: "default".to_string(),
            requires_key: true,
            accepts_base_url: true,
        }
    } else {
        source.find_provider_metadata(&provider_id).ok_or_else(|| {
            ResolveSessionError::Provider(ConfigurationError::unknown_provider(&provider_id))
        })?
    };

    let api_key = match non_empty(request.api_key.as_deref()) {
        Some(key) => key.to_string(),
        None => resolve_stored_or_env_key(source, &metadata)?,
    };

    let base_url = match base_url_override {
        Some(url) if metadata.accepts_base_url => url.to_string(),
        Some(_) => {
            warn!(
                provider = %metadata.id,
                "ignoring request base URL; provider only accepts its own endpoint"
            );
            metadata.base_url.clone()
        }
        None => metadata.base_url.clone(),
    };

    Ok(ProviderSession {
        api_key,
        base_url,
        provider_id: metadata.id.to_lowercase(),
        provider_display_name: metadata.display_name,
        auth_mode: metadata.auth_mode,
        default_model: metadata.default_model,
    })
}

/// Resolve the provider session and pick the model and token budget.
pub fn resolve_model_config<S: ProviderAuthSource + ?Sized>(
    source: &S,
    config: &Config,
    request: &ProviderRequest,
) -> Result<ModelConfig, ResolveSessionError> {
    let session = resolve_session(source, config, request)?;
    let model = non_empty(request.model.as_deref())
        .map(str::to_string)
        .or_else(|| config.get_default_model(&session.provider_id).cloned())
        .unwrap_or_else(|| session.default_model.clone());
    Ok(ModelConfig::new(session, model, config.effective_max_tokens()))
}

fn resolve_stored_or_env_key<S: ProviderAuthSource + ?Sized>(
    source: &S,
    metadata: &ProviderMetadata,
) -> Result<String, ResolveSessionError> {
    if source.uses_keyring() {
        let stored = match source.get_stored_key(&metadata.id) {
            Ok(stored) => stored,
            Err(err) => handle_keyring_failure(err, &metadata.id)?,
        };
        if let Some(key) = stored.filter(|key| !key.is_empty()) {
            return Ok(key);
        }
    }

    if let Some(key) = metadata
        .env_key
        .as_deref()
        .and_then(|env_key| source.env_var(env_key))
    {
        return Ok(key);
    }

    if !metadata.requires_key {
        // Keyless local servers still get a non-empty bearer value.
        return Ok(metadata.id.clone());
    }

    Err(ResolveSessionError::Provider(
        ConfigurationError::missing_credentials(&metadata.id, metadata.env_key.as_deref()),
    ))
}

fn handle_keyring_failure(
    err: Box<dyn Error + Send + Sync>,
    provider_name: &str,
) -> Result<Option<String>, ResolveSessionError> {
    match err.downcast::<KeyringAccessError>() {
        Ok(keyring_err) => {
            if keyring_err.is_recoverable() {
                warn!(
                    provider = provider_name,
                    error = %keyring_err,
                    "Unable to access stored credentials; falling back to environment variables"
                );
                Ok(None)
            } else {
                Err(ResolveSessionError::Source(keyring_err))
            }
        }
        Err(original_err) => Err(ResolveSessionError::Source(original_err)),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
