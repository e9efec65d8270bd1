use std::fmt;

#[derive(Debug)]
pub enum SettingError {
    UnknownKey(String),
    UnknownProvider { input: String },
    /// The value could not be parsed for this key.
    InvalidValue { key: &'static str, input: String },
    MissingArgs {
        hint: &'static str,
        example: &'static str,
    },
    /// Persisting the configuration failed.
    ConfigError(String),
}

impl SettingError {
    /// Print the error to stderr with the usual CLI decoration.
    pub fn print(&self) {
        match self {
            SettingError::UnknownKey(key) => {
                eprintln!("❌ Unknown config key: {key}");
            }
            SettingError::UnknownProvider { input } => {
                eprintln!(
                    "❌ Unknown provider: {input}. Run 'segrelay providers' to list available providers."
                );
            }
            SettingError::InvalidValue { key, input } => {
                eprintln!("❌ Invalid value for {key}: {input}");
            }
            SettingError::MissingArgs { hint, example } => {
                eprintln!("⚠️  {hint}");
                eprintln!("Example: {example}");
            }
            SettingError::ConfigError(msg) => {
                eprintln!("❌ Failed to save configuration: {msg}");
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(f, "Unknown config key: {key}"),
            SettingError::UnknownProvider { input } => write!(f, "Unknown provider: {input}"),
            SettingError::InvalidValue { key, input } => {
                write!(f, "Invalid value for {key}: {input}")
            }
            SettingError::MissingArgs { hint, .. } => write!(f, "{hint}"),
            SettingError::ConfigError(msg) => write!(f, "Config error: {msg}"),
        }
    }
}

impl std::error::Error for SettingError {}
