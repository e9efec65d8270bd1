//! Command-line parsing and dispatch.

pub mod provider_list;
pub mod say;
pub mod settings;


use std::error::Error;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::auth::AuthManager;
use crate::cli::provider_list::list_providers;
use crate::cli::say::run_say;
use crate::cli::settings::{SettingError, SettingRegistry};
use crate::core::chat_stream::ChatStreamBackend;
use crate::core::config::data::{path_display, Config};
use crate::server::{start_server, ServerState};
use crate::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "segrelay", version)]
#[command(about = "Relay chat completions past the provider's output token limit")]
#[command(
    long_about = "segrelay streams chat completions and, when a response is cut off at the \
token limit, transparently asks the model to continue, splicing the segments into one \
uninterrupted stream.\n\n\
Authentication:\n\
  Use 'segrelay auth <provider>' to store an API key in your system keyring,\n\
  or set the provider's environment variable (e.g. ANTHROPIC_API_KEY).\n\n\
Environment Variables:\n\
  SEGRELAY_CONFIG                  Alternate config file path\n\
  SEGRELAY_MAX_RESPONSE_SEGMENTS   Override max-response-segments\n\
  SEGRELAY_MAX_TOKENS              Override max-tokens\n\
  RUST_LOG                         Log filter (default: segrelay=info)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Provider to use
    #[arg(short = 'p', long, global = true, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Model to use
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Ignore the keyring and use environment variables only
    #[arg(long, global = true)]
    pub env_only: bool,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP relay (POST /api/chat)
    Serve {
        /// Address to listen on (default from config, then 127.0.0.1:8787)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// Send one prompt and stream the reply to stdout
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        prompt: Vec<String>,
    },
    /// List providers and their authentication status
    Providers,
    /// Store an API key for a provider in the system keyring (read from stdin)
    Auth { provider: String },
    /// Remove a provider's API key from the system keyring
    Deauth { provider: String },
    /// Set a configuration value, or show all values when no key is given
    Set {
        key: Option<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        key: String,
        /// Provider, for provider-keyed settings such as default-model
        value: Option<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.log.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let use_keyring = !args.env_only;

    match args.command {
        Commands::Serve { listen } => {
            let auth_manager = AuthManager::load(use_keyring)?;
            let listen = listen.unwrap_or_else(|| auth_manager.config().listen_addr().to_string());
            let backend = Arc::new(ChatStreamBackend::new(reqwest::Client::new()));
            start_server(ServerState::new(auth_manager, backend), &listen).await
        }
        Commands::Say { prompt } => run_say(prompt, args.provider, args.model, args.env_only).await,
        Commands::Providers => list_providers(args.env_only),
        Commands::Auth { provider } => {
            let auth_manager = AuthManager::load(use_keyring)?;
            let token = read_token(&provider)?;
            if let Err(e) = auth_manager.store_token(&provider, &token) {
                eprintln!("❌ Authentication failed: {e}");
                std::process::exit(1);
            }
            println!("✅ Stored API key for {provider}");
            Ok(())
        }
        Commands::Deauth { provider } => {
            let auth_manager = AuthManager::load(use_keyring)?;
            if let Err(e) = auth_manager.remove_token(&provider) {
                eprintln!("❌ Deauthentication failed: {e}");
                std::process::exit(1);
            }
            println!("✅ Removed API key for {provider}");
            Ok(())
        }
        Commands::Set { key, value } => {
            let config = Config::load()?;
            let registry = SettingRegistry::new();
            let Some(key) = key else {
                print_settings(&registry, &config)?;
                return Ok(());
            };
            let result = registry
                .get(&key)
                .ok_or_else(|| SettingError::UnknownKey(key.clone()))
                .and_then(|handler| handler.set(&value, &config));
            report_setting(result)
        }
        Commands::Unset { key, value } => {
            let config = Config::load()?;
            let registry = SettingRegistry::new();
            let result = registry
                .get(&key)
                .ok_or_else(|| SettingError::UnknownKey(key.clone()))
                .and_then(|handler| handler.unset(value.as_deref(), &config));
            report_setting(result)
        }
    }
}

fn report_setting(result: Result<String, SettingError>) -> Result<(), Box<dyn Error>> {
    match result {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(err) => {
            err.print();
            std::process::exit(err.exit_code());
        }
    }
}

fn print_settings(registry: &SettingRegistry, config: &Config) -> Result<(), Box<dyn Error>> {
    println!("Current configuration ({}):", path_display(Config::get_config_path()?));
    for key in registry.keys_display_order() {
        if let Some(handler) = registry.get(key) {
            println!("{}", handler.format(config));
        }
    }
    Ok(())
}

/// Read an API key from stdin, prompting when attached to a terminal.
fn read_token(provider: &str) -> Result<String, Box<dyn Error>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        print!("Enter API key for {provider}: ");
        io::stdout().flush()?;
    }
    let mut token = String::new();
    stdin.lock().read_line(&mut token)?;
    Ok(token.trim().to_string())
}
