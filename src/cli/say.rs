//! One-shot `say` command: relays a single prompt to stdout.

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tracing::debug;

use crate::auth::AuthManager;
use crate::core::chat_stream::ChatStreamBackend;
use crate::core::message::{build_history, Message};
use crate::core::providers::{ProviderRequest, ResolveSessionError};
use crate::core::relay::{join_controller, start_relay, RelayError, RelayStream};

pub async fn run_say(
    prompt: Vec<String>,
    provider: Option<String>,
    model: Option<String>,
    env_only: bool,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: segrelay say <prompt>");
        std::process::exit(1);
    }

    let auth_manager = AuthManager::load(!env_only)?;
    let request = ProviderRequest {
        provider,
        model,
        ..Default::default()
    };

    let model_config = match auth_manager.resolve(&request) {
        Ok(model_config) => model_config,
        Err(ResolveSessionError::Provider(provider_err)) => {
            eprintln!("{provider_err}");
            let fixes = provider_err.quick_fixes();
            if !fixes.is_empty() {
                eprintln!();
                eprintln!("💡 Quick fixes:");
                for fix in fixes {
                    eprintln!("  • {fix}");
                }
            }
            std::process::exit(provider_err.exit_code());
        }
        Err(ResolveSessionError::Source(source_err)) => {
            eprintln!("❌ Error: {source_err}");
            std::process::exit(1);
        }
    };

    let config = auth_manager.config();
    let history = build_history(config.system_prompt.as_deref(), vec![Message::user(prompt)]);
    let backend = Arc::new(ChatStreamBackend::new(reqwest::Client::new()));

    let handle = match start_relay(backend, history, model_config, config.relay_settings()).await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("❌ Error: {err}");
            std::process::exit(1);
        }
    };

    let (mut stream, _counter, task) = handle.into_parts();
    let mut stdout = io::stdout();
    if let Err(err) = write_stream(&mut stream, &mut stdout).await {
        eprintln!("\n\n❌ Error: {err}");
        std::process::exit(1);
    }
    println!();

    let report = join_controller(task).await?;
    debug!(
        switches = report.switches,
        segments = report.segments,
        finish_reason = %report.finish_reason,
        "say complete"
    );
    Ok(())
}

/// Copy relay chunks to `out` as they arrive. Returns the bytes written.
pub async fn write_stream<W: Write>(
    stream: &mut RelayStream,
    out: &mut W,
) -> Result<usize, Box<dyn Error>> {
    let mut written = 0;
    while let Some(item) = stream.recv().await {
        let chunk = item.map_err(|err: RelayError| -> Box<dyn Error> { Box::new(err) })?;
        out.write_all(chunk.as_bytes())?;
        out.flush()?;
        written += chunk.len();
    }
    Ok(written)
}
