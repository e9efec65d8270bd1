use super::ServerState;
use crate::core::message::{build_history, Message};
use crate::core::providers::{ConfigurationError, ProviderRequest, ResolveSessionError};
use crate::core::relay::{join_controller, start_relay};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

impl ChatBody {
    fn provider_request(&self) -> ProviderRequest {
        ProviderRequest {
            provider: self.provider.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model_id.clone(),
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn chat(State(state): State<ServerState>, Json(body): Json<ChatBody>) -> Response {
    if body.messages.is_empty() {
        return plain(StatusCode::BAD_REQUEST, ConfigurationError::empty_conversation().to_string());
    }

    let request = body.provider_request();
    let auth = state.auth.clone();
    // Keyring lookups block.
    let resolved = tokio::task::spawn_blocking(move || auth.resolve(&request)).await;
    let model = match resolved {
        Ok(Ok(model)) => model,
        Ok(Err(ResolveSessionError::Provider(err))) => {
            debug!(error = %err, "rejecting chat request");
            return plain(StatusCode::BAD_REQUEST, err.to_string());
        }
        Ok(Err(ResolveSessionError::Source(err))) => {
            error!(error = %err, "credential lookup failed");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
        Err(err) => {
            error!(error = %err, "credential lookup task failed");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    let config = state.auth.config();
    let history = build_history(config.system_prompt.as_deref(), body.messages);
    let handle = match start_relay(state.backend.clone(), history, model, config.relay_settings()).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(error = %err, "initial segment request failed");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    let (stream, _counter, task) = handle.into_parts();
    tokio::spawn(async move {
        match join_controller(task).await {
            Ok(report) => debug!(switches = report.switches, bytes = report.bytes, "chat response complete"),
            Err(err) if err.is_cancelled() => debug!("client disconnected before the response finished"),
            Err(err) => warn!(error = %err, "chat response ended with an error"),
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

fn plain(status: StatusCode, message: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}
