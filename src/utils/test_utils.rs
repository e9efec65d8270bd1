use crate::core::config::io::CONFIG_PATH_ENV;
use crate::core::message::Message;
use crate::core::providers::{AuthMode, ModelConfig};
use crate::core::relay::{BackendError, FinishReason, GenerationBackend, SegmentSource};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch process environment variables and restores
/// every variable it changed when dropped.
pub struct TestEnvVarGuard {
    saved: Vec<(String, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl TestEnvVarGuard {
    pub fn new() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            saved: Vec::new(),
            _lock: lock,
        }
    }

    pub fn set_var(&mut self, key: &str, value: impl AsRef<std::ffi::OsStr>) {
        self.remember(key);
        std::env::set_var(key, value);
    }

    pub fn remove_var(&mut self, key: &str) {
        self.remember(key);
        std::env::remove_var(key);
    }

    fn remember(&mut self, key: &str) {
        if !self.saved.iter().any(|(saved, _)| saved == key) {
            self.saved.push((key.to_string(), std::env::var_os(key)));
        }
    }
}

impl Default for TestEnvVarGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestEnvVarGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Run `f` with the config file redirected into a fresh temp directory.
pub fn with_test_config_env<R>(f: impl FnOnce(&Path) -> R) -> R {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    let mut guard = TestEnvVarGuard::new();
    guard.set_var(CONFIG_PATH_ENV, &config_path);
    let result = f(&config_path);
    drop(guard);
    result
}

pub fn test_model_config() -> ModelConfig {
    ModelConfig {
        provider_id: "test".to_string(),
        provider_display_name: "Test".to_string(),
        api_key: "test-key".to_string(),
        base_url: "https://api.test.com".to_string(),
        auth_mode: AuthMode::OpenAi,
        model: "test-model".to_string(),
        max_tokens: 16,
    }
}

/// One scripted backend response.
#[derive(Clone, Debug)]
pub enum ScriptedSegment {
    Complete {
        chunks: Vec<String>,
        finish: FinishReason,
    },
    Fail {
        chunks: Vec<String>,
        error: BackendError,
    },
    /// Emits the chunks then waits until the relay stops it.
    Hang { chunks: Vec<String> },
    /// `generate` itself returns an error.
    Reject(BackendError),
}

impl ScriptedSegment {
    pub fn complete(chunks: &[&str], finish: FinishReason) -> Self {
        ScriptedSegment::Complete {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            finish,
        }
    }

    pub fn truncated(chunks: &[&str]) -> Self {
        Self::complete(chunks, FinishReason::Length)
    }

    pub fn hang(chunks: &[&str]) -> Self {
        ScriptedSegment::Hang {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// In-process [`GenerationBackend`] that plays back a fixed script and
/// records every history it was asked to continue and the endpoint used.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedSegment>>,
    calls: Mutex<Vec<Vec<Message>>>,
    base_urls: Mutex<Vec<String>>,
    chunks_sent: Arc<AtomicUsize>,
    stops_observed: Arc<AtomicUsize>,
    buffer: usize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptedSegment>) -> Self {
        Self::with_buffer(script, 4)
    }

    pub fn with_buffer(script: Vec<ScriptedSegment>, buffer: usize) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            base_urls: Mutex::new(Vec::new()),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
            stops_observed: Arc::new(AtomicUsize::new(0)),
            buffer,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn base_urls(&self) -> Vec<String> {
        self.base_urls
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }

    /// Chunks accepted by the relay so far, across all segments.
    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent.load(Ordering::SeqCst)
    }

    /// Producers that noticed a stop request before running out of script.
    pub fn stops_observed(&self) -> usize {
        self.stops_observed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        history: &[Message],
        config: &ModelConfig,
    ) -> Result<SegmentSource, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(history.to_vec());
        }
        if let Ok(mut urls) = self.base_urls.lock() {
            urls.push(config.base_url.clone());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .ok_or_else(|| BackendError::new("script exhausted"))?;

        let (chunks, tail) = match next {
            ScriptedSegment::Reject(err) => return Err(err),
            ScriptedSegment::Complete { chunks, finish } => (chunks, Tail::Finish(finish)),
            ScriptedSegment::Fail { chunks, error } => (chunks, Tail::Fail(error)),
            ScriptedSegment::Hang { chunks } => (chunks, Tail::Hang),
        };

        let (writer, source) = SegmentSource::channel(self.buffer);
        let sent = Arc::clone(&self.chunks_sent);
        let stops = Arc::clone(&self.stops_observed);
        tokio::spawn(async move {
            for chunk in chunks {
                if !writer.chunk(chunk).await {
                    stops.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                sent.fetch_add(1, Ordering::SeqCst);
            }
            match tail {
                Tail::Finish(reason) => writer.finish(reason).await,
                Tail::Fail(error) => writer.fail(error).await,
                Tail::Hang => {
                    writer.stopped().await;
                    stops.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        Ok(source)
    }
}

enum Tail {
    Finish(FinishReason),
    Fail(BackendError),
    Hang,
}
