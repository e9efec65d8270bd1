//! Shared constants used across the relay

/// Continuation hand-offs permitted per session after the initial segment.
pub const MAX_RESPONSE_SEGMENTS: u32 = 2;

/// Per-segment generation budget passed to the backend.
pub const MAX_TOKENS: u32 = 8192;

/// User turn injected after a length-truncated assistant partial.
pub const CONTINUE_PROMPT: &str = "Continue your prior response. IMPORTANT: Immediately begin from where you left off without any interruptions. Do not repeat any content, including artifact and action tags.";

/// Chunks that may wait for a slow consumer before forwarding pauses.
pub const OUTPUT_BUFFER_CHUNKS: usize = 32;

/// Events a backend may queue ahead of the relay for a single segment.
pub const SEGMENT_BUFFER_EVENTS: usize = 32;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

pub const DEFAULT_PROVIDER: &str = "anthropic";
