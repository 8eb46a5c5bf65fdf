//! Streaming model providers and the per-exchange session.

/// Gemini SSE streaming client.
pub mod gemini;
/// Provider trait, streaming session, and chunk stream.
pub mod session;

pub use gemini::GeminiProvider;
pub use session::{
    seed_turns, ChunkStream, HistoryTurn, ModelProvider, PromptPart, ProviderFuture,
    StreamRequest, StreamingSession,
};
