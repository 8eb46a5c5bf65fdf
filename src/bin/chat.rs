//! One-shot CLI driver for the chat synchronization core.
//!
//! Loads a conversation, auto-runs its initial exchange if one is pending,
//! otherwise submits the prompt given on the command line, and prints the
//! settled answer. Run with:
//! `CHATSYNC_API_KEY=... cargo run --bin chat -- <conversation-id> [prompt]`

use std::sync::Arc;

use anyhow::{bail, Context};

use chatsync::config::ChatConfig;
use chatsync::conversation::{ConversationBackend, ConversationCache, HttpConversationBackend};
use chatsync::provider::GeminiProvider;
use chatsync::sync::{ConversationSyncController, SendOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let conversation_id = args
        .next()
        .context("usage: chat <conversation-id> [prompt]")?;
    let prompt = args.next();

    let config = config_from_env();
    let provider = Arc::new(
        GeminiProvider::new(&config.provider).context("failed to build provider client")?,
    );
    let backend: Arc<dyn ConversationBackend> = Arc::new(
        HttpConversationBackend::new(&config.backend).context("failed to build backend client")?,
    );
    let cache = Arc::new(ConversationCache::new(Arc::clone(&backend)));

    let conversation = backend
        .fetch(&conversation_id)
        .await
        .context("failed to load conversation")?;
    cache.insert(conversation);

    let mut controller =
        ConversationSyncController::new(&conversation_id, Arc::clone(&cache), provider, backend);

    let outcome = match prompt {
        Some(text) => controller.submit(&text).await,
        None => controller.auto_run().await,
    };
    match outcome {
        SendOutcome::Settled => {}
        SendOutcome::Skipped => bail!("nothing to auto-run; pass a prompt"),
        SendOutcome::RejectedEmpty => bail!("prompt is empty"),
        SendOutcome::RejectedBusy => bail!("a cycle is already in flight"),
        SendOutcome::Failed => bail!("send cycle failed; see logs"),
    }

    let settled = cache
        .read(&conversation_id)
        .await
        .context("failed to refetch conversation")?;
    if let Some(conversation) = settled {
        if let Some(answer) = conversation.history.last() {
            println!("{}", answer.first_text());
        }
    }
    Ok(())
}

/// Build configuration from environment variables, falling back to defaults.
fn config_from_env() -> ChatConfig {
    let mut config = ChatConfig::new();
    if let Ok(key) = std::env::var("CHATSYNC_API_KEY") {
        config = config.with_api_key(key);
    }
    if let Ok(model) = std::env::var("CHATSYNC_MODEL") {
        config = config.with_model(model);
    }
    if let Ok(url) = std::env::var("CHATSYNC_BACKEND_URL") {
        config = config.with_backend_url(url);
    }
    config
}
