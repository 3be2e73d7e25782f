//! A short chat session against a local echo backend.
//!
//! Runs a few turns through a small budget so the sliding window visibly
//! evicts, then saves the session to disk and loads it back.
//!
//! Set `RUST_LOG=chatlog=debug` to see eviction events.

use std::sync::Arc;

use chatlog::{
    BoxError, BudgetConfig, CompletionBackend, HeuristicTokenizer, HistoryBuffer, RawMessage,
    SnapshotStore, WildcardValue,
};
use tracing_subscriber::EnvFilter;

/// Answers every request by repeating the last user message.
struct EchoBackend;

impl CompletionBackend for EchoBackend {
    async fn complete(&self, request: Vec<RawMessage>) -> Result<String, BoxError> {
        let last = request
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or("no user message in request")?;
        Ok(format!("You said: {}", last.content))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tokenizer = Arc::new(HeuristicTokenizer::new());
    let config = BudgetConfig::preset("gpt-4_small")
        .ok_or_else(|| anyhow::anyhow!("unknown preset"))?
        .with_max_model_tokens(1600)
        .with_max_messages(4);

    let mut buffer = HistoryBuffer::with_config(tokenizer.clone(), config)?;
    buffer.register_wildcard("name", WildcardValue::text("Ada"), "The user's name")?;
    buffer.set_preamble("You are a helpful assistant talking to {name}. It is {date}.")?;

    for question in [
        "What is ownership?",
        "And borrowing?",
        "How do lifetimes fit in?",
        "Can you summarize all of that?",
    ] {
        let reply = buffer.exchange(question, &EchoBackend).await?;
        println!("> {question}\n{}", reply.content());
    }

    let stats = buffer.stats();
    println!(
        "\nfull log: {}, window: {} ({} tokens of {}), evicted: {}",
        stats.full_len,
        stats.window_len,
        stats.window_tokens,
        stats.max_chat_tokens,
        stats.evicted_count
    );

    let folder = std::env::temp_dir().join("chatlog_saves");
    let store = SnapshotStore::new(&folder);
    store.save("demo", &buffer, true)?;

    let restored = store.load("demo", tokenizer)?;
    println!("restored {} from {}", restored.id(), folder.display());
    for message in restored.finalized_sequence()? {
        println!("  [{}] {}", message.role, message.content);
    }

    Ok(())
}
