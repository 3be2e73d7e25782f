//! Bounded, token-budgeted conversation history for turn-based exchanges with
//! a language model.
//!
//! A [`HistoryBuffer`] keeps every message ever appended, and a sliding window
//! of the newest messages that fits within a token budget derived from the
//! model window, the completion reserve, a safety padding and the cost of the
//! expanded system preamble. The window is also capped by message count.
//! Buffers can be snapshotted to JSON and restored with strict validation.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use chatlog::{BudgetConfig, HeuristicTokenizer, HistoryBuffer, Role, SnapshotStore};
//!
//! let mut buffer = HistoryBuffer::with_config(
//!     Arc::new(HeuristicTokenizer::new()),
//!     BudgetConfig::preset("gpt-4_default").unwrap(),
//! )?;
//! buffer.set_preamble("You are a helpful assistant. The time is {date}.")?;
//! buffer.append((Role::User, "Tell me about the weather."))?;
//!
//! let request = buffer.finalized_sequence()?;
//! // ... send `request` to the model, then record the reply
//! buffer.push_assistant("It's sunny.")?;
//!
//! SnapshotStore::new("chat_log_saves").save("weather", &buffer, true)?;
//! ```

pub mod completion;
pub mod error;
pub mod history;
pub mod message;
pub mod preamble;
pub mod snapshot;
pub mod tokenizer;

pub use completion::{BoxError, CompletionBackend};
pub use error::{HistoryError, Result};
pub use history::{Budget, BudgetConfig, BufferState, BufferStats, HistoryBuffer, Order};
pub use message::{Message, MessageSource, RawMessage, Role};
pub use preamble::{PreambleExpander, Wildcard, WildcardValue};
pub use snapshot::{Snapshot, SnapshotCodec, SnapshotStore, WildcardKind, WildcardRecord};
pub use tokenizer::{HeuristicTokenizer, Tokenizer};
#[cfg(feature = "tiktoken")]
pub use tokenizer::TiktokenTokenizer;
