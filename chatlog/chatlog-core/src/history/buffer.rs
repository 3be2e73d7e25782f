//! The budget-bounded conversation buffer.
//!
//! [`HistoryBuffer`] keeps two views of the conversation: the full log, which
//! is append-only and never evicted, and the sliding window, a suffix of the
//! full log that fits within both the token budget and the message-count
//! ceiling. The window is what gets sent to the model, prefixed by the
//! expanded preamble.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::{Budget, BudgetConfig, DEFAULT_MODEL};
use crate::error::{HistoryError, Result};
use crate::message::{Message, MessageSource, RawMessage, Role};
use crate::preamble::{PreambleExpander, WildcardValue};
use crate::tokenizer::Tokenizer;

/// Lifecycle of a buffer. Only `Ready` buffers accept messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferState {
    Unconfigured,
    Configured,
    Ready,
}

/// Iteration order for [`HistoryBuffer::messages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// A point-in-time summary of buffer counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub state: BufferState,
    pub full_len: usize,
    pub window_len: usize,
    pub window_tokens: usize,
    pub max_chat_tokens: i64,
    pub max_messages: Option<usize>,
    pub preamble_tokens: usize,
    pub evicted_count: usize,
}

/// Conversation history with a token-budgeted sliding window.
///
/// Mutating methods take `&mut self`, so a single buffer is never written
/// from two places at once. Separate buffers share nothing and can live on
/// different threads.
///
/// # Example
/// ```ignore
/// use std::sync::Arc;
/// use chatlog::{BudgetConfig, HeuristicTokenizer, HistoryBuffer, Role};
///
/// let mut buffer = HistoryBuffer::with_config(
///     Arc::new(HeuristicTokenizer::new()),
///     BudgetConfig::preset("gpt-4_default").unwrap(),
/// )?;
/// buffer.set_preamble("You are a helpful assistant. It is {date}.")?;
/// buffer.append((Role::User, "Tell me about the weather."))?;
/// let request = buffer.finalized_sequence()?;
/// ```
#[derive(Clone)]
pub struct HistoryBuffer {
    pub(crate) id: Uuid,
    pub(crate) tokenizer: Arc<dyn Tokenizer>,
    pub(crate) budget: Option<Budget>,
    pub(crate) expander: PreambleExpander,
    pub(crate) preamble_template: Option<String>,
    pub(crate) preamble_tokens: usize,
    pub(crate) max_chat_tokens: i64,
    pub(crate) full_log: Vec<Message>,
    /// Index into `full_log` where the sliding window begins.
    pub(crate) window_start: usize,
    pub(crate) window_tokens: usize,
    pub(crate) evicted_count: usize,
}

impl HistoryBuffer {
    /// Create an unconfigured buffer.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tokenizer,
            budget: None,
            expander: PreambleExpander::new(),
            preamble_template: None,
            preamble_tokens: 0,
            max_chat_tokens: 0,
            full_log: Vec::new(),
            window_start: 0,
            window_tokens: 0,
            evicted_count: 0,
        }
    }

    /// Create a buffer and apply `config` straight away.
    pub fn with_config(tokenizer: Arc<dyn Tokenizer>, config: BudgetConfig) -> Result<Self> {
        let mut buffer = Self::new(tokenizer);
        buffer.configure(config)?;
        Ok(buffer)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> BufferState {
        match (&self.budget, &self.preamble_template) {
            (None, _) => BufferState::Unconfigured,
            (Some(_), None) => BufferState::Configured,
            (Some(_), Some(_)) => BufferState::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BufferState::Ready
    }

    pub fn budget(&self) -> Option<&Budget> {
        self.budget.as_ref()
    }

    pub fn model_id(&self) -> &str {
        self.budget
            .as_ref()
            .map_or(DEFAULT_MODEL, |budget| budget.model_id.as_str())
    }

    pub fn max_chat_tokens(&self) -> i64 {
        self.max_chat_tokens
    }

    pub fn preamble_template(&self) -> Option<&str> {
        self.preamble_template.as_deref()
    }

    pub fn preamble_tokens(&self) -> usize {
        self.preamble_tokens
    }

    pub fn expander(&self) -> &PreambleExpander {
        &self.expander
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Every message ever appended, oldest first.
    pub fn full_log(&self) -> &[Message] {
        &self.full_log
    }

    /// The sliding window, oldest first.
    pub fn window(&self) -> &[Message] {
        &self.full_log[self.window_start..]
    }

    pub fn window_tokens(&self) -> usize {
        self.window_tokens
    }

    pub fn evicted_count(&self) -> usize {
        self.evicted_count
    }

    /// Apply budget parameters.
    ///
    /// On a buffer that already has a preamble, the preamble cost is
    /// recomputed for the (possibly new) model and the window is evicted
    /// against the new budget. Nothing changes if validation fails.
    pub fn configure(&mut self, config: BudgetConfig) -> Result<()> {
        let budget = Budget::try_from(config)?;

        let preamble_tokens = match &self.preamble_template {
            Some(template) => self.count_preamble(&budget.model_id, template)?,
            None => 0,
        };

        self.max_chat_tokens = budget.max_chat_tokens(preamble_tokens);
        self.preamble_tokens = preamble_tokens;
        self.budget = Some(budget);

        tracing::debug!(
            buffer = %self.id,
            max_chat_tokens = self.max_chat_tokens,
            "budget configured"
        );

        self.evict();
        Ok(())
    }

    /// Set the preamble template, recompute the chat budget and evict.
    ///
    /// The template is expanded once here to measure its cost. An empty
    /// template, or one that references an unknown wildcard, is rejected and
    /// leaves the buffer untouched. A more expensive preamble shrinks `max_chat_tokens` and may
    /// evict messages immediately.
    pub fn set_preamble(&mut self, template: impl Into<String>) -> Result<()> {
        let template = template.into();
        let Some(budget) = &self.budget else {
            return Err(HistoryError::Configuration(
                "budget parameters must be configured before the preamble is set".into(),
            ));
        };
        if template.is_empty() {
            return Err(HistoryError::Configuration(
                "preamble template must not be empty".into(),
            ));
        }

        let preamble_tokens = self.count_preamble(&budget.model_id, &template)?;
        self.max_chat_tokens = budget.max_chat_tokens(preamble_tokens);
        self.preamble_tokens = preamble_tokens;
        self.preamble_template = Some(template);

        tracing::debug!(
            buffer = %self.id,
            preamble_tokens,
            max_chat_tokens = self.max_chat_tokens,
            "preamble set"
        );

        self.evict();
        Ok(())
    }

    /// Register a wildcard on this buffer's expander.
    ///
    /// When a preamble is already set its cost is re-measured, since the new
    /// value may change the expanded length.
    pub fn register_wildcard(
        &mut self,
        name: impl Into<String>,
        value: WildcardValue,
        description: impl Into<String>,
    ) -> Result<()> {
        let mut expander = self.expander.clone();
        expander.register(name, value, description)?;

        if let (Some(budget), Some(template)) = (&self.budget, &self.preamble_template) {
            let expanded = expander.expand(template)?;
            let preamble_tokens = self.tokenizer.count_tokens(&budget.model_id, &expanded);
            self.max_chat_tokens = budget.max_chat_tokens(preamble_tokens);
            self.preamble_tokens = preamble_tokens;
            self.expander = expander;
            self.evict();
        } else {
            self.expander = expander;
        }
        Ok(())
    }

    /// Append a message and evict until the window fits again.
    pub fn append(&mut self, source: impl Into<MessageSource>) -> Result<()> {
        self.ensure_ready("append")?;

        let message = source
            .into()
            .into_message(self.model_id(), self.tokenizer.as_ref())?;

        self.window_tokens += message.token_cost();
        self.full_log.push(message);
        self.evict();
        Ok(())
    }

    /// Append several messages in order, stopping at the first failure.
    pub fn extend<I, S>(&mut self, sources: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<MessageSource>,
    {
        for source in sources {
            self.append(source)?;
        }
        Ok(())
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<()> {
        self.append((Role::User, content.into()))
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> Result<()> {
        self.append((Role::Assistant, content.into()))
    }

    /// Drop the oldest window messages until both limits hold.
    ///
    /// The token pass runs first, then the count pass. Each reads only the
    /// buffer's own fields. Returns how many messages were evicted.
    pub fn evict(&mut self) -> usize {
        let before = self.evicted_count;

        while self.window_tokens as i64 > self.max_chat_tokens {
            if self.pop_oldest().is_none() {
                break;
            }
        }

        if let Some(max_messages) = self.budget.as_ref().map(|b| b.max_messages) {
            while self.window().len() > max_messages {
                if self.pop_oldest().is_none() {
                    break;
                }
            }
        }

        let evicted = self.evicted_count - before;
        if evicted > 0 {
            tracing::debug!(
                buffer = %self.id,
                evicted,
                window_len = self.window().len(),
                window_tokens = self.window_tokens,
                max_chat_tokens = self.max_chat_tokens,
                "evicted messages from window"
            );
        }
        evicted
    }

    /// The expanded preamble as a system entry followed by the window.
    ///
    /// Wildcards are re-evaluated on every call.
    pub fn finalized_sequence(&self) -> Result<Vec<RawMessage>> {
        self.ensure_ready("finalize")?;
        let template = self.preamble_template.as_deref().unwrap_or_default();

        let mut sequence = Vec::with_capacity(self.window().len() + 1);
        sequence.push(RawMessage::new(
            Role::System.as_str(),
            self.expander.expand(template)?,
        ));
        sequence.extend(self.window().iter().map(Message::to_raw));
        Ok(sequence)
    }

    /// The most recent message with `role` from the full log.
    pub fn last_message(&self, role: Role) -> Option<&Message> {
        self.full_log.iter().rev().find(|m| m.role() == role)
    }

    /// Messages from the full log, optionally filtered by role and capped.
    pub fn messages(
        &self,
        role: Option<Role>,
        limit: Option<usize>,
        order: Order,
    ) -> Vec<&Message> {
        let matches = |m: &&Message| role.map_or(true, |r| m.role() == r);
        let limit = limit.unwrap_or(usize::MAX);

        match order {
            Order::NewestFirst => self.full_log.iter().rev().filter(matches).take(limit).collect(),
            Order::OldestFirst => self.full_log.iter().filter(matches).take(limit).collect(),
        }
    }

    /// Clear all messages and counters.
    ///
    /// With `clear_preamble`, the template is dropped too and a ready buffer
    /// falls back to `Configured`.
    pub fn reset(&mut self, clear_preamble: bool) {
        self.full_log.clear();
        self.window_start = 0;
        self.window_tokens = 0;
        self.evicted_count = 0;

        if clear_preamble {
            self.preamble_template = None;
            self.preamble_tokens = 0;
            self.max_chat_tokens = self
                .budget
                .as_ref()
                .map_or(0, |budget| budget.max_chat_tokens(0));
        }

        tracing::debug!(buffer = %self.id, clear_preamble, "buffer reset");
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            state: self.state(),
            full_len: self.full_log.len(),
            window_len: self.window().len(),
            window_tokens: self.window_tokens,
            max_chat_tokens: self.max_chat_tokens,
            max_messages: self.budget.as_ref().map(|b| b.max_messages),
            preamble_tokens: self.preamble_tokens,
            evicted_count: self.evicted_count,
        }
    }

    pub(crate) fn ensure_ready(&self, operation: &str) -> Result<()> {
        match self.state() {
            BufferState::Ready => Ok(()),
            state => Err(HistoryError::NotReady(format!(
                "cannot {operation} while {state:?}, a preamble must be set first"
            ))),
        }
    }

    fn count_preamble(&self, model_id: &str, template: &str) -> Result<usize> {
        let expanded = self.expander.expand(template)?;
        Ok(self.tokenizer.count_tokens(model_id, &expanded))
    }

    fn pop_oldest(&mut self) -> Option<usize> {
        let cost = self.full_log.get(self.window_start)?.token_cost();
        self.window_start += 1;
        self.window_tokens -= cost;
        self.evicted_count += 1;
        tracing::trace!(buffer = %self.id, cost, "evicted oldest window message");
        Some(cost)
    }
}

impl fmt::Debug for HistoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryBuffer")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("budget", &self.budget)
            .field("preamble_template", &self.preamble_template)
            .field("max_chat_tokens", &self.max_chat_tokens)
            .field("full_len", &self.full_log.len())
            .field("window_len", &self.window().len())
            .field("window_tokens", &self.window_tokens)
            .field("evicted_count", &self.evicted_count)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for HistoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, message) in self.full_log.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{message}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_words(_model_id: &str, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn config() -> BudgetConfig {
        BudgetConfig::new()
            .with_max_model_tokens(100)
            .with_max_completion_tokens(20)
            .with_token_padding(10)
            .with_max_messages(10)
    }

    fn ready_buffer() -> HistoryBuffer {
        let mut buffer = HistoryBuffer::with_config(Arc::new(count_words), config()).unwrap();
        buffer.set_preamble("You are a helpful AI assistant").unwrap();
        buffer
    }

    #[test]
    fn test_state_transitions() {
        let mut buffer = HistoryBuffer::new(Arc::new(count_words));
        assert_eq!(buffer.state(), BufferState::Unconfigured);

        assert!(matches!(
            buffer.set_preamble("too early"),
            Err(HistoryError::Configuration(_))
        ));

        buffer.configure(config()).unwrap();
        assert_eq!(buffer.state(), BufferState::Configured);

        buffer.set_preamble("one two three").unwrap();
        assert_eq!(buffer.state(), BufferState::Ready);
        assert_eq!(buffer.preamble_tokens(), 3);
        assert_eq!(buffer.max_chat_tokens(), 67);
    }

    #[test]
    fn test_append_requires_ready() {
        let mut buffer = HistoryBuffer::with_config(Arc::new(count_words), config()).unwrap();
        let err = buffer.push_user("hello").unwrap_err();
        assert!(matches!(err, HistoryError::NotReady(_)));
        assert!(buffer.full_log().is_empty());
        assert!(matches!(
            buffer.finalized_sequence(),
            Err(HistoryError::NotReady(_))
        ));
    }

    #[test]
    fn test_configure_requires_all_fields() {
        let mut buffer = HistoryBuffer::new(Arc::new(count_words));
        let err = buffer
            .configure(BudgetConfig::new().with_max_model_tokens(100))
            .unwrap_err();
        assert!(matches!(err, HistoryError::Configuration(_)));
        assert_eq!(buffer.state(), BufferState::Unconfigured);
    }

    #[test]
    fn test_append_invalid_role_leaves_buffer_untouched() {
        let mut buffer = ready_buffer();
        let err = buffer.append(RawMessage::new("robot", "beep")).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidRole(_)));
        assert!(buffer.full_log().is_empty());
        assert_eq!(buffer.window_tokens(), 0);
    }

    #[test]
    fn test_finalized_sequence_starts_with_preamble() {
        let mut buffer = ready_buffer();
        buffer.push_user("Hello, how are you?").unwrap();
        buffer.push_assistant("Fine, thanks.").unwrap();

        let sequence = buffer.finalized_sequence().unwrap();
        assert_eq!(
            sequence,
            vec![
                RawMessage::new("system", "You are a helpful AI assistant"),
                RawMessage::new("user", "Hello, how are you?"),
                RawMessage::new("assistant", "Fine, thanks."),
            ]
        );
    }

    #[test]
    fn test_last_message_by_role() {
        let mut buffer = ready_buffer();
        assert!(buffer.last_message(Role::User).is_none());

        buffer.push_user("first question").unwrap();
        buffer.push_assistant("first answer").unwrap();
        buffer.push_user("second question").unwrap();

        assert_eq!(
            buffer.last_message(Role::User).map(Message::content),
            Some("second question")
        );
        assert_eq!(
            buffer.last_message(Role::Assistant).map(Message::content),
            Some("first answer")
        );
        assert!(buffer.last_message(Role::System).is_none());
    }

    #[test]
    fn test_last_message_survives_eviction() {
        let mut buffer = ready_buffer();
        buffer.configure(config().with_max_messages(1)).unwrap();
        buffer.push_user("question").unwrap();
        buffer.push_assistant("answer").unwrap();

        assert_eq!(buffer.window().len(), 1);
        assert_eq!(
            buffer.last_message(Role::User).map(Message::content),
            Some("question")
        );
    }

    #[test]
    fn test_messages_query() {
        let mut buffer = ready_buffer();
        buffer
            .extend([
                (Role::User, "u1"),
                (Role::Assistant, "a1"),
                (Role::User, "u2"),
                (Role::Assistant, "a2"),
            ])
            .unwrap();

        let contents = |messages: Vec<&Message>| {
            messages.into_iter().map(|m| m.content().to_string()).collect::<Vec<_>>()
        };

        assert_eq!(
            contents(buffer.messages(None, None, Order::NewestFirst)),
            ["a2", "u2", "a1", "u1"]
        );
        assert_eq!(
            contents(buffer.messages(Some(Role::User), None, Order::OldestFirst)),
            ["u1", "u2"]
        );
        assert_eq!(
            contents(buffer.messages(Some(Role::Assistant), Some(1), Order::NewestFirst)),
            ["a2"]
        );
    }

    #[test]
    fn test_reset() {
        let mut buffer = ready_buffer();
        buffer.push_user("one two").unwrap();
        buffer.configure(config().with_max_messages(0)).unwrap();
        assert_eq!(buffer.evicted_count(), 1);

        buffer.reset(false);
        assert!(buffer.full_log().is_empty());
        assert!(buffer.window().is_empty());
        assert_eq!(buffer.window_tokens(), 0);
        assert_eq!(buffer.evicted_count(), 0);
        assert_eq!(buffer.state(), BufferState::Ready);

        buffer.reset(true);
        assert!(buffer.preamble_template().is_none());
        assert_eq!(buffer.state(), BufferState::Configured);
        assert_eq!(buffer.max_chat_tokens(), 70);
    }

    #[test]
    fn test_reset_unconfigured_stays_unconfigured() {
        let mut buffer = HistoryBuffer::new(Arc::new(count_words));
        buffer.reset(true);
        assert_eq!(buffer.state(), BufferState::Unconfigured);
    }

    #[test]
    fn test_undefined_wildcard_rejects_preamble() {
        let mut buffer = ready_buffer();
        let before = buffer.max_chat_tokens();
        let err = buffer.set_preamble("Hello {nobody}").unwrap_err();
        assert!(matches!(err, HistoryError::UndefinedWildcard { .. }));
        assert_eq!(buffer.preamble_template(), Some("You are a helpful AI assistant"));
        assert_eq!(buffer.max_chat_tokens(), before);
    }

    #[test]
    fn test_empty_preamble_rejected() {
        let mut buffer = HistoryBuffer::with_config(Arc::new(count_words), config()).unwrap();
        let err = buffer.set_preamble("").unwrap_err();
        assert!(matches!(err, HistoryError::Configuration(_)));
        assert_eq!(buffer.state(), BufferState::Configured);

        let mut buffer = ready_buffer();
        assert!(buffer.set_preamble("").is_err());
        assert_eq!(buffer.preamble_template(), Some("You are a helpful AI assistant"));
        assert_eq!(buffer.state(), BufferState::Ready);
    }

    #[test]
    fn test_register_wildcard_remeasures_preamble() {
        let mut buffer = HistoryBuffer::with_config(Arc::new(count_words), config()).unwrap();
        buffer
            .register_wildcard("persona", WildcardValue::text("a pirate"), "Persona")
            .unwrap();
        buffer.set_preamble("You are {persona}").unwrap();
        assert_eq!(buffer.preamble_tokens(), 4);

        buffer
            .register_wildcard(
                "persona",
                WildcardValue::text("a very talkative old pirate"),
                "Persona",
            )
            .unwrap();
        assert_eq!(buffer.preamble_tokens(), 7);
        assert_eq!(buffer.max_chat_tokens(), 63);
    }

    #[test]
    fn test_stats() {
        let mut buffer = ready_buffer();
        buffer.push_user("a b c").unwrap();
        let stats = buffer.stats();
        assert_eq!(stats.state, BufferState::Ready);
        assert_eq!(stats.full_len, 1);
        assert_eq!(stats.window_len, 1);
        assert_eq!(stats.window_tokens, 3);
        assert_eq!(stats.preamble_tokens, 6);
        assert_eq!(stats.max_chat_tokens, 64);
        assert_eq!(stats.max_messages, Some(10));
        assert_eq!(stats.evicted_count, 0);
    }

    #[test]
    fn test_display_lists_full_log() {
        let mut buffer = ready_buffer();
        buffer.push_user("hi").unwrap();
        buffer.push_assistant("hello").unwrap();
        assert_eq!(buffer.to_string(), "user: hi\nassistant: hello");
    }
}
