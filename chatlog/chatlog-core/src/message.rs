//! Conversation messages with memoized token costs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::tokenizer::Tokenizer;

/// The speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(HistoryError::InvalidRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unvalidated role/content pair, as found on the wire or in a snapshot.
///
/// This is also the shape handed to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub role: String,
    pub content: String,
}

impl RawMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// An immutable message whose token cost was computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
    token_cost: usize,
}

impl Message {
    /// Build a message and tokenize its content for `model_id`.
    pub fn new(
        role: Role,
        content: impl Into<String>,
        model_id: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Self {
        let content = content.into();
        let token_cost = tokenizer.count_tokens(model_id, &content);
        Self {
            role,
            content,
            token_cost,
        }
    }

    /// Build a message from a raw pair, rejecting unknown roles.
    pub fn from_raw(
        raw: RawMessage,
        model_id: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Self, HistoryError> {
        let role = raw.role.parse::<Role>()?;
        Ok(Self::new(role, raw.content, model_id, tokenizer))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn token_cost(&self) -> usize {
        self.token_cost
    }

    /// The role/content pair without the memoized cost.
    pub fn to_raw(&self) -> RawMessage {
        RawMessage::new(self.role.as_str(), self.content.clone())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// Input accepted by [`HistoryBuffer::append`](crate::HistoryBuffer::append).
///
/// Either an already tokenized [`Message`], which is appended as-is, or a raw
/// pair that is validated and tokenized against the buffer's model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    Message(Message),
    Raw(RawMessage),
}

impl MessageSource {
    pub(crate) fn into_message(
        self,
        model_id: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Message, HistoryError> {
        match self {
            MessageSource::Message(message) => Ok(message),
            MessageSource::Raw(raw) => Message::from_raw(raw, model_id, tokenizer),
        }
    }
}

impl From<Message> for MessageSource {
    fn from(message: Message) -> Self {
        MessageSource::Message(message)
    }
}

impl From<RawMessage> for MessageSource {
    fn from(raw: RawMessage) -> Self {
        MessageSource::Raw(raw)
    }
}

impl<C> From<(Role, C)> for MessageSource
where
    C: Into<String>,
{
    fn from((role, content): (Role, C)) -> Self {
        MessageSource::Raw(RawMessage::new(role.as_str(), content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_words(_model_id: &str, text: &str) -> usize {
        text.split_whitespace().count()
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("system".parse::<Role>().unwrap(), Role::System);
        assert!(matches!(
            "narrator".parse::<Role>(),
            Err(HistoryError::InvalidRole(role)) if role == "narrator"
        ));
        // Roles are case sensitive on the wire
        assert!("User".parse::<Role>().is_err());
    }

    #[test]
    fn test_token_cost_is_memoized() {
        let message = Message::new(Role::User, "Hello, how are you?", "gpt-4", &count_words);
        assert_eq!(message.token_cost(), 4);
        assert_eq!(message.role(), Role::User);
        assert_eq!(message.content(), "Hello, how are you?");
    }

    #[test]
    fn test_from_raw_rejects_bad_role() {
        let raw = RawMessage::new("robot", "beep");
        let err = Message::from_raw(raw, "gpt-4", &count_words).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidRole(_)));
    }

    #[test]
    fn test_equality_is_by_value() {
        let a = Message::new(Role::Assistant, "same words here", "gpt-4", &count_words);
        let b = Message::from_raw(
            RawMessage::new("assistant", "same words here"),
            "gpt-4",
            &count_words,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_raw(), RawMessage::new("assistant", "same words here"));
    }

    #[test]
    fn test_source_conversions() {
        let source: MessageSource = (Role::User, "hi").into();
        assert_eq!(source, MessageSource::Raw(RawMessage::new("user", "hi")));

        let message = source.into_message("gpt-4", &count_words).unwrap();
        assert_eq!(message.to_string(), "user: hi");
    }
}
