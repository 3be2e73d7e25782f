//! Boundary to the completion endpoint.
//!
//! The history engine does not talk to any model service itself. A
//! [`CompletionBackend`] receives the finalized sequence (preamble first,
//! then the window oldest to newest) and answers with the assistant's reply.
//! Retries, timeouts and authentication are the backend's business.

use std::future::Future;

use crate::error::{HistoryError, Result};
use crate::history::HistoryBuffer;
use crate::message::{Message, RawMessage, Role};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A model service that turns a role/content sequence into a reply.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        request: Vec<RawMessage>,
    ) -> impl Future<Output = std::result::Result<String, BoxError>> + Send;
}

impl HistoryBuffer {
    /// Run one conversational turn.
    ///
    /// Appends `content` as a user message, sends the finalized sequence to
    /// `backend` and appends the reply as an assistant message, which is
    /// returned. If the backend fails, the user message stays in history and
    /// [`HistoryError::Completion`] is returned.
    pub async fn exchange<B>(&mut self, content: impl Into<String>, backend: &B) -> Result<Message>
    where
        B: CompletionBackend,
    {
        self.push_user(content)?;
        let request = self.finalized_sequence()?;

        let reply = backend.complete(request).await.map_err(|e| {
            tracing::warn!(buffer = %self.id(), error = %e, "completion backend failed");
            HistoryError::Completion(e.to_string())
        })?;

        let reply = Message::new(
            Role::Assistant,
            reply,
            self.model_id(),
            self.tokenizer().as_ref(),
        );
        self.append(reply.clone())?;
        Ok(reply)
    }
}
