//! Token counting boundary.
//!
//! The history engine never counts tokens itself. Every cost flows through a
//! [`Tokenizer`], which maps a model identifier and a piece of text to a
//! non-negative token count. Implementations must be deterministic for
//! identical inputs; the engine memoizes the result on each
//! [`Message`](crate::Message) and never asks twice for the same message.

mod estimator;
#[cfg(feature = "tiktoken")]
mod tiktoken;

pub use estimator::{HeuristicTokenizer, CHARS_PER_TOKEN};
#[cfg(feature = "tiktoken")]
pub use tiktoken::TiktokenTokenizer;

/// Counts tokens for a given model.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, model_id: &str, text: &str) -> usize;
}

impl<F> Tokenizer for F
where
    F: Fn(&str, &str) -> usize + Send + Sync,
{
    fn count_tokens(&self, model_id: &str, text: &str) -> usize {
        self(model_id, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn count_words(_model_id: &str, text: &str) -> usize {
        text.split_whitespace().count()
    }

    #[test]
    fn test_fn_items_are_tokenizers() {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(count_words);
        assert_eq!(tokenizer.count_tokens("gpt-4", "one two three"), 3);
        assert_eq!(tokenizer.count_tokens("gpt-4", ""), 0);
    }
}
