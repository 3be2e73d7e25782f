//! Fast token estimation without external dependencies.
//!
//! Uses a character-based heuristic. The 3.4 chars/token ratio sits between
//! natural language prose (~4.0 chars/token) and code (~3.0 chars/token).

use super::Tokenizer;

/// Characters per token ratio used by [`HeuristicTokenizer`].
pub const CHARS_PER_TOKEN: f32 = 3.4;

/// A model-agnostic tokenizer that estimates from byte length.
///
/// The model identifier is ignored. Use this when no exact tokenizer is
/// available for the target model, or in tests where only relative sizes
/// matter.
///
/// # Example
/// ```ignore
/// use chatlog::{HeuristicTokenizer, Tokenizer};
///
/// let tokens = HeuristicTokenizer::new().count_tokens("gpt-4", "hello");
/// assert_eq!(tokens, 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenizer {
    chars_per_token: f32,
}

impl HeuristicTokenizer {
    pub fn new() -> Self {
        Self {
            chars_per_token: CHARS_PER_TOKEN,
        }
    }

    /// Override the characters per token ratio.
    ///
    /// Non-positive ratios fall back to the default.
    pub fn with_chars_per_token(mut self, ratio: f32) -> Self {
        self.chars_per_token = if ratio > 0.0 { ratio } else { CHARS_PER_TOKEN };
        self
    }

    /// Estimate token count for a text string.
    #[inline]
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() as f32 / self.chars_per_token).ceil() as usize
    }
}

impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn count_tokens(&self, _model_id: &str, text: &str) -> usize {
        self.estimate(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(HeuristicTokenizer::new().estimate(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars / 3.4 = 1.47 -> ceil = 2
        assert_eq!(HeuristicTokenizer::new().estimate("hello"), 2);
    }

    #[test]
    fn test_estimate_tokens_longer() {
        // 340 chars should be ~100 tokens
        let text = "a".repeat(340);
        assert_eq!(HeuristicTokenizer::new().estimate(&text), 100);
    }

    #[test]
    fn test_custom_ratio() {
        let tokenizer = HeuristicTokenizer::new().with_chars_per_token(4.0);
        assert_eq!(tokenizer.count_tokens("any-model", "abcdefgh"), 2);

        let fallback = HeuristicTokenizer::new().with_chars_per_token(0.0);
        assert_eq!(fallback.count_tokens("any-model", "hello"), 2);
    }

    #[test]
    fn test_model_is_ignored() {
        let tokenizer = HeuristicTokenizer::new();
        assert_eq!(
            tokenizer.count_tokens("gpt-4", "same text"),
            tokenizer.count_tokens("gpt-3", "same text")
        );
    }
}
