//! Exact BPE token counting through `tiktoken-rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tiktoken_rs::CoreBPE;

use super::Tokenizer;
use crate::error::{HistoryError, Result};

/// A tokenizer backed by OpenAI's BPE encodings.
///
/// Encoders are resolved per model identifier on first use and cached. Models
/// that tiktoken does not know are counted with `cl100k_base`.
pub struct TiktokenTokenizer {
    fallback: Arc<CoreBPE>,
    encoders: Mutex<HashMap<String, Arc<CoreBPE>>>,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let fallback = tiktoken_rs::cl100k_base().map_err(|e| {
            HistoryError::Configuration(format!("Failed to load tokenizer: {e}"))
        })?;

        Ok(Self {
            fallback: Arc::new(fallback),
            encoders: Mutex::new(HashMap::new()),
        })
    }

    fn encoder(&self, model_id: &str) -> Arc<CoreBPE> {
        let mut encoders = match self.encoders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        encoders
            .entry(model_id.to_string())
            .or_insert_with(|| match tiktoken_rs::get_bpe_from_model(model_id) {
                Ok(bpe) => Arc::new(bpe),
                Err(e) => {
                    tracing::debug!(model_id, error = %e, "unknown model, using cl100k_base");
                    self.fallback.clone()
                }
            })
            .clone()
    }
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer").finish_non_exhaustive()
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, model_id: &str, text: &str) -> usize {
        self.encoder(model_id).encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_deterministic() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let first = tokenizer.count_tokens("gpt-4", "Hello, how are you?");
        let second = tokenizer.count_tokens("gpt-4", "Hello, how are you?");
        assert!(first > 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        assert!(tokenizer.count_tokens("not-a-real-model", "Hello there") > 0);
        assert_eq!(tokenizer.count_tokens("not-a-real-model", ""), 0);
    }
}
