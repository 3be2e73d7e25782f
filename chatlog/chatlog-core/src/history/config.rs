//! Budget configuration for a history buffer.

use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};

/// Model assumed when a configuration does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4";

const MAX_TOKENS: u128 = i64::MAX as u128;

/// Partially specified budget parameters.
///
/// Every field is optional so a configuration can be assembled from several
/// sources (code, JSON, presets) before it is validated into a [`Budget`].
///
/// # Example
/// ```ignore
/// use chatlog::BudgetConfig;
///
/// let config = BudgetConfig::new()
///     .with_model("gpt-4")
///     .with_max_model_tokens(8000)
///     .with_max_completion_tokens(1000)
///     .with_token_padding(500)
///     .with_max_messages(200);
/// buffer.configure(config)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub model_id: Option<String>,
    pub max_model_tokens: Option<usize>,
    pub max_completion_tokens: Option<usize>,
    pub token_padding: Option<usize>,
    pub max_messages: Option<usize>,
}

impl BudgetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_max_model_tokens(mut self, tokens: usize) -> Self {
        self.max_model_tokens = Some(tokens);
        self
    }

    pub fn with_max_completion_tokens(mut self, tokens: usize) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }

    pub fn with_token_padding(mut self, tokens: usize) -> Self {
        self.token_padding = Some(tokens);
        self
    }

    pub fn with_max_messages(mut self, count: usize) -> Self {
        self.max_messages = Some(count);
        self
    }

    /// Parse a configuration from JSON. Missing fields stay unset.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HistoryError::Configuration(format!("malformed budget config: {e}")))
    }

    /// Fill every unset field from `other`.
    pub fn or(self, other: BudgetConfig) -> Self {
        Self {
            model_id: self.model_id.or(other.model_id),
            max_model_tokens: self.max_model_tokens.or(other.max_model_tokens),
            max_completion_tokens: self.max_completion_tokens.or(other.max_completion_tokens),
            token_padding: self.token_padding.or(other.token_padding),
            max_messages: self.max_messages.or(other.max_messages),
        }
    }

    /// Look up one of the built-in presets.
    pub fn preset(name: &str) -> Option<Self> {
        let (model, model_tokens, completion, padding, messages) = match name {
            "gpt-4_default" | "gpt-4_creative" => ("gpt-4", 8000, 1000, 500, 1000),
            "gpt-4_small" => ("gpt-4", 8000, 1000, 500, 50),
            "gpt-3_16K_default" => ("gpt-3", 16000, 2000, 500, 2000),
            _ => return None,
        };

        Some(
            Self::new()
                .with_model(model)
                .with_max_model_tokens(model_tokens)
                .with_max_completion_tokens(completion)
                .with_token_padding(padding)
                .with_max_messages(messages),
        )
    }

    /// Names accepted by [`BudgetConfig::preset`].
    pub fn preset_names() -> &'static [&'static str] {
        &["gpt-4_default", "gpt-4_small", "gpt-4_creative", "gpt-3_16K_default"]
    }
}

/// Validated budget parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub model_id: String,
    pub max_model_tokens: usize,
    pub max_completion_tokens: usize,
    pub token_padding: usize,
    pub max_messages: usize,
}

impl Budget {
    /// `max_model_tokens - (preamble_tokens + token_padding + max_completion_tokens)`.
    ///
    /// The result is allowed to go negative when the reserved parts exceed
    /// the model window. It saturates at the bounds of `i64`.
    pub fn max_chat_tokens(&self, preamble_tokens: usize) -> i64 {
        let reserved = preamble_tokens as i128
            + self.token_padding as i128
            + self.max_completion_tokens as i128;
        let remaining = self.max_model_tokens as i128 - reserved;
        remaining.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// The first token field that is too large for signed budget arithmetic,
    /// with the reason.
    pub(crate) fn out_of_range(&self) -> Option<(&'static str, String)> {
        let fields = [
            ("max_model_tokens", self.max_model_tokens),
            ("max_completion_tokens", self.max_completion_tokens),
            ("token_padding", self.token_padding),
        ];
        for (field, value) in fields {
            if value as u128 > MAX_TOKENS {
                return Some((field, format!("{value} exceeds {MAX_TOKENS}")));
            }
        }

        let reserved = self.token_padding as u128 + self.max_completion_tokens as u128;
        if reserved > MAX_TOKENS {
            return Some((
                "token_padding",
                format!("token_padding + max_completion_tokens exceeds {MAX_TOKENS}"),
            ));
        }
        None
    }
}

impl TryFrom<BudgetConfig> for Budget {
    type Error = HistoryError;

    fn try_from(config: BudgetConfig) -> Result<Self> {
        fn required(value: Option<usize>, field: &str) -> Result<usize> {
            value.ok_or_else(|| HistoryError::Configuration(format!("{field} must be set")))
        }

        let model_id = config.model_id.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if model_id.trim().is_empty() {
            return Err(HistoryError::Configuration(
                "model_id must not be empty".into(),
            ));
        }

        let budget = Self {
            model_id,
            max_model_tokens: required(config.max_model_tokens, "max_model_tokens")?,
            max_completion_tokens: required(
                config.max_completion_tokens,
                "max_completion_tokens",
            )?,
            token_padding: required(config.token_padding, "token_padding")?,
            max_messages: required(config.max_messages, "max_messages")?,
        };

        if let Some((field, reason)) = budget.out_of_range() {
            return Err(HistoryError::Configuration(format!("{field}: {reason}")));
        }
        Ok(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_named() {
        let config = BudgetConfig::new()
            .with_max_model_tokens(100)
            .with_token_padding(10)
            .with_max_messages(5);
        let err = Budget::try_from(config).unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Configuration(ref msg) if msg.contains("max_completion_tokens")
        ));
    }

    #[test]
    fn test_model_defaults_to_gpt4() {
        let budget = Budget::try_from(BudgetConfig::preset("gpt-4_small").unwrap()).unwrap();
        assert_eq!(budget.model_id, "gpt-4");
        assert_eq!(budget.max_messages, 50);

        let unnamed = BudgetConfig {
            model_id: None,
            ..BudgetConfig::preset("gpt-4_default").unwrap()
        };
        assert_eq!(Budget::try_from(unnamed).unwrap().model_id, DEFAULT_MODEL);
    }

    #[test]
    fn test_max_chat_tokens_can_go_negative() {
        let budget = Budget {
            model_id: "gpt-4".into(),
            max_model_tokens: 100,
            max_completion_tokens: 20,
            token_padding: 10,
            max_messages: 10,
        };
        assert_eq!(budget.max_chat_tokens(10), 60);
        assert_eq!(budget.max_chat_tokens(200), -130);
    }

    #[test]
    fn test_oversized_token_fields_rejected() {
        let base = BudgetConfig::preset("gpt-4_default").unwrap();

        let err = Budget::try_from(base.clone().with_max_model_tokens(usize::MAX)).unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Configuration(ref msg) if msg.starts_with("max_model_tokens")
        ));

        let err = Budget::try_from(
            base.clone()
                .with_token_padding(i64::MAX as usize)
                .with_max_completion_tokens(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Configuration(ref msg) if msg.starts_with("token_padding")
        ));

        let edge = Budget::try_from(
            base.with_max_model_tokens(i64::MAX as usize)
                .with_token_padding(0)
                .with_max_completion_tokens(0),
        )
        .unwrap();
        assert_eq!(edge.max_chat_tokens(0), i64::MAX);
    }

    #[test]
    fn test_max_chat_tokens_saturates() {
        let budget = Budget {
            model_id: "gpt-4".into(),
            max_model_tokens: 0,
            max_completion_tokens: i64::MAX as usize,
            token_padding: 0,
            max_messages: 10,
        };
        assert_eq!(budget.max_chat_tokens(usize::MAX), i64::MIN);
    }

    #[test]
    fn test_from_json_and_merge() {
        let partial = BudgetConfig::from_json_str(r#"{"max_model_tokens": 4000}"#).unwrap();
        assert_eq!(partial.max_model_tokens, Some(4000));
        assert!(partial.max_messages.is_none());

        let merged = partial.or(BudgetConfig::preset("gpt-3_16K_default").unwrap());
        let budget = Budget::try_from(merged).unwrap();
        assert_eq!(budget.max_model_tokens, 4000);
        assert_eq!(budget.max_completion_tokens, 2000);
        assert_eq!(budget.model_id, "gpt-3");

        assert!(BudgetConfig::from_json_str(r#"{"max_model_tokens": -1}"#).is_err());
    }

    #[test]
    fn test_presets() {
        for name in BudgetConfig::preset_names() {
            assert!(Budget::try_from(BudgetConfig::preset(name).unwrap()).is_ok());
        }
        assert!(BudgetConfig::preset("gpt-5_imaginary").is_none());
    }
}
