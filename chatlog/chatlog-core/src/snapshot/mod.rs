//! Versioned, schema-validated snapshots of a [`HistoryBuffer`].
//!
//! A snapshot stores raw role/content pairs only. Token costs are recomputed
//! when the snapshot is restored, so a document written with one tokenizer
//! can be loaded with another; the restored buffer is re-evicted against its
//! recomputed budget.
//!
//! Restoring is all-or-nothing. Every required field is checked for presence
//! and JSON type before anything is built, nested records are decoded with
//! their JSON path reported on failure, and the target buffer is only
//! replaced once the new state is complete.

mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{HistoryError, Result};
use crate::history::{Budget, HistoryBuffer};
use crate::message::{Message, RawMessage};
use crate::preamble::{PreambleExpander, WildcardValue};
use crate::tokenizer::Tokenizer;

pub use store::SnapshotStore;

/// Version written into every snapshot. Restores accept any `1.x` document.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// How a wildcard's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardKind {
    /// `value` is the substituted text.
    Text,
    /// `value` is the tag of a dynamic capability.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardRecord {
    pub kind: WildcardKind,
    pub value: String,
    pub description: String,
}

/// The persisted form of a buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: String,
    pub generated_at: String,
    pub identity: String,
    /// Byte length of the compact JSON encoding with this field set to 0.
    pub size: u64,
    pub model_id: String,
    pub max_model_tokens: usize,
    pub max_completion_tokens: usize,
    pub token_padding: usize,
    pub max_messages: usize,
    pub max_chat_tokens: i64,
    pub full_log: Vec<RawMessage>,
    pub trimmed_window: Vec<RawMessage>,
    pub trimmed_window_token_sum: usize,
    pub evicted_count: usize,
    pub preamble_template: String,
    pub wildcard_table: BTreeMap<String, WildcardRecord>,
}

impl Snapshot {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy)]
enum JsonKind {
    String,
    Unsigned,
    Integer,
    Array,
    Object,
}

impl JsonKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            JsonKind::String => value.is_string(),
            JsonKind::Unsigned => value.is_u64(),
            JsonKind::Integer => value.is_i64() || value.is_u64(),
            JsonKind::Array => value.is_array(),
            JsonKind::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            JsonKind::String => "a string",
            JsonKind::Unsigned => "a non-negative integer",
            JsonKind::Integer => "an integer",
            JsonKind::Array => "an array",
            JsonKind::Object => "an object",
        }
    }
}

const REQUIRED_FIELDS: &[(&str, JsonKind)] = &[
    ("schema_version", JsonKind::String),
    ("generated_at", JsonKind::String),
    ("identity", JsonKind::String),
    ("size", JsonKind::Unsigned),
    ("model_id", JsonKind::String),
    ("max_model_tokens", JsonKind::Unsigned),
    ("max_completion_tokens", JsonKind::Unsigned),
    ("token_padding", JsonKind::Unsigned),
    ("max_messages", JsonKind::Unsigned),
    ("max_chat_tokens", JsonKind::Integer),
    ("full_log", JsonKind::Array),
    ("trimmed_window", JsonKind::Array),
    ("trimmed_window_token_sum", JsonKind::Unsigned),
    ("evicted_count", JsonKind::Unsigned),
    ("preamble_template", JsonKind::String),
    ("wildcard_table", JsonKind::Object),
];

/// Encodes buffers into [`Snapshot`]s and rebuilds them.
pub struct SnapshotCodec;

impl SnapshotCodec {
    /// Capture the state of a ready buffer.
    pub fn snapshot(buffer: &HistoryBuffer) -> Result<Snapshot> {
        buffer.ensure_ready("snapshot")?;
        let budget = buffer
            .budget()
            .ok_or_else(|| HistoryError::NotReady("buffer has no budget".into()))?;

        let wildcard_table = buffer
            .expander()
            .wildcards()
            .iter()
            .map(|(name, wildcard)| {
                let (kind, value) = match &wildcard.value {
                    WildcardValue::Text(text) => (WildcardKind::Text, text.clone()),
                    WildcardValue::Dynamic { tag, .. } => (WildcardKind::Dynamic, tag.clone()),
                };
                let record = WildcardRecord {
                    kind,
                    value,
                    description: wildcard.description.clone(),
                };
                (name.clone(), record)
            })
            .collect();

        let mut snapshot = Snapshot {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            identity: buffer.id().to_string(),
            size: 0,
            model_id: budget.model_id.clone(),
            max_model_tokens: budget.max_model_tokens,
            max_completion_tokens: budget.max_completion_tokens,
            token_padding: budget.token_padding,
            max_messages: budget.max_messages,
            max_chat_tokens: buffer.max_chat_tokens(),
            full_log: buffer.full_log().iter().map(Message::to_raw).collect(),
            trimmed_window: buffer.window().iter().map(Message::to_raw).collect(),
            trimmed_window_token_sum: buffer.window_tokens(),
            evicted_count: buffer.evicted_count(),
            preamble_template: buffer.preamble_template().unwrap_or_default().to_string(),
            wildcard_table,
        };
        snapshot.size = serde_json::to_vec(&snapshot)?.len() as u64;
        Ok(snapshot)
    }

    /// Rebuild a new buffer from a document.
    ///
    /// Dynamic wildcards resolve against the built-in capabilities only. Use
    /// [`SnapshotCodec::restore_with`] when the buffer registered its own.
    pub fn restore(document: &Value, tokenizer: Arc<dyn Tokenizer>) -> Result<HistoryBuffer> {
        Self::restore_with(document, tokenizer, &PreambleExpander::new())
    }

    /// Rebuild a new buffer, resolving dynamic wildcard tags against the
    /// capabilities registered on `resolver` before the built-in ones.
    pub fn restore_with(
        document: &Value,
        tokenizer: Arc<dyn Tokenizer>,
        resolver: &PreambleExpander,
    ) -> Result<HistoryBuffer> {
        let snapshot = Self::decode(document)?;
        build_buffer(snapshot, tokenizer, resolver)
    }

    /// Replace `target` with the state in `document`.
    ///
    /// The target's tokenizer is kept, and dynamic wildcard tags may resolve
    /// against capabilities already registered on it. On any error the target
    /// is left exactly as it was.
    pub fn restore_into(document: &Value, target: &mut HistoryBuffer) -> Result<()> {
        let snapshot = Self::decode(document)?;
        let restored = build_buffer(snapshot, target.tokenizer().clone(), target.expander())?;
        *target = restored;
        Ok(())
    }

    /// Check every required field, then decode the nested records.
    pub fn decode(document: &Value) -> Result<Snapshot> {
        let object = document
            .as_object()
            .ok_or_else(|| HistoryError::schema("$", "snapshot must be a JSON object"))?;

        for (field, kind) in REQUIRED_FIELDS {
            match object.get(*field) {
                None => return Err(HistoryError::schema(*field, "missing required field")),
                Some(value) if !kind.matches(value) => {
                    return Err(HistoryError::schema(
                        *field,
                        format!("expected {}", kind.describe()),
                    ))
                }
                Some(_) => {}
            }
        }

        serde_path_to_error::deserialize(document)
            .map_err(|e| HistoryError::schema(e.path().to_string(), e.inner().to_string()))
    }
}

fn build_buffer(
    snapshot: Snapshot,
    tokenizer: Arc<dyn Tokenizer>,
    resolver: &PreambleExpander,
) -> Result<HistoryBuffer> {
    let major = snapshot.schema_version.split('.').next().unwrap_or_default();
    let supported = SCHEMA_VERSION.split('.').next().unwrap_or_default();
    if major != supported {
        return Err(HistoryError::schema(
            "schema_version",
            format!("unsupported version {}", snapshot.schema_version),
        ));
    }

    let id = Uuid::parse_str(&snapshot.identity)
        .map_err(|e| HistoryError::schema("identity", e.to_string()))?;

    if snapshot.model_id.trim().is_empty() {
        return Err(HistoryError::schema("model_id", "must not be empty"));
    }
    let budget = Budget {
        model_id: snapshot.model_id,
        max_model_tokens: snapshot.max_model_tokens,
        max_completion_tokens: snapshot.max_completion_tokens,
        token_padding: snapshot.token_padding,
        max_messages: snapshot.max_messages,
    };
    if let Some((field, reason)) = budget.out_of_range() {
        return Err(HistoryError::schema(field, reason));
    }

    let mut expander = PreambleExpander::empty();
    for (name, record) in snapshot.wildcard_table {
        let field = format!("wildcard_table.{name}");
        let value = match record.kind {
            WildcardKind::Text => WildcardValue::Text(record.value),
            WildcardKind::Dynamic => resolver
                .dynamic_by_tag(&record.value)
                .or_else(|| WildcardValue::builtin(&record.value))
                .ok_or_else(|| {
                    HistoryError::schema(
                        field.clone(),
                        format!("unknown dynamic wildcard `{}`", record.value),
                    )
                })?,
        };
        expander
            .register(name, value, record.description)
            .map_err(|e| HistoryError::schema(field, e.to_string()))?;
    }

    let full_len = snapshot.full_log.len();
    let window_len = snapshot.trimmed_window.len();
    let window_start = full_len.checked_sub(window_len).ok_or_else(|| {
        HistoryError::schema("trimmed_window", "longer than full_log")
    })?;
    if snapshot.full_log[window_start..] != snapshot.trimmed_window[..] {
        return Err(HistoryError::schema(
            "trimmed_window",
            "must be a suffix of full_log",
        ));
    }

    let mut full_log = Vec::with_capacity(full_len);
    for (i, raw) in snapshot.full_log.into_iter().enumerate() {
        let message = Message::from_raw(raw, &budget.model_id, tokenizer.as_ref())
            .map_err(|e| HistoryError::schema(format!("full_log[{i}].role"), e.to_string()))?;
        full_log.push(message);
    }

    if snapshot.preamble_template.is_empty() {
        return Err(HistoryError::schema("preamble_template", "must not be empty"));
    }
    let expanded = expander
        .expand(&snapshot.preamble_template)
        .map_err(|e| HistoryError::schema("preamble_template", e.to_string()))?;
    let preamble_tokens = tokenizer.count_tokens(&budget.model_id, &expanded);
    let max_chat_tokens = budget.max_chat_tokens(preamble_tokens);
    let window_tokens: usize = full_log[window_start..].iter().map(Message::token_cost).sum();

    if window_tokens != snapshot.trimmed_window_token_sum {
        tracing::warn!(
            stored = snapshot.trimmed_window_token_sum,
            recomputed = window_tokens,
            "snapshot window token sum differs after retokenizing"
        );
    }
    if snapshot.evicted_count != window_start {
        tracing::warn!(
            stored = snapshot.evicted_count,
            expected = window_start,
            "snapshot eviction counter disagrees with log lengths"
        );
    }
    if max_chat_tokens != snapshot.max_chat_tokens {
        tracing::debug!(
            stored = snapshot.max_chat_tokens,
            recomputed = max_chat_tokens,
            "chat budget recomputed on restore"
        );
    }

    let mut buffer = HistoryBuffer::new(tokenizer);
    buffer.id = id;
    buffer.budget = Some(budget);
    buffer.expander = expander;
    buffer.preamble_template = Some(snapshot.preamble_template);
    buffer.preamble_tokens = preamble_tokens;
    buffer.max_chat_tokens = max_chat_tokens;
    buffer.full_log = full_log;
    buffer.window_start = window_start;
    buffer.window_tokens = window_tokens;
    buffer.evicted_count = window_start;
    buffer.evict();

    tracing::debug!(buffer = %buffer.id, messages = full_len, "snapshot restored");
    Ok(buffer)
}

impl HistoryBuffer {
    /// Shorthand for [`SnapshotCodec::snapshot`].
    pub fn snapshot(&self) -> Result<Snapshot> {
        SnapshotCodec::snapshot(self)
    }

    /// Shorthand for [`SnapshotCodec::restore_into`].
    pub fn restore(&mut self, document: &Value) -> Result<()> {
        SnapshotCodec::restore_into(document, self)
    }
}
