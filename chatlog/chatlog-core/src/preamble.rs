//! Wildcard expansion for system preambles.
//!
//! A preamble template contains `{name}` placeholders that are resolved
//! against a per-instance wildcard table every time the template is expanded.
//! Wildcards are either fixed text or a dynamic capability evaluated on each
//! expansion, such as the current date.
//!
//! # Example
//! ```ignore
//! use chatlog::{PreambleExpander, WildcardValue};
//!
//! let mut expander = PreambleExpander::new();
//! expander.register("name", WildcardValue::text("Ada"), "The user's name")?;
//! let preamble = expander.expand("You are talking to {name}. It is {date}.")?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HistoryError, Result};

/// Tag of the built-in dynamic wildcard that renders the current local time.
pub const DATE_TAG: &str = "__DATE__";

const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

type ComputeFn = Arc<dyn Fn() -> String + Send + Sync>;

/// The value of a wildcard.
#[derive(Clone)]
pub enum WildcardValue {
    /// Substituted verbatim.
    Text(String),
    /// Computed at expansion time. The tag identifies the capability in
    /// snapshots, where the function itself cannot be stored.
    Dynamic { tag: String, compute: ComputeFn },
}

impl WildcardValue {
    pub fn text(value: impl Into<String>) -> Self {
        WildcardValue::Text(value.into())
    }

    pub fn dynamic<F>(tag: impl Into<String>, compute: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        WildcardValue::Dynamic {
            tag: tag.into(),
            compute: Arc::new(compute),
        }
    }

    /// Current local time as `dd/mm/YYYY HH:MM:SS`.
    pub fn date() -> Self {
        Self::dynamic(DATE_TAG, || {
            chrono::Local::now().format(DATE_FORMAT).to_string()
        })
    }

    /// Resolve a dynamic tag to one of the built-in capabilities.
    pub fn builtin(tag: &str) -> Option<Self> {
        match tag {
            DATE_TAG => Some(Self::date()),
            _ => None,
        }
    }

    pub fn resolve(&self) -> String {
        match self {
            WildcardValue::Text(value) => value.clone(),
            WildcardValue::Dynamic { compute, .. } => compute(),
        }
    }
}

impl fmt::Debug for WildcardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WildcardValue::Text(value) => f.debug_tuple("Text").field(value).finish(),
            WildcardValue::Dynamic { tag, .. } => {
                f.debug_struct("Dynamic").field("tag", tag).finish_non_exhaustive()
            }
        }
    }
}

/// A registered wildcard.
#[derive(Debug, Clone)]
pub struct Wildcard {
    pub value: WildcardValue,
    pub description: String,
}

/// The wildcards every new expander starts with.
pub fn default_wildcards() -> BTreeMap<String, Wildcard> {
    let mut table = BTreeMap::new();
    table.insert(
        "date".to_string(),
        Wildcard {
            value: WildcardValue::date(),
            description: "The current date and time".to_string(),
        },
    );
    table
}

/// Expands `{name}` placeholders from an instance-owned wildcard table.
#[derive(Debug, Clone)]
pub struct PreambleExpander {
    wildcards: BTreeMap<String, Wildcard>,
}

impl PreambleExpander {
    /// Create an expander seeded with [`default_wildcards`].
    pub fn new() -> Self {
        Self {
            wildcards: default_wildcards(),
        }
    }

    /// Create an expander with no wildcards at all.
    pub fn empty() -> Self {
        Self {
            wildcards: BTreeMap::new(),
        }
    }

    /// Register or replace a wildcard.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        value: WildcardValue,
        description: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        let description = description.into();
        validate_wildcard(&name, &description)?;
        self.wildcards.insert(name, Wildcard { value, description });
        Ok(())
    }

    /// Merge a batch of wildcards. The batch is validated as a whole first, so
    /// a bad entry leaves the table untouched.
    pub fn register_all<I>(&mut self, wildcards: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Wildcard)>,
    {
        let batch: Vec<_> = wildcards.into_iter().collect();
        for (name, wildcard) in &batch {
            validate_wildcard(name, &wildcard.description)?;
        }
        self.wildcards.extend(batch);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Wildcard> {
        self.wildcards.get(name)
    }

    pub fn wildcards(&self) -> &BTreeMap<String, Wildcard> {
        &self.wildcards
    }

    /// Find a registered dynamic capability by its tag.
    pub(crate) fn dynamic_by_tag(&self, tag: &str) -> Option<WildcardValue> {
        self.wildcards.values().find_map(|w| match &w.value {
            WildcardValue::Dynamic { tag: t, .. } if t == tag => Some(w.value.clone()),
            _ => None,
        })
    }

    /// Substitute every placeholder in `template`.
    ///
    /// `{{` and `}}` produce literal braces. A `{` with no closing brace is
    /// copied through unchanged.
    pub fn expand(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if tail.starts_with('}') {
                out.push('}');
                rest = &tail[1..];
            } else {
                match tail[1..].find(['{', '}']) {
                    Some(end) if tail.as_bytes()[end + 1] == b'}' => {
                        let name = &tail[1..end + 1];
                        let wildcard = self.wildcards.get(name).ok_or_else(|| {
                            HistoryError::UndefinedWildcard {
                                name: name.to_string(),
                            }
                        })?;
                        out.push_str(&wildcard.value.resolve());
                        rest = &tail[end + 2..];
                    }
                    _ => {
                        out.push('{');
                        rest = &tail[1..];
                    }
                }
            }
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl Default for PreambleExpander {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_wildcard(name: &str, description: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HistoryError::Validation("wildcard name must not be empty".into()));
    }
    if name.contains(['{', '}']) {
        return Err(HistoryError::Validation(format!(
            "wildcard name `{name}` must not contain braces"
        )));
    }
    if description.trim().is_empty() {
        return Err(HistoryError::Validation(format!(
            "wildcard `{name}` is missing a description"
        )));
    }
    Ok(())
}
