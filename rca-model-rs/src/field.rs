use std::fmt;

use serde::{Deserialize, Serialize};

/// A value that may have started life as an opaque identifier.
///
/// `display` is what every consumer renders. `source_id` keeps the identifier
/// the display value was resolved from, and stays empty for plain names and
/// for identifiers the lookup could not resolve.
///
/// Deserializes from either a bare string or `{display, sourceId}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "FieldRepr")]
pub struct ResolvedField {
    pub display: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRepr {
    Plain(String),
    Tagged {
        display: String,
        #[serde(default, rename = "sourceId")]
        source_id: String,
    },
}

impl From<FieldRepr> for ResolvedField {
    fn from(repr: FieldRepr) -> Self {
        match repr {
            FieldRepr::Plain(display) => Self::raw(display),
            FieldRepr::Tagged { display, source_id } => Self { display, source_id },
        }
    }
}

impl ResolvedField {
    /// Wrap raw engine output before resolution.
    pub fn raw(value: impl Into<String>) -> Self {
        Self {
            display: value.into(),
            source_id: String::new(),
        }
    }

    pub fn resolved(display: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            display: display.into(),
            source_id: source_id.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.source_id.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.display.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }
}

impl fmt::Display for ResolvedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<&str> for ResolvedField {
    fn from(value: &str) -> Self {
        Self::raw(value)
    }
}

impl From<String> for ResolvedField {
    fn from(value: String) -> Self {
        Self::raw(value)
    }
}
