//! Structural patterns over JSON message bodies
//!
//! Handlers select messages by the shape of the body: which fields are
//! present, what literal values they hold, string prefixes, and so on.
//! Patterns can capture sub-values under a name; a name captured twice must
//! capture equal values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A pattern over a [`serde_json::Value`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Wildcard,
    /// Equal to the literal; numbers compare by value, so `1` matches `1.0`
    Literal(Value),
    /// An object that has every listed field, each matching its pattern
    Fields(Vec<(String, Pattern)>),
    /// An array of exactly this length, matched element-wise
    Sequence(Vec<Pattern>),
    StringPrefix(String),
    Bind {
        name: String,
        pattern: Box<Pattern>,
    },
    /// First alternative that matches wins
    AnyOf(Vec<Pattern>),
}

/// Values captured by [`Pattern::Bind`]
pub type Bindings = HashMap<String, Value>;

impl Pattern {
    pub fn matches(&self, value: &Value) -> bool {
        self.match_with_bindings(value).is_some()
    }

    /// Match and return the captured bindings, or `None` on mismatch.
    pub fn match_with_bindings(&self, value: &Value) -> Option<Bindings> {
        let mut bindings = Bindings::new();
        if match_into(self, value, &mut bindings) {
            Some(bindings)
        } else {
            None
        }
    }

    /// Names of every field this pattern requires at the top level.
    pub fn required_fields(&self) -> Vec<&str> {
        match self {
            Pattern::Fields(entries) => entries.iter().map(|(name, _)| name.as_str()).collect(),
            Pattern::Bind { pattern, .. } => pattern.required_fields(),
            _ => Vec::new(),
        }
    }
}

fn match_into(pattern: &Pattern, value: &Value, bindings: &mut Bindings) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Literal(expected) => literal_eq(expected, value),
        Pattern::Fields(entries) => {
            let Some(object) = value.as_object() else {
                return false;
            };
            entries.iter().all(|(name, field_pattern)| {
                object
                    .get(name)
                    .is_some_and(|field| match_into(field_pattern, field, bindings))
            })
        }
        Pattern::Sequence(items) => {
            let Some(array) = value.as_array() else {
                return false;
            };
            array.len() == items.len()
                && items
                    .iter()
                    .zip(array)
                    .all(|(item, element)| match_into(item, element, bindings))
        }
        Pattern::StringPrefix(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
        Pattern::Bind { name, pattern } => {
            if !match_into(pattern, value, bindings) {
                return false;
            }
            match bindings.get(name) {
                Some(previous) => literal_eq(previous, value),
                None => {
                    bindings.insert(name.clone(), value.clone());
                    true
                }
            }
        }
        Pattern::AnyOf(alternatives) => {
            for alternative in alternatives {
                let mut attempt = bindings.clone();
                if match_into(alternative, value, &mut attempt) {
                    *bindings = attempt;
                    return true;
                }
            }
            false
        }
    }
}

fn literal_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| literal_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| literal_eq(x, y)))
        }
        _ => expected == actual,
    }
}

/// Helper for building patterns from code or tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternBuilder;

impl PatternBuilder {
    pub fn wildcard() -> Pattern {
        Pattern::Wildcard
    }

    pub fn literal(value: impl Into<Value>) -> Pattern {
        Pattern::Literal(value.into())
    }

    pub fn fields<N: Into<String>>(entries: impl IntoIterator<Item = (N, Pattern)>) -> Pattern {
        Pattern::Fields(
            entries
                .into_iter()
                .map(|(name, pattern)| (name.into(), pattern))
                .collect(),
        )
    }

    pub fn field(name: impl Into<String>, pattern: Pattern) -> Pattern {
        Pattern::Fields(vec![(name.into(), pattern)])
    }

    /// An object carrying `name` with any value
    pub fn has_field(name: impl Into<String>) -> Pattern {
        Self::field(name, Pattern::Wildcard)
    }

    pub fn sequence(items: Vec<Pattern>) -> Pattern {
        Pattern::Sequence(items)
    }

    pub fn string_prefix(prefix: impl Into<String>) -> Pattern {
        Pattern::StringPrefix(prefix.into())
    }

    pub fn bind(name: impl Into<String>, pattern: Pattern) -> Pattern {
        Pattern::Bind {
            name: name.into(),
            pattern: Box::new(pattern),
        }
    }

    pub fn any_of(alternatives: Vec<Pattern>) -> Pattern {
        Pattern::AnyOf(alternatives)
    }
}
