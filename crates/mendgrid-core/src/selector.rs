//! Label selectors.
//!
//! A `LabelSelector` is the serialized form stored on policies: exact-match
//! labels plus set-based expressions. It must be compiled into a `Selector`
//! before matching, which is where malformed selectors are rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of the name segment of a label key, and of a label value.
const MAX_NAME_LEN: usize = 63;
/// Maximum length of the optional prefix segment of a label key.
const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("operator {operator:?} on key {key:?} requires at least one value")]
    MissingValues { key: String, operator: Operator },

    #[error("operator {operator:?} on key {key:?} must not carry values")]
    UnexpectedValues { key: String, operator: Operator },
}

/// Set-based selector operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One set-based requirement of a selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Serialized selector as written by policy authors.
///
/// An empty selector matches every node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector requiring `key` to be present.
    pub fn exists(key: &str) -> Self {
        Self {
            match_labels: BTreeMap::new(),
            match_expressions: vec![Requirement {
                key: key.to_string(),
                operator: Operator::Exists,
                values: Vec::new(),
            }],
        }
    }

    /// Selector with exact label matches only.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    /// Validate and compile into a matchable selector.
    pub fn compile(&self) -> Result<Selector, SelectorError> {
        let mut requirements = Vec::with_capacity(self.match_labels.len() + self.match_expressions.len());

        for (key, value) in &self.match_labels {
            validate_key(key)?;
            validate_value(key, value)?;
            requirements.push(Requirement {
                key: key.clone(),
                operator: Operator::In,
                values: vec![value.clone()],
            });
        }

        for req in &self.match_expressions {
            validate_key(&req.key)?;
            match req.operator {
                Operator::In | Operator::NotIn => {
                    if req.values.is_empty() {
                        return Err(SelectorError::MissingValues {
                            key: req.key.clone(),
                            operator: req.operator,
                        });
                    }
                    for value in &req.values {
                        validate_value(&req.key, value)?;
                    }
                }
                Operator::Exists | Operator::DoesNotExist => {
                    if !req.values.is_empty() {
                        return Err(SelectorError::UnexpectedValues {
                            key: req.key.clone(),
                            operator: req.operator,
                        });
                    }
                }
            }
            requirements.push(req.clone());
        }

        Ok(Selector { requirements })
    }

    /// Whether any part of the selector mentions `key`.
    pub fn references_key(&self, key: &str) -> bool {
        self.match_labels.contains_key(key) || self.match_expressions.iter().any(|r| r.key == key)
    }
}

/// A validated selector, ready for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Whether the label set satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| {
            let value = labels.get(&req.key);
            match req.operator {
                Operator::In => value.is_some_and(|v| req.values.contains(v)),
                Operator::NotIn => value.is_none_or(|v| !req.values.contains(v)),
                Operator::Exists => value.is_some(),
                Operator::DoesNotExist => value.is_none(),
            }
        })
    }

    /// True when the selector has no requirements (matches everything).
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = || SelectorError::InvalidKey(key.to_string());
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix
        && (prefix.is_empty()
            || prefix.len() > MAX_PREFIX_LEN
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-'))
    {
        return Err(invalid());
    }

    if name.is_empty() || name.len() > MAX_NAME_LEN || !is_label_token(name) {
        return Err(invalid());
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    // Empty values are legal label values.
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LEN || !is_label_token(value) {
        return Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Alphanumeric at both ends, `-_.` allowed in between.
fn is_label_token(s: &str) -> bool {
    let bytes = s.as_bytes();
    let edge_ok = |b: &u8| b.is_ascii_alphanumeric();
    bytes.first().is_some_and(edge_ok)
        && bytes.last().is_some_and(edge_ok)
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
